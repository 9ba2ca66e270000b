//! Bluetooth RFCOMM transport abstraction. The driver only ever depends
//! on this trait; the platform-specific socket implementation lives
//! outside this crate.

use crate::address::BluetoothAddress;
use crate::error::Result;

/// A connected or connectable RFCOMM channel to a single pump.
#[async_trait::async_trait]
pub trait BluetoothTransport: Send + Sync {
    /// Opens the RFCOMM channel to `address`.
    async fn connect(&self, address: BluetoothAddress) -> Result<()>;

    /// Closes the channel. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Writes `bytes` to the channel.
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Waits for and returns the next chunk of bytes from the channel.
    /// May return fewer or more bytes than any single frame; callers feed
    /// the result through a [`crate::frame::FrameCodec`].
    async fn receive(&self) -> Result<Vec<u8>>;

    /// Cancels any in-flight `send`, causing it to return an error.
    fn cancel_send(&self);

    /// Cancels any in-flight `receive`, causing it to return an error.
    fn cancel_receive(&self);
}
