//! The driver's connection-state machine (§4.5, §4.7).

/// Coarse connection lifecycle state. The pairing flow drives
/// `Disconnected -> Pairing -> PairedDisconnected`; the connect flow
/// drives everything from `PairedDisconnected` onward.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Pairing,
    PairedDisconnected,
    Connecting,
    ConnectedRt,
    ConnectedCommand,
    Disconnecting,
}

impl ConnectionState {
    /// Returns whether a high-level operation may be issued from this
    /// state without first switching modes.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedRt | Self::ConnectedCommand)
    }
}
