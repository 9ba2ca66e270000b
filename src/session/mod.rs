//! The session engine: owns the RFCOMM transport, the frame codec, the
//! authenticated transport-packet state (nonce, keys, sequence bit), and
//! the background tasks that keep RT mode alive and drain inbound
//! traffic (§4.5).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use combo_crypto::{Cipher, Nonce};

use crate::app::{AppCommand, AppPacket};
use crate::bluetooth::BluetoothTransport;
use crate::error::{Error, Result};
use crate::frame::FrameCodec;
use crate::store::{PersistentPumpState, PumpStateStore};
use crate::transport::{CommandId, TransportPacket};

pub use state::ConnectionState;

mod state;

/// Tunables for the session engine. Mirrors the pump's own fixed
/// timings; only `max_cycle_attempts` is a driver-side policy choice.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Interval between RT-mode keep-alive packets while connected in RT
    /// mode. The pump drops the RT connection after roughly 2x this
    /// interval with no traffic.
    pub rt_keep_alive_interval: Duration,
    /// Poll interval for a long button press's repeated check loop.
    pub long_press_tick: Duration,
    /// Duration a short press is held before release.
    pub short_press_hold: Duration,
    /// Upper bound on automatic retry loops (screen cycling, PIN
    /// re-prompts) before giving up with an error.
    pub max_cycle_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rt_keep_alive_interval: Duration::from_millis(1000),
            long_press_tick: Duration::from_millis(200),
            short_press_hold: Duration::from_millis(100),
            max_cycle_attempts: 20,
        }
    }
}

/// An inbound application packet together with the command's reliability
/// bit, as handed to the receive task's subscribers.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub packet: AppPacket,
}

struct Shared {
    transport: Arc<dyn BluetoothTransport>,
    cipher: Mutex<Option<Cipher>>,
    tx_nonce: Mutex<Nonce>,
    address: Mutex<u8>,
    sequence_bit: Mutex<bool>,
    state: Mutex<ConnectionState>,
    /// Set by [`SessionEngine::fail_session`] the moment a session-fatal
    /// condition is observed (§7). Blocked callers that see their channel
    /// close read this back instead of a bare "closed" error.
    failure: Mutex<Option<Error>>,
    /// Persistence backend for this pump's pairing data and nonce. The
    /// session is the only writer: every nonce increment and every
    /// pairing-state commit passes through here (§3, §4.6).
    store: Arc<dyn PumpStateStore>,
    /// Identifies this pump to `store` (its Bluetooth address).
    device: String,
}

/// Owns one pump connection's wire-level state and background tasks.
///
/// Cloning an `Arc<SessionEngine>` is how the pairing flow, the RT button
/// driver, and the high-level operations share access; internal mutable
/// state is behind `parking_lot::Mutex`, matching the teacher's
/// lock-per-field style rather than one coarse lock.
pub struct SessionEngine {
    shared: Arc<Shared>,
    /// Sending halves of the three fan-out channels, each wrapped so
    /// [`SessionEngine::fail_session`] can drop it and close the channel
    /// from the sender side, waking any receiver blocked on `recv()`.
    display_tx: Mutex<Option<mpsc::Sender<Inbound>>>,
    display_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    raw_tx: Mutex<Option<mpsc::UnboundedSender<TransportPacket>>>,
    raw_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportPacket>>>,
    config: SessionConfig,
    cancel: CancellationToken,
    _drop_guard: DropGuard,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Display updates are bounded: a slow consumer should see the latest
/// frame, not an unbounded backlog of stale ones.
const DISPLAY_CHANNEL_CAPACITY: usize = 4;

impl SessionEngine {
    /// Creates a session engine bound to `transport`, with no session key
    /// and no background tasks running yet. `device` identifies this pump
    /// to `store` and should be stable across reconnects (its Bluetooth
    /// address).
    #[must_use]
    pub fn new(
        transport: Arc<dyn BluetoothTransport>,
        config: SessionConfig,
        store: Arc<dyn PumpStateStore>,
        device: String,
    ) -> Self {
        let (display_tx, display_rx) = mpsc::channel(DISPLAY_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        Self {
            shared: Arc::new(Shared {
                transport,
                cipher: Mutex::new(None),
                tx_nonce: Mutex::new(Nonce::one()),
                address: Mutex::new(crate::transport::PAIRING_ADDRESS),
                sequence_bit: Mutex::new(false),
                state: Mutex::new(ConnectionState::Disconnected),
                failure: Mutex::new(None),
                store,
                device,
            }),
            display_tx: Mutex::new(Some(display_tx)),
            display_rx: Mutex::new(Some(display_rx)),
            control_tx: Mutex::new(Some(control_tx)),
            control_rx: Mutex::new(Some(control_rx)),
            raw_tx: Mutex::new(Some(raw_tx)),
            raw_rx: Mutex::new(Some(raw_rx)),
            config,
            cancel: cancel.clone(),
            _drop_guard: cancel.drop_guard(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        debug!(?state, "connection state transition");
        *self.shared.state.lock() = state;
    }

    /// Returns the cause of the session-fatal error that ended this
    /// session, if any. Callers whose channel `recv()` returns `None`
    /// should check here before falling back to a generic closed error.
    #[must_use]
    pub fn session_error(&self) -> Option<Error> {
        self.shared.failure.lock().clone()
    }

    /// Records `error` as the session's failure cause, tears down its
    /// background tasks, and drops every fan-out channel's sending half so
    /// any caller blocked on `recv()` observes the channel closing instead
    /// of hanging (§7 propagation policy).
    fn fail_session(&self, error: Error) {
        warn!(%error, "session-fatal error, tearing down session");
        *self.shared.failure.lock() = Some(error);
        self.set_connection_state(ConnectionState::Disconnected);
        self.shutdown();
        self.display_tx.lock().take();
        self.control_tx.lock().take();
        self.raw_tx.lock().take();
    }

    /// Installs the session key and bound address negotiated by pairing,
    /// resetting the outgoing nonce to the post-identification value.
    pub(crate) fn install_pairing_data(&self, state: &PersistentPumpState) {
        *self.shared.cipher.lock() = Some(Cipher::new(&state.pairing_data.client_pump_key));
        *self.shared.address.lock() = state.pairing_data.key_response_address;
        *self.shared.tx_nonce.lock() = state.current_tx_nonce;
    }

    /// Loads this session's persisted pairing state from its store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend has none recorded for
    /// this device.
    pub(crate) async fn load_state(&self) -> Result<PersistentPumpState> {
        self.shared.store.load(&self.shared.device).await
    }

    /// Commits `state` to this session's store. Used by pairing once
    /// keys are negotiated (§4.6 step 4 onward: "state is committed
    /// before continuing").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub(crate) async fn commit_state(&self, state: &PersistentPumpState) -> Result<()> {
        self.shared.store.store(&self.shared.device, state).await
    }

    /// Returns the current outgoing nonce value (not yet consumed).
    pub(crate) fn current_tx_nonce(&self) -> Nonce {
        *self.shared.tx_nonce.lock()
    }

    pub(crate) fn cipher(&self) -> Option<Cipher> {
        self.shared.cipher.lock().clone()
    }

    pub(crate) fn address(&self) -> u8 {
        *self.shared.address.lock()
    }

    pub(crate) fn set_address(&self, address: u8) {
        *self.shared.address.lock() = address;
    }

    /// Installs a cipher without persisting it (used transiently for the
    /// weak-PIN cipher during pairing).
    pub(crate) fn set_cipher(&self, cipher: Option<Cipher>) {
        *self.shared.cipher.lock() = cipher;
    }

    /// Overrides the outgoing nonce counter directly, used by pairing to
    /// reset it to the post-`REQUEST_ID` value of 1.
    pub(crate) fn set_tx_nonce(&self, nonce: Nonce) {
        *self.shared.tx_nonce.lock() = nonce;
    }

    /// Returns the receiver for transport packets that precede the
    /// application layer: pairing, key exchange, identification, and
    /// connect/disconnect handshake replies.
    pub fn take_raw_receiver(&self) -> Option<mpsc::UnboundedReceiver<TransportPacket>> {
        self.raw_rx.lock().take()
    }

    /// Consumes the current outgoing nonce for a MAC-authenticated send,
    /// persisting the incremented value before returning. The stored
    /// nonce is always updated before the packet that consumed it goes
    /// out on the wire (§3 nonce discipline).
    async fn next_tx_nonce(&self) -> Result<Nonce> {
        let (current, next) = {
            let mut nonce = self.shared.tx_nonce.lock();
            let current = *nonce;
            nonce.increment();
            (current, *nonce)
        };
        self.shared.store.store_nonce(&self.shared.device, next).await?;
        Ok(current)
    }

    fn toggle_sequence_bit(&self) -> bool {
        let mut bit = self.shared.sequence_bit.lock();
        *bit = !*bit;
        *bit
    }

    /// Sends a transport packet for `command_id` carrying `payload`,
    /// authenticating it unless the command exchanges keys before a
    /// cipher exists.
    pub(crate) async fn send_transport(
        &self,
        command_id: CommandId,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut packet = TransportPacket::new(
            command_id,
            self.address(),
            self.next_tx_nonce().await?,
            payload,
        );
        packet.sequence_bit = self.toggle_sequence_bit();
        if command_id.is_pre_key() {
            packet.compute_crc16_payload();
        } else if let Some(cipher) = self.cipher() {
            packet.authenticate(&cipher);
        } else {
            return Err(Error::SessionClosed(
                "attempted authenticated send with no session key".into(),
            ));
        }
        let framed = FrameCodec::encode(&packet.encode(true, true));
        trace!(?command_id, len = framed.len(), "sending transport packet");
        self.shared.transport.send(&framed).await
    }

    /// Sends an application packet, embedding it in a `DATA` transport
    /// packet.
    pub async fn send_app(&self, app: AppPacket) -> Result<()> {
        let reliable = app.command.reliable();
        let _ = reliable;
        self.send_transport(CommandId::Data, app.encode()).await
    }

    /// Returns the receiver for RT display/button-status traffic (bounded
    /// channel; only the most recent frames are retained under load).
    pub fn take_display_receiver(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.display_rx.lock().take()
    }

    /// Returns the receiver for control-mode responses (unbounded; every
    /// response to a command-mode request must be observed).
    pub fn take_control_receiver(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.control_rx.lock().take()
    }

    /// Spawns the receive task that decodes inbound frames, verifies
    /// their MAC, ACKs reliable packets, and fans decoded application
    /// packets out to the display or control channel by service id.
    pub fn spawn_receive_task(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            loop {
                let bytes = tokio::select! {
                    () = cancel.cancelled() => return,
                    result = this.shared.transport.receive() => result,
                };
                let bytes = match bytes {
                    Ok(b) => b,
                    Err(err) => {
                        warn!(?err, "transport receive failed, ending receive task");
                        this.set_connection_state(ConnectionState::Disconnected);
                        return;
                    }
                };
                let frames = match codec.feed(&bytes) {
                    Ok(f) => f,
                    Err(err) => {
                        warn!(?err, "frame decode error, ending receive task");
                        this.set_connection_state(ConnectionState::Disconnected);
                        return;
                    }
                };
                for frame in frames {
                    this.handle_inbound_frame(&frame).await;
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn handle_inbound_frame(self: &Arc<Self>, frame: &[u8]) {
        let packet = match TransportPacket::decode(frame) {
            Ok(p) => p,
            Err(err) => {
                warn!(?err, "malformed transport packet");
                return;
            }
        };
        if packet.command_id == CommandId::ErrorResponse {
            let code = packet.payload.first().copied().unwrap_or(0);
            self.fail_session(Error::ProtocolError { code });
            return;
        }
        if !packet.command_id.is_pre_key() && packet.command_id != CommandId::KeyResponse {
            if let Some(cipher) = self.cipher() {
                if !packet.verify_mac(&cipher) {
                    self.fail_session(Error::Unauthenticated);
                    return;
                }
            }
        }
        if packet.reliability_bit {
            self.send_ack(&packet).await;
        }
        if packet.command_id == CommandId::AckResponse {
            // §4.5 step 3: ACK_RESPONSE is consumed here, never forwarded.
            // Otherwise a stray ACK provoked by a reliable send could be
            // picked up by a flow's single non-looping `raw.recv()` in
            // place of the reply it's actually waiting for.
            return;
        }
        if packet.command_id != CommandId::Data {
            // Pre-application-layer handshake packets (pairing, key
            // exchange, identification, connect/disconnect replies) go to
            // the raw channel the pairing and connect flows await on.
            if let Some(tx) = self.raw_tx.lock().as_ref() {
                let _ = tx.send(packet);
            }
            return;
        }
        let Ok(app) = AppPacket::decode(&packet.payload) else {
            warn!("dropping undecodable application packet");
            return;
        };
        if app.command == AppCommand::CtrlServiceError {
            self.fail_session(Error::ServiceError);
            return;
        }
        let inbound = Inbound { packet: app };
        let is_rt = matches!(
            inbound.packet.command,
            AppCommand::RtButtonStatus | AppCommand::RtDisplay | AppCommand::RtKeepAlive
        );
        if is_rt {
            // Bounded: a lagging consumer drops stale RT frames rather
            // than building an unbounded backlog.
            if let Some(tx) = self.display_tx.lock().as_ref() {
                let _ = tx.try_send(inbound);
            }
        } else if let Some(tx) = self.control_tx.lock().as_ref() {
            let _ = tx.send(inbound);
        }
    }

    async fn send_ack(&self, packet: &TransportPacket) {
        let mut ack = TransportPacket::new(
            CommandId::AckResponse,
            packet.address,
            Nonce::from_bytes(packet.nonce),
            Vec::new(),
        );
        if let Some(cipher) = self.cipher() {
            ack.authenticate(&cipher);
        }
        let framed = FrameCodec::encode(&ack.encode(true, true));
        if let Err(err) = self.shared.transport.send(&framed).await {
            warn!(?err, "failed to send ACK");
        }
    }

    /// Spawns the RT keep-alive task: sends `RT_KEEP_ALIVE` on
    /// `config.rt_keep_alive_interval` for as long as the connection
    /// remains in an RT-mode state.
    pub fn spawn_keep_alive_task(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.rt_keep_alive_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if this.connection_state() != ConnectionState::ConnectedRt {
                    continue;
                }
                let packet = AppPacket::new(AppCommand::RtKeepAlive, Vec::new());
                if let Err(err) = this.send_app(packet).await {
                    warn!(?err, "RT keep-alive send failed");
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Cancels and aborts every background task owned by this session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

/// A one-shot acknowledgement future used by callers awaiting a specific
/// reliable send's ACK. Not wired to the receive task directly since the
/// Combo protocol ACKs are positional (next inbound `ACK_RESPONSE`), kept
/// here for the pairing and command-mode flows to construct explicitly.
#[derive(Debug)]
pub struct AckWaiter(oneshot::Receiver<()>);

impl AckWaiter {
    /// Creates a waiter and its paired sender.
    #[must_use]
    pub fn pair() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    /// Waits for the ACK, or returns an error if the sender was dropped
    /// (the session closed before the ACK arrived).
    pub async fn wait(self) -> Result<()> {
        self.0
            .await
            .map_err(|_| Error::SessionClosed("ACK never arrived".into()))
    }
}
