//! Regular (post-pairing) connect, mode switch, and disconnect flows
//! (§4.7).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::app::{AppCommand, AppPacket, ServiceId};
use crate::error::{Error, Result};
use crate::session::{ConnectionState, Inbound, SessionEngine};
use crate::transport::{CommandId, TransportPacket};

/// Which application-layer service a connection should end up bound to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Rt,
    Command,
}

impl Mode {
    const fn service_id(self) -> ServiceId {
        match self {
            Self::Rt => ServiceId::RtMode,
            Self::Command => ServiceId::CommandMode,
        }
    }
}

/// Drives the transport-level reconnection handshake and the app-layer
/// service activation that follows it.
pub struct ConnectFlow {
    session: Arc<SessionEngine>,
    /// Holds the control-channel receiver between calls: `connect`,
    /// `switch_mode`, and `activate` all need to await control-channel
    /// responses, so the receiver is taken from the session once and kept
    /// here rather than re-taken (and failing) on every call.
    control: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl ConnectFlow {
    /// Wraps a session engine that already has pairing data installed.
    #[must_use]
    pub const fn new(session: Arc<SessionEngine>) -> Self {
        Self {
            session,
            control: Mutex::new(None),
        }
    }

    fn take_or_fetch_control(&self) -> Result<mpsc::UnboundedReceiver<Inbound>> {
        if let Some(rx) = self.control.lock().take() {
            return Ok(rx);
        }
        self.session
            .take_control_receiver()
            .ok_or_else(|| Error::SessionClosed("control receiver already taken".into()))
    }

    /// Reconnects to an already-paired pump and activates `mode`'s
    /// service. Loads the pairing keys and nonce from the session's
    /// store before reconnecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store has no state for this device, the
    /// transport fails, the pump rejects the regular connection request,
    /// or either control-layer handshake (`CTRL_CONNECT`,
    /// `CTRL_ACTIVATE_SERVICE`) fails.
    #[instrument(skip(self))]
    pub async fn connect(&self, mode: Mode) -> Result<()> {
        self.session.set_connection_state(ConnectionState::Connecting);
        let state = self.session.load_state().await?;
        self.session.install_pairing_data(&state);

        let mut raw = self
            .session
            .take_raw_receiver()
            .ok_or_else(|| Error::SessionClosed("raw receiver already taken".into()))?;
        let mut control = self.take_or_fetch_control()?;

        let result = self.connect_inner(&mut raw, &mut control, mode).await;
        *self.control.lock() = Some(control);
        result
    }

    async fn connect_inner(
        &self,
        raw: &mut mpsc::UnboundedReceiver<TransportPacket>,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
        mode: Mode,
    ) -> Result<()> {
        self.session
            .send_transport(CommandId::RequestRegularConnection, vec![])
            .await?;
        let reply = raw.recv().await.ok_or_else(|| {
            self.session
                .session_error()
                .unwrap_or_else(|| Error::SessionClosed("transport closed during connect".into()))
        })?;
        if reply.command_id != CommandId::RegularConnectionRequestAccepted {
            self.session
                .set_connection_state(ConnectionState::Disconnected);
            return Err(Error::IncorrectPacket);
        }

        self.session
            .send_app(AppPacket::new(AppCommand::CtrlConnect, Vec::new()))
            .await?;
        self.await_response(control, AppCommand::CtrlConnectResponse)
            .await?;

        self.activate(mode, control).await?;
        info!(?mode, "connected");
        Ok(())
    }

    /// Switches an already-connected session between RT mode and
    /// command mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the pump reports a
    /// service error while switching.
    #[instrument(skip(self))]
    pub async fn switch_mode(&self, mode: Mode) -> Result<()> {
        if !self.session.connection_state().is_connected() {
            return Err(Error::SessionClosed(
                "switch_mode called while not connected".into(),
            ));
        }
        let mut control = self.take_or_fetch_control()?;
        let result = self.switch_mode_inner(&mut control, mode).await;
        *self.control.lock() = Some(control);
        result
    }

    async fn switch_mode_inner(
        &self,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
        mode: Mode,
    ) -> Result<()> {
        self.session
            .send_app(AppPacket::new(AppCommand::CtrlDeactivateAllServices, vec![]))
            .await?;
        self.activate(mode, control).await
    }

    /// Sends `CTRL_ACTIVATE_SERVICE` for `mode`'s service id and awaits
    /// its response before marking the connection state.
    async fn activate(
        &self,
        mode: Mode,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<()> {
        self.session
            .send_app(AppPacket::new(
                AppCommand::CtrlActivateService,
                vec![mode.service_id() as u8, 1, 0],
            ))
            .await?;
        self.await_response(control, AppCommand::CtrlActivateServiceResponse)
            .await?;
        self.session.set_connection_state(match mode {
            Mode::Rt => ConnectionState::ConnectedRt,
            Mode::Command => ConnectionState::ConnectedCommand,
        });
        Ok(())
    }

    async fn await_response(
        &self,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
        expected: AppCommand,
    ) -> Result<()> {
        loop {
            let inbound = control.recv().await.ok_or_else(|| {
                self.session.session_error().unwrap_or_else(|| {
                    Error::SessionClosed("control channel closed during connect".into())
                })
            })?;
            if inbound.packet.command == expected {
                return Ok(());
            }
        }
    }

    /// Disconnects cleanly: deactivates the active service, sends
    /// `CTRL_DISCONNECT`, then tears down the session's background tasks
    /// (keep-alive included). A failure deactivating the service does not
    /// stop the disconnect from proceeding; the pump is about to drop the
    /// connection either way.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.session
            .set_connection_state(ConnectionState::Disconnecting);
        let _ = self
            .session
            .send_app(AppPacket::new(AppCommand::CtrlDeactivateAllServices, vec![]))
            .await;
        let result = self
            .session
            .send_app(AppPacket::new(AppCommand::CtrlDisconnect, vec![]))
            .await;
        self.session.shutdown();
        self.session
            .set_connection_state(ConnectionState::PairedDisconnected);
        result
    }
}
