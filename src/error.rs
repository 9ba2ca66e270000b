//! Error kinds from §7, collected into a single flat enum.

use crate::screen::ScreenKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a session or a high-level operation can fail.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed frame bytes on the RFCOMM stream. Session-fatal.
    #[error("malformed frame on the wire")]
    Framing,

    /// Unknown transport or application command identifier. Session-fatal.
    #[error("unknown command id {0:#x}")]
    InvalidCommandId(u16),

    /// Payload size or content violates the command's contract.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// MAC verification failed. Session-fatal except on `KEY_RESPONSE`,
    /// where the pairing flow recovers by re-prompting for the PIN.
    #[error("packet authentication failed")]
    Unauthenticated,

    /// The pump sent `ERROR_RESPONSE`. Session-fatal.
    #[error("pump protocol error, code {code:#x}")]
    ProtocolError {
        /// 1-byte error code carried by `ERROR_RESPONSE`.
        code: u8,
    },

    /// `CTRL_SERVICE_ERROR` was received. Session-fatal.
    #[error("service error reported by pump")]
    ServiceError,

    /// Received a command different from the one expected at the current
    /// protocol state. Session-fatal.
    #[error("unexpected command at this state")]
    IncorrectPacket,

    /// The `BluetoothTransport` collaborator failed.
    #[error("bluetooth transport error: {0}")]
    Bluetooth(String),

    /// The `PumpStateStore` collaborator failed.
    #[error("persistent state store error: {0}")]
    Storage(String),

    /// The pump is showing a warning/error screen; the caller must dismiss
    /// it (pressing CHECK) and retry. The session remains open.
    #[error("pump is showing an alert screen: {contents}")]
    AlertScreen {
        /// Human-readable alert contents, as produced by the screen parser.
        contents: String,
    },

    /// `cycle_to_rt_screen`/`navigate_to_rt_screen` exceeded
    /// `max_cycle_attempts` while looking for a specific screen.
    #[error("could not find screen {target:?} within the attempt budget")]
    CouldNotFindScreen {
        /// The screen kind that was being searched for.
        target: ScreenKind,
    },

    /// `navigate_to_rt_screen` could not recognize any screen while
    /// pressing BACK to recover from an unrecognized one.
    #[error("could not recognize any screen while recovering navigation")]
    CouldNotRecognizeAnyScreen,

    /// The pump refused to start a bolus (e.g. because it is stopped).
    #[error("bolus was not delivered")]
    BolusNotDelivered,

    /// The user cancelled an in-progress bolus from the pump itself.
    #[error("bolus was cancelled by the user, {delivered} of {requested} 0.1 IU delivered")]
    BolusCancelledByUser {
        /// Amount delivered before cancellation, in 0.1 IU units.
        delivered: u32,
        /// Amount that had been requested, in 0.1 IU units.
        requested: u32,
    },

    /// The pump aborted an in-progress bolus due to an internal error.
    #[error("bolus was aborted due to a pump error, {delivered} of {requested} 0.1 IU delivered")]
    BolusAbortedDueToError {
        /// Amount delivered before the abort, in 0.1 IU units.
        delivered: u32,
        /// Amount that had been requested, in 0.1 IU units.
        requested: u32,
    },

    /// The session is no longer usable; reconnect before issuing further
    /// requests.
    #[error("session is closed: {0}")]
    SessionClosed(String),
}

impl Error {
    /// Returns whether this error requires the caller to disconnect and
    /// reconnect before issuing further requests (§7 propagation policy).
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing
                | Self::InvalidCommandId(_)
                | Self::InvalidPayload(_)
                | Self::Unauthenticated
                | Self::ProtocolError { .. }
                | Self::ServiceError
                | Self::IncorrectPacket
                | Self::Bluetooth(_)
                | Self::SessionClosed(_)
        )
    }
}
