//! Application-layer service and command id table (§4.4).
//!
//! A handful of command ids (`RT_KEEP_ALIVE` and the command-mode
//! read/bolus commands, plus `CTRL_SERVICE_ERROR`) are not given literal
//! values in the protocol description; this module assigns them following
//! the same `0x90xx` request / `0xA0xx` response numbering the documented
//! `CONTROL` commands use, and the `0x05xx` family `RT_MODE` uses. See
//! `DESIGN.md` for the corresponding Open Question resolution.

use num_enum::TryFromPrimitive;

/// Application-layer service identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum ServiceId {
    Control = 0x00,
    RtMode = 0x48,
    CommandMode = 0xB7,
}

/// Every application command the driver sends or receives, with its
/// service id, 16-bit command id, and transport reliability bit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[non_exhaustive]
pub enum AppCommand {
    CtrlConnect,
    CtrlConnectResponse,
    CtrlGetServiceVersion,
    CtrlGetServiceVersionResponse,
    CtrlBind,
    CtrlBindResponse,
    CtrlDisconnect,
    CtrlActivateService,
    CtrlActivateServiceResponse,
    CtrlDeactivateAllServices,
    CtrlAllServicesDeactivated,
    CtrlServiceError,

    RtButtonStatus,
    RtDisplay,
    RtKeepAlive,

    CmdReadDateTime,
    CmdReadDateTimeResponse,
    CmdReadStatus,
    CmdReadStatusResponse,
    CmdReadErrorWarningStatus,
    CmdReadErrorWarningStatusResponse,
    CmdHistoryDelta,
    CmdHistoryDeltaResponse,
    CmdDeliverBolus,
    CmdDeliverBolusResponse,
    CmdCancelBolus,
    CmdCancelBolusResponse,
    CmdBolusStatus,
    CmdBolusStatusResponse,
}

impl AppCommand {
    /// Returns the command's service id.
    #[must_use]
    pub const fn service_id(self) -> ServiceId {
        use AppCommand::*;
        match self {
            CtrlConnect | CtrlConnectResponse | CtrlGetServiceVersion
            | CtrlGetServiceVersionResponse | CtrlBind | CtrlBindResponse | CtrlDisconnect
            | CtrlActivateService | CtrlActivateServiceResponse | CtrlDeactivateAllServices
            | CtrlAllServicesDeactivated | CtrlServiceError => ServiceId::Control,
            RtButtonStatus | RtDisplay | RtKeepAlive => ServiceId::RtMode,
            CmdReadDateTime
            | CmdReadDateTimeResponse
            | CmdReadStatus
            | CmdReadStatusResponse
            | CmdReadErrorWarningStatus
            | CmdReadErrorWarningStatusResponse
            | CmdHistoryDelta
            | CmdHistoryDeltaResponse
            | CmdDeliverBolus
            | CmdDeliverBolusResponse
            | CmdCancelBolus
            | CmdCancelBolusResponse
            | CmdBolusStatus
            | CmdBolusStatusResponse => ServiceId::CommandMode,
        }
    }

    /// Returns the command's 16-bit id.
    #[must_use]
    pub const fn command_id(self) -> u16 {
        use AppCommand::*;
        match self {
            CtrlConnect => 0x9055,
            CtrlConnectResponse => 0xA055,
            CtrlGetServiceVersion => 0x9065,
            CtrlGetServiceVersionResponse => 0xA065,
            CtrlBind => 0x9095,
            CtrlBindResponse => 0xA095,
            CtrlDisconnect => 0x005A,
            CtrlActivateService => 0x9066,
            CtrlActivateServiceResponse => 0xA066,
            CtrlDeactivateAllServices => 0x906A,
            CtrlAllServicesDeactivated => 0xA06A,
            CtrlServiceError => 0xA0AA,

            RtButtonStatus => 0x0565,
            RtDisplay => 0x0555,
            RtKeepAlive => 0x0515,

            CmdReadDateTime => 0x9100,
            CmdReadDateTimeResponse => 0xA100,
            CmdReadStatus => 0x9101,
            CmdReadStatusResponse => 0xA101,
            CmdReadErrorWarningStatus => 0x9102,
            CmdReadErrorWarningStatusResponse => 0xA102,
            CmdHistoryDelta => 0x9103,
            CmdHistoryDeltaResponse => 0xA103,
            CmdDeliverBolus => 0x9104,
            CmdDeliverBolusResponse => 0xA104,
            CmdCancelBolus => 0x9105,
            CmdCancelBolusResponse => 0xA105,
            CmdBolusStatus => 0x9106,
            CmdBolusStatusResponse => 0xA106,
        }
    }

    /// Returns whether the transport DATA packet carrying this command
    /// must set the reliability bit.
    #[must_use]
    pub const fn reliable(self) -> bool {
        !matches!(self, Self::RtButtonStatus | Self::RtDisplay | Self::RtKeepAlive)
    }

    /// Looks up the command for a given service id and 16-bit command id.
    #[must_use]
    pub fn from_ids(service_id: ServiceId, command_id: u16) -> Option<Self> {
        use AppCommand::*;
        [
            CtrlConnect,
            CtrlConnectResponse,
            CtrlGetServiceVersion,
            CtrlGetServiceVersionResponse,
            CtrlBind,
            CtrlBindResponse,
            CtrlDisconnect,
            CtrlActivateService,
            CtrlActivateServiceResponse,
            CtrlDeactivateAllServices,
            CtrlAllServicesDeactivated,
            CtrlServiceError,
            RtButtonStatus,
            RtDisplay,
            RtKeepAlive,
            CmdReadDateTime,
            CmdReadDateTimeResponse,
            CmdReadStatus,
            CmdReadStatusResponse,
            CmdReadErrorWarningStatus,
            CmdReadErrorWarningStatusResponse,
            CmdHistoryDelta,
            CmdHistoryDeltaResponse,
            CmdDeliverBolus,
            CmdDeliverBolusResponse,
            CmdCancelBolus,
            CmdCancelBolusResponse,
            CmdBolusStatus,
            CmdBolusStatusResponse,
        ]
        .into_iter()
        .find(|c| c.service_id() == service_id && c.command_id() == command_id)
    }
}
