//! High-level pump operations built on top of the RT menu navigator and
//! command-mode request/response pairs (§4.10).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::instrument;

use crate::app::{AppCommand, AppPacket, RtButton};
use crate::command_mode::{encode_deliver_bolus, BolusState, BolusStatus};
use crate::connect::{ConnectFlow, Mode};
use crate::error::{Error, Result};
use crate::menu::MenuNavigator;
use crate::screen::{ParsedScreen, ScreenKind, ScreenParser};
use crate::session::{Inbound, SessionEngine};

/// Number of basal rate factors in a full day's profile.
pub const BASAL_PROFILE_HOURS: usize = 24;

/// Valid TBR percent range, inclusive, in steps of 10 (§4.10).
const TBR_PERCENT_RANGE: (u16, u16) = (0, 500);
/// Valid TBR duration range, inclusive, in minutes, in steps of 15. Only
/// meaningful when the percent is not 100 (a 100% TBR has no duration).
/// The upper bound is not given by the protocol description; 24h is used
/// as a sanity bound (see `DESIGN.md`).
const TBR_DURATION_RANGE: (u16, u16) = (15, 1440);

/// High-level pump operations. Wraps a [`MenuNavigator`] for RT-mode
/// screen work and talks command-mode request/response pairs directly
/// over the session for everything else.
pub struct HighLevelOps<P> {
    session: Arc<SessionEngine>,
    navigator: MenuNavigator<P>,
    connect: Arc<ConnectFlow>,
    /// The percent of the most recently programmed TBR, used to detect
    /// the non-100% → 100% transition that provokes a W6 warning.
    previous_tbr_percent: Option<u16>,
}

impl<P: ScreenParser> HighLevelOps<P> {
    /// Wraps a session, navigator, and connect flow. All three must refer
    /// to the same session.
    #[must_use]
    pub const fn new(
        session: Arc<SessionEngine>,
        navigator: MenuNavigator<P>,
        connect: Arc<ConnectFlow>,
    ) -> Self {
        Self {
            session,
            navigator,
            connect,
            previous_tbr_percent: None,
        }
    }

    /// Programs all 24 hourly basal rate factors, in 0.01 U/h units.
    ///
    /// # Errors
    ///
    /// Returns an error if navigation fails, or
    /// [`Error::InvalidPayload`] if `factors` is not exactly
    /// [`BASAL_PROFILE_HOURS`] long.
    #[instrument(skip(self, factors))]
    pub async fn set_basal_profile(&mut self, profile: u8, factors: &[u16]) -> Result<()> {
        if factors.len() != BASAL_PROFILE_HOURS {
            return Err(Error::InvalidPayload("basal profile needs exactly 24 hourly factors"));
        }

        self.connect.switch_mode(Mode::Rt).await?;
        self.navigator
            .navigate_to_rt_screen(ScreenKind::BasalRateProgrammingMenu)
            .await?;
        self.navigator
            .adjust_quantity_on_screen(u16::from(profile), None, |screen| match screen {
                ParsedScreen::BasalRateProgrammingMenu { profile } => Some(u16::from(*profile)),
                _ => None,
            })
            .await?;
        self.navigator.press(RtButton::CHECK).await?;
        self.navigator
            .wait_until_screen_appears(ScreenKind::BasalRateFactorSetting)
            .await?;

        let last_hour = factors.len() - 1;
        for (hour, &factor) in factors.iter().enumerate() {
            self.navigator
                .adjust_quantity_on_screen(factor, None, |screen| match screen {
                    ParsedScreen::BasalRateFactorSetting { factor, .. } => *factor,
                    _ => None,
                })
                .await?;
            if hour != last_hour {
                self.navigator
                    .cycle_to_rt_screen(RtButton::MENU, ScreenKind::BasalRateFactorSetting)
                    .await?;
            }
        }

        self.navigator.press(RtButton::CHECK).await?;
        self.navigator.press(RtButton::CHECK).await?;
        self.navigator
            .wait_until_screen_appears(ScreenKind::Main)
            .await?;
        Ok(())
    }

    /// Starts a temporary basal rate at `percent`% of the active profile.
    /// `duration_minutes` is required (and validated) whenever `percent`
    /// is not 100; a 100% TBR cancels any active one and has no duration
    /// screen to set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if `percent` or
    /// `duration_minutes` is outside the pump's accepted range, or an
    /// error if navigation fails.
    #[instrument(skip(self))]
    pub async fn set_tbr(&mut self, percent: u16, duration_minutes: u16) -> Result<()> {
        if percent < TBR_PERCENT_RANGE.0 || percent > TBR_PERCENT_RANGE.1 || percent % 10 != 0 {
            return Err(Error::InvalidPayload("TBR percent must be 0-500 in steps of 10"));
        }
        if percent != 100
            && (duration_minutes < TBR_DURATION_RANGE.0
                || duration_minutes > TBR_DURATION_RANGE.1
                || duration_minutes % 15 != 0)
        {
            return Err(Error::InvalidPayload(
                "TBR duration must be 15-1440 minutes in steps of 15",
            ));
        }

        self.navigator
            .navigate_to_rt_screen(ScreenKind::TemporaryBasalRateMenu)
            .await?;
        self.navigator
            .adjust_quantity_on_screen(percent, None, |screen| match screen {
                ParsedScreen::TemporaryBasalRatePercentage { percent } => *percent,
                _ => None,
            })
            .await?;
        if percent != 100 {
            self.navigator
                .adjust_quantity_on_screen(duration_minutes, None, |screen| match screen {
                    ParsedScreen::TemporaryBasalRateDuration { minutes } => *minutes,
                    _ => None,
                })
                .await?;
        }
        self.navigator.press(RtButton::CHECK).await?;

        let cancelling_active_tbr = self.previous_tbr_percent.is_some_and(|p| p != 100) && percent == 100;
        if cancelling_active_tbr {
            self.navigator.dismiss_alert_if_shown().await?;
        }
        self.previous_tbr_percent = Some(percent);
        Ok(())
    }

    /// Reads the quickinfo screen (remaining reservoir units, active
    /// basal rate).
    ///
    /// # Errors
    ///
    /// Returns an error if the screen cannot be reached.
    #[instrument(skip(self))]
    pub async fn read_quickinfo(&mut self) -> Result<ParsedScreen> {
        self.navigator
            .navigate_to_rt_screen(ScreenKind::Quickinfo)
            .await
    }

    /// Delivers a standard bolus of `amount` 0.1 IU units through
    /// command mode, polling `CMD_BOLUS_STATUS` every `poll_interval`
    /// until the pump reports a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BolusNotDelivered`],
    /// [`Error::BolusCancelledByUser`], or
    /// [`Error::BolusAbortedDueToError`] matching the pump's outcome.
    #[instrument(skip(self))]
    pub async fn deliver_bolus(&mut self, amount: u32, poll_interval: Duration) -> Result<()> {
        let mut rx = self
            .session
            .take_control_receiver()
            .ok_or_else(|| Error::SessionClosed("control receiver already taken".into()))?;

        self.session
            .send_app(AppPacket::new(
                AppCommand::CmdDeliverBolus,
                encode_deliver_bolus(amount),
            ))
            .await?;
        let accepted = self.await_response(&mut rx, AppCommand::CmdDeliverBolusResponse).await?;
        if accepted.packet.payload.first() == Some(&0) {
            return Err(Error::BolusNotDelivered);
        }

        let poll = async {
            loop {
                sleep(poll_interval).await;
                self.session
                    .send_app(AppPacket::new(AppCommand::CmdBolusStatus, Vec::new()))
                    .await?;
                let response = self
                    .await_response(&mut rx, AppCommand::CmdBolusStatusResponse)
                    .await?;
                let status = BolusStatus::decode(&response.packet.payload)?;
                let delivered = status.delivered(amount);
                match status.state {
                    BolusState::Active => continue,
                    BolusState::Delivered => return Ok(()),
                    BolusState::CancelledByUser => {
                        return Err(Error::BolusCancelledByUser {
                            delivered,
                            requested: amount,
                        })
                    }
                    BolusState::AbortedDueToError => {
                        return Err(Error::BolusAbortedDueToError {
                            delivered,
                            requested: amount,
                        })
                    }
                }
            }
        };

        let result = poll.await;
        // A transport/session error abandons polling with the bolus still
        // in flight; best-effort tell the pump to stop it rather than
        // leave an unattended delivery running. The pump's own terminal
        // states (delivered/cancelled/aborted) need no further action.
        let abandoned_in_flight = matches!(
            result,
            Err(ref err)
                if !matches!(
                    err,
                    Error::BolusCancelledByUser { .. } | Error::BolusAbortedDueToError { .. }
                )
        );
        if abandoned_in_flight {
            let _ = self
                .session
                .send_app(AppPacket::new(AppCommand::CmdCancelBolus, Vec::new()))
                .await;
        }
        result
    }

    async fn await_response(
        &self,
        rx: &mut mpsc::UnboundedReceiver<Inbound>,
        expected: AppCommand,
    ) -> Result<Inbound> {
        loop {
            let inbound = rx.recv().await.ok_or_else(|| {
                self.session
                    .session_error()
                    .unwrap_or_else(|| Error::SessionClosed("control channel closed".into()))
            })?;
            if inbound.packet.command == expected {
                return Ok(inbound);
            }
        }
    }
}
