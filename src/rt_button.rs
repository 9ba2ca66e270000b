//! Simulated RT-mode button presses (§4.8): short presses, held long
//! presses driven by a caller-supplied predicate, and the guarantee that
//! every press is followed by a release even if the driver errors or is
//! cancelled midway.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::instrument;

use crate::app::{AppCommand, AppPacket, RtButton, RtButtonStatus};
use crate::error::{Error, Result};
use crate::session::SessionEngine;

/// Drives `RT_BUTTON_STATUS` packets for one session. Must not be shared
/// across concurrent callers: only one button may be "down" at a time,
/// enforced by requiring `&mut self` on both press methods.
pub struct RtButtonDriver {
    session: Arc<SessionEngine>,
    sequence: Mutex<u16>,
    long_press_tick: Duration,
    short_press_hold: Duration,
}

impl RtButtonDriver {
    /// Creates a driver for `session`, reading its tick durations from
    /// the session's configured [`crate::session::SessionConfig`].
    #[must_use]
    pub fn new(
        session: Arc<SessionEngine>,
        long_press_tick: Duration,
        short_press_hold: Duration,
    ) -> Self {
        Self {
            session,
            sequence: Mutex::new(0),
            long_press_tick,
            short_press_hold,
        }
    }

    /// Returns the session's recorded failure cause, if it has one.
    pub(crate) fn session_error(&self) -> Option<Error> {
        self.session.session_error()
    }

    fn next_sequence(&self) -> u16 {
        let mut seq = self.sequence.lock();
        let current = *seq;
        *seq = seq.wrapping_add(1);
        current
    }

    async fn send_status(&self, button: RtButton, changed: bool) -> Result<()> {
        let status = RtButtonStatus {
            rt_sequence: self.next_sequence(),
            button,
            changed,
        };
        self.session
            .send_app(AppPacket::new(AppCommand::RtButtonStatus, status.encode()))
            .await
    }

    /// Presses `button` for the configured short-press hold duration,
    /// then releases it. Both the press and the release report
    /// `changed = true`: the button code differs from what preceded each.
    ///
    /// # Errors
    ///
    /// Returns the press error if sending the press failed; the release
    /// is still attempted regardless, and its error takes precedence
    /// only if the press itself succeeded.
    #[instrument(skip(self))]
    pub async fn press_short(&mut self, button: RtButton) -> Result<()> {
        let press_result = self.send_status(button, true).await;
        sleep(self.short_press_hold).await;
        let release_result = self.send_status(RtButton::NO_BUTTON, true).await;
        press_result.and(release_result)
    }

    /// Holds `button` down, re-sending its status every `long_press_tick`,
    /// for as long as `keep_holding` returns `true`. Only the first
    /// status of the hold reports `changed = true`; repeats while still
    /// held report `changed = false`. Always sends a final `NO_BUTTON`
    /// release (`changed = true`), even if `keep_holding` or a send
    /// errors partway through.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered while holding; the release is
    /// still attempted and its error is only surfaced if holding itself
    /// never errored.
    #[instrument(skip(self, keep_holding))]
    pub async fn press_long<F>(&mut self, button: RtButton, mut keep_holding: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let hold_result = self.hold_loop(button, &mut keep_holding).await;
        let release_result = self.send_status(RtButton::NO_BUTTON, true).await;
        hold_result.and(release_result)
    }

    async fn hold_loop<F>(&self, button: RtButton, keep_holding: &mut F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        self.send_status(button, true).await?;
        while keep_holding() {
            sleep(self.long_press_tick).await;
            self.send_status(button, false).await?;
        }
        Ok(())
    }
}
