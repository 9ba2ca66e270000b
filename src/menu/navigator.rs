//! Drives the pump's RT menu by pressing buttons and watching parsed
//! screens go by (§4.9).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::app::{AppCommand, DisplayFrame, RtButton, RtDisplay};
use crate::error::{Error, Result};
use crate::menu::graph::MenuGraph;
use crate::rt_button::RtButtonDriver;
use crate::screen::{screen_type_eq, DedupingScreenStream, ParsedScreen, ScreenKind, ScreenParser};
use crate::session::{Inbound, SessionEngine};

/// Navigates the RT menu using a [`MenuGraph`] for routing, an
/// [`RtButtonDriver`] for input, and a [`ScreenParser`] for reading the
/// assembled display back.
pub struct MenuNavigator<P> {
    display_rx: mpsc::Receiver<Inbound>,
    buttons: RtButtonDriver,
    stream: DedupingScreenStream<P>,
    graph: MenuGraph,
    frame: DisplayFrame,
    max_cycle_attempts: u32,
}

impl<P: ScreenParser> MenuNavigator<P> {
    /// Creates a navigator, taking ownership of `session`'s display
    /// channel. `buttons` must drive the same session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session's display receiver has already
    /// been taken by another consumer.
    pub fn new(
        session: &SessionEngine,
        buttons: RtButtonDriver,
        parser: P,
        max_cycle_attempts: u32,
    ) -> Result<Self> {
        let display_rx = session
            .take_display_receiver()
            .ok_or_else(|| Error::SessionClosed("display receiver already taken".into()))?;
        Ok(Self {
            display_rx,
            buttons,
            stream: DedupingScreenStream::new(parser),
            graph: MenuGraph::standard(),
            frame: DisplayFrame::new(),
            max_cycle_attempts,
        })
    }

    /// Presses `button` for a short press.
    ///
    /// # Errors
    ///
    /// Returns an error if sending either the press or the release fails.
    pub async fn press(&mut self, button: RtButton) -> Result<()> {
        self.buttons.press_short(button).await
    }

    /// Reads RT_DISPLAY packets, assembling and de-duplicating complete
    /// screens, until one differs from the last screen returned (or the
    /// channel closes). The RT display resends the same frame on every
    /// cycle even when nothing changed, so consecutive equal screens never
    /// reach callers (§4.9).
    async fn next_screen(&mut self) -> Option<ParsedScreen> {
        loop {
            let inbound = self.display_rx.recv().await?;
            if inbound.packet.command != AppCommand::RtDisplay {
                continue;
            }
            let Ok(display) = RtDisplay::decode(&inbound.packet.payload) else {
                warn!("dropping undecodable RT_DISPLAY payload");
                continue;
            };
            self.frame.apply_band(&display);
            if let Some(screen) = self.stream.feed(&self.frame) {
                return Some(screen);
            }
        }
    }

    /// Reads the next screen (bypassing the alert-screen abort in
    /// [`Self::next_screen_checked`]) and dismisses it with CHECK if it is
    /// an alert. Used where the pump is expected to show a transient
    /// warning that the caller should clear rather than abort on, such as
    /// the W6 warning shown when cancelling an active temporary basal
    /// rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the display channel closes or the dismissal
    /// press fails.
    pub async fn dismiss_alert_if_shown(&mut self) -> Result<()> {
        let screen = self.next_screen().await.ok_or_else(|| {
            self.buttons
                .session_error()
                .unwrap_or_else(|| Error::SessionClosed("display channel closed".into()))
        })?;
        if matches!(screen, ParsedScreen::AlertScreen { .. }) {
            self.press(RtButton::CHECK).await?;
        }
        Ok(())
    }

    /// Reads the next screen and raises [`Error::AlertScreen`] if it is
    /// one, leaving the caller's current operation to abort while the
    /// session stays open.
    async fn next_screen_checked(&mut self) -> Result<ParsedScreen> {
        let screen = match self.next_screen().await {
            Some(screen) => screen,
            None => {
                return Err(self
                    .buttons
                    .session_error()
                    .unwrap_or_else(|| Error::SessionClosed("display channel closed".into())))
            }
        };
        if let ParsedScreen::AlertScreen { content } = &screen {
            return Err(Error::AlertScreen {
                contents: content.clone(),
            });
        }
        Ok(screen)
    }

    /// Waits for a screen of kind `target` to appear, up to
    /// `max_cycle_attempts` distinct screen updates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouldNotFindScreen`] if the budget is exhausted
    /// first.
    #[instrument(skip(self))]
    pub async fn wait_until_screen_appears(&mut self, target: ScreenKind) -> Result<ParsedScreen> {
        for _ in 0..self.max_cycle_attempts {
            let screen = self.next_screen_checked().await?;
            if screen.kind() == target {
                return Ok(screen);
            }
        }
        Err(Error::CouldNotFindScreen { target })
    }

    /// Presses `button` repeatedly, checking after each press whether a
    /// screen of kind `target` is now showing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouldNotFindScreen`] if `target` never appears
    /// within `max_cycle_attempts` presses.
    #[instrument(skip(self))]
    pub async fn cycle_to_rt_screen(
        &mut self,
        button: RtButton,
        target: ScreenKind,
    ) -> Result<ParsedScreen> {
        for _ in 0..self.max_cycle_attempts {
            self.buttons.press_short(button).await?;
            let screen = self.next_screen_checked().await?;
            if screen.kind() == target {
                return Ok(screen);
            }
        }
        Err(Error::CouldNotFindScreen { target })
    }

    /// Navigates from whatever screen is currently showing to `target`,
    /// following the shortest path in the menu graph. If an unrecognized
    /// screen is encountered mid-path, presses BACK to recover.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CouldNotFindScreen`] if `target` is unreachable
    /// from the current screen, or [`Error::CouldNotRecognizeAnyScreen`]
    /// if recovery from an unrecognized screen fails.
    #[instrument(skip(self))]
    pub async fn navigate_to_rt_screen(&mut self, target: ScreenKind) -> Result<ParsedScreen> {
        let current = self.next_screen_checked().await?;

        let path = self
            .graph
            .shortest_path(current.kind(), target)
            .ok_or(Error::CouldNotFindScreen { target })?;
        debug!(steps = path.len(), "navigating to target screen");

        let mut last = current;
        for button in path {
            self.buttons.press_short(button).await?;
            last = self.recover_or_advance().await?;
            if screen_type_eq(&last, &ParsedScreen::Unrecognized) {
                return Err(Error::CouldNotRecognizeAnyScreen);
            }
        }
        if last.kind() != target {
            return Err(Error::CouldNotFindScreen { target });
        }
        Ok(last)
    }

    async fn recover_or_advance(&mut self) -> Result<ParsedScreen> {
        for attempt in 0..self.max_cycle_attempts {
            let screen = self.next_screen_checked().await?;
            if screen.kind() != ScreenKind::Unrecognized {
                return Ok(screen);
            }
            debug!(attempt, "unrecognized screen, pressing BACK to recover");
            self.buttons.press_short(RtButton::BACK).await?;
        }
        Err(Error::CouldNotRecognizeAnyScreen)
    }

    /// Adjusts a numeric value shown on the current screen toward
    /// `target_value`: first a long press toward the target (permitting
    /// overshoot) until the readout stabilizes, then individual UP/DOWN
    /// presses to correct whatever the long press left off by, reading the
    /// value back with `extract` after each step.
    ///
    /// `range` bounds a cyclic value (e.g. hour-of-day): when non-`None`,
    /// the shorter arc around the wraparound is preferred over a direct
    /// walk. Overshoot past `target_value` is corrected by the next
    /// iteration picking the opposite direction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the value never settles on
    /// `target_value` within `max_cycle_attempts` corrective presses, or
    /// if the screen does not carry an adjustable value at all.
    #[instrument(skip(self, extract))]
    pub async fn adjust_quantity_on_screen(
        &mut self,
        target_value: u16,
        range: Option<(u16, u16)>,
        extract: impl Fn(&ParsedScreen) -> Option<u16>,
    ) -> Result<ParsedScreen> {
        let mut current = self.next_screen_checked().await?;
        let Some(value) = extract(&current) else {
            return Err(Error::InvalidPayload("screen does not carry an adjustable value"));
        };

        if value != target_value {
            let button = direction(value, target_value, range);
            if let Some(settled) = self.long_press_until_stable(button, &extract).await? {
                current = settled;
            }
        }

        for _ in 0..self.max_cycle_attempts {
            let Some(value) = extract(&current) else {
                return Err(Error::InvalidPayload("screen does not carry an adjustable value"));
            };
            if value == target_value {
                return Ok(current);
            }
            let button = direction(value, target_value, range);
            self.buttons.press_short(button).await?;
            current = self.next_screen_checked().await?;
        }
        Err(Error::InvalidPayload("value did not converge within the attempt budget"))
    }

    /// Holds `button` down, permitting the value to overshoot, until two
    /// consecutive screen samples agree (the pump has stopped
    /// auto-incrementing and is just re-displaying the held value), or
    /// `max_cycle_attempts` ticks pass without the readout settling.
    ///
    /// Returns the last screen observed while holding, or `None` if no
    /// display update arrived at all.
    async fn long_press_until_stable(
        &mut self,
        button: RtButton,
        extract: &impl Fn(&ParsedScreen) -> Option<u16>,
    ) -> Result<Option<ParsedScreen>> {
        let max_attempts = self.max_cycle_attempts;
        let mut ticks = 0u32;
        let mut last_sample: Option<u16> = None;
        let mut settled = None;

        let Self {
            buttons,
            display_rx,
            stream,
            frame,
            ..
        } = self;
        buttons
            .press_long(button, || {
                ticks += 1;
                while let Ok(inbound) = display_rx.try_recv() {
                    if inbound.packet.command != AppCommand::RtDisplay {
                        continue;
                    }
                    let Ok(display) = RtDisplay::decode(&inbound.packet.payload) else {
                        continue;
                    };
                    frame.apply_band(&display);
                    if let Some(screen) = stream.feed(&*frame) {
                        let sample = extract(&screen);
                        let stabilized = sample.is_some() && sample == last_sample;
                        last_sample = sample;
                        settled = Some(screen);
                        if stabilized {
                            return false;
                        }
                    }
                }
                ticks < max_attempts
            })
            .await?;
        Ok(settled)
    }
}

/// Picks UP or DOWN to move `value` toward `target` by the shortest arc.
/// With no cyclic range, this is just "increase if below, decrease if
/// above".
fn direction(value: u16, target: u16, range: Option<(u16, u16)>) -> RtButton {
    match range {
        None => {
            if target > value {
                RtButton::UP
            } else {
                RtButton::DOWN
            }
        }
        Some((min, max)) => {
            let span = max - min + 1;
            let up_distance = if target >= value {
                target - value
            } else {
                span - (value - target)
            };
            let down_distance = span - up_distance;
            if up_distance <= down_distance {
                RtButton::UP
            } else {
                RtButton::DOWN
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_picks_shortest_arc_across_wraparound() {
        // Range 0..=23 (hour of day); at 22 moving to 1 is shorter via UP
        // (wrap) than DOWN.
        assert_eq!(direction(22, 1, Some((0, 23))), RtButton::UP);
    }

    #[test]
    fn direction_without_range_is_monotonic() {
        assert_eq!(direction(5, 10, None), RtButton::UP);
        assert_eq!(direction(10, 5, None), RtButton::DOWN);
    }
}
