//! Parsed RT screen model (§4.9): the menu navigator and high-level
//! operations reason about screens, not raw pixels. Turning a
//! [`crate::app::DisplayFrame`] into a [`ParsedScreen`] is inherently
//! pump-firmware-specific (effectively OCR over a fixed font), so it is
//! left behind the [`ScreenParser`] trait; production code supplies a
//! concrete parser, tests supply a fake that returns canned screens.

use std::fmt;

use crate::app::DisplayFrame;

/// A screen recognized on the pump's RT display, together with whatever
/// data the caller needs out of it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParsedScreen {
    Main,
    Quickinfo,
    AlertScreen {
        content: String,
    },
    StandardBolusMenu,
    TemporaryBasalRateMenu,
    TemporaryBasalRatePercentage {
        percent: Option<u16>,
    },
    TemporaryBasalRateDuration {
        minutes: Option<u16>,
    },
    BasalRateProgrammingMenu {
        profile: u8,
    },
    BasalRateTotal,
    BasalRateFactorSetting {
        begin_hour: u8,
        factor: Option<u16>,
    },
    MyDataMenu,
    MyDataBolusHistory,
    MyDataDailyTotals,
    TimeAndDateSettingsMenu,
    TimeAndDateSettingsTime,
    TimeAndDateSettingsDate,
    Unrecognized,
}

/// The tag of a [`ParsedScreen`], with no associated data. Used as graph
/// node identity in the menu map and as the `target` of
/// [`crate::error::Error::CouldNotFindScreen`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScreenKind {
    Main,
    Quickinfo,
    AlertScreen,
    StandardBolusMenu,
    TemporaryBasalRateMenu,
    TemporaryBasalRatePercentage,
    TemporaryBasalRateDuration,
    BasalRateProgrammingMenu,
    BasalRateTotal,
    BasalRateFactorSetting,
    MyDataMenu,
    MyDataBolusHistory,
    MyDataDailyTotals,
    TimeAndDateSettingsMenu,
    TimeAndDateSettingsTime,
    TimeAndDateSettingsDate,
    Unrecognized,
}

impl fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ParsedScreen {
    /// Returns the tag of this screen, discarding any associated data.
    #[must_use]
    pub const fn kind(&self) -> ScreenKind {
        match self {
            Self::Main => ScreenKind::Main,
            Self::Quickinfo => ScreenKind::Quickinfo,
            Self::AlertScreen { .. } => ScreenKind::AlertScreen,
            Self::StandardBolusMenu => ScreenKind::StandardBolusMenu,
            Self::TemporaryBasalRateMenu => ScreenKind::TemporaryBasalRateMenu,
            Self::TemporaryBasalRatePercentage { .. } => ScreenKind::TemporaryBasalRatePercentage,
            Self::TemporaryBasalRateDuration { .. } => ScreenKind::TemporaryBasalRateDuration,
            Self::BasalRateProgrammingMenu { .. } => ScreenKind::BasalRateProgrammingMenu,
            Self::BasalRateTotal => ScreenKind::BasalRateTotal,
            Self::BasalRateFactorSetting { .. } => ScreenKind::BasalRateFactorSetting,
            Self::MyDataMenu => ScreenKind::MyDataMenu,
            Self::MyDataBolusHistory => ScreenKind::MyDataBolusHistory,
            Self::MyDataDailyTotals => ScreenKind::MyDataDailyTotals,
            Self::TimeAndDateSettingsMenu => ScreenKind::TimeAndDateSettingsMenu,
            Self::TimeAndDateSettingsTime => ScreenKind::TimeAndDateSettingsTime,
            Self::TimeAndDateSettingsDate => ScreenKind::TimeAndDateSettingsDate,
            Self::Unrecognized => ScreenKind::Unrecognized,
        }
    }
}

/// Returns whether two screens are the same kind, ignoring any data they
/// carry (e.g. two different `BASAL_RATE_FACTOR_SETTING` screens for
/// different hours are "the same type").
#[must_use]
pub fn screen_type_eq(a: &ParsedScreen, b: &ParsedScreen) -> bool {
    a.kind() == b.kind()
}

/// Returns whether two screens are identical, kind and data alike.
#[must_use]
pub fn screen_content_eq(a: &ParsedScreen, b: &ParsedScreen) -> bool {
    a == b
}

/// Turns assembled display frames into [`ParsedScreen`]s. The concrete
/// recognition logic (matching the pump's fixed bitmap font and fixed
/// menu layouts) lives outside this crate's test surface; callers supply
/// an implementation, tests supply a canned one.
pub trait ScreenParser: Send + Sync {
    /// Parses one fully assembled display frame.
    fn parse(&self, frame: &DisplayFrame) -> ParsedScreen;
}

/// Wraps a [`ScreenParser`] to suppress consecutive duplicate screens,
/// using [`screen_content_eq`]. The RT display resends the same frame on
/// every `RT_DISPLAY` cycle even when nothing changed; callers that wait
/// for a specific screen only care about transitions.
pub struct DedupingScreenStream<P> {
    parser: P,
    last: Option<ParsedScreen>,
}

impl<P: ScreenParser> DedupingScreenStream<P> {
    /// Wraps `parser`.
    pub const fn new(parser: P) -> Self {
        Self {
            parser,
            last: None,
        }
    }

    /// Feeds a new frame, returning `Some(screen)` only if it differs
    /// (by content) from the most recently returned screen.
    pub fn feed(&mut self, frame: &DisplayFrame) -> Option<ParsedScreen> {
        let screen = self.parser.parse(frame);
        let changed = match &self.last {
            Some(prev) => !screen_content_eq(prev, &screen),
            None => true,
        };
        self.last = Some(screen.clone());
        changed.then_some(screen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantParser(ParsedScreen);

    impl ScreenParser for ConstantParser {
        fn parse(&self, _frame: &DisplayFrame) -> ParsedScreen {
            self.0.clone()
        }
    }

    #[test]
    fn type_eq_ignores_data() {
        let a = ParsedScreen::BasalRateFactorSetting {
            begin_hour: 0,
            factor: Some(100),
        };
        let b = ParsedScreen::BasalRateFactorSetting {
            begin_hour: 4,
            factor: None,
        };
        assert!(screen_type_eq(&a, &b));
        assert!(!screen_content_eq(&a, &b));
    }

    #[test]
    fn deduping_stream_suppresses_repeats() {
        let mut stream = DedupingScreenStream::new(ConstantParser(ParsedScreen::Main));
        let frame = DisplayFrame::new();
        assert_eq!(stream.feed(&frame), Some(ParsedScreen::Main));
        assert_eq!(stream.feed(&frame), None);
    }
}
