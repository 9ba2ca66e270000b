//! The RT menu map: which button from which screen leads to which next
//! screen. Hand-authored from the pump's fixed menu layout.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::app::RtButton;
use crate::screen::ScreenKind;

/// A button sequence. Inline-stored up to 8 presses, which covers every
/// path in the standard menu map without a heap allocation.
pub type ButtonPath = SmallVec<[RtButton; 8]>;

/// A directed edge: pressing `button` while `ScreenKind::from` is shown
/// leads to `ScreenKind::to`.
#[derive(Clone, Copy, Debug)]
struct Edge {
    from: ScreenKind,
    button: RtButton,
    to: ScreenKind,
}

/// The pump's RT menu graph, as a simple adjacency map.
#[derive(Clone, Debug)]
pub struct MenuGraph {
    edges: Vec<Edge>,
}

impl MenuGraph {
    /// Builds the standard Combo menu map.
    #[must_use]
    pub fn standard() -> Self {
        use ScreenKind::{
            BasalRateFactorSetting, BasalRateProgrammingMenu, BasalRateTotal, Main, MyDataMenu,
            Quickinfo, StandardBolusMenu, TemporaryBasalRateDuration, TemporaryBasalRateMenu,
            TemporaryBasalRatePercentage, TimeAndDateSettingsMenu,
        };
        let edges = vec![
            Edge { from: Main, button: RtButton::MENU, to: Quickinfo },
            Edge { from: Quickinfo, button: RtButton::MENU, to: TemporaryBasalRateMenu },
            Edge { from: TemporaryBasalRateMenu, button: RtButton::MENU, to: StandardBolusMenu },
            Edge { from: StandardBolusMenu, button: RtButton::MENU, to: BasalRateProgrammingMenu },
            Edge { from: BasalRateProgrammingMenu, button: RtButton::MENU, to: MyDataMenu },
            Edge { from: MyDataMenu, button: RtButton::MENU, to: TimeAndDateSettingsMenu },
            Edge { from: TimeAndDateSettingsMenu, button: RtButton::MENU, to: Main },
            Edge { from: TemporaryBasalRateMenu, button: RtButton::CHECK, to: TemporaryBasalRatePercentage },
            Edge { from: TemporaryBasalRatePercentage, button: RtButton::CHECK, to: TemporaryBasalRateDuration },
            Edge { from: TemporaryBasalRateDuration, button: RtButton::CHECK, to: TemporaryBasalRateMenu },
            Edge { from: TemporaryBasalRateMenu, button: RtButton::BACK, to: Quickinfo },
            Edge { from: BasalRateProgrammingMenu, button: RtButton::CHECK, to: BasalRateFactorSetting },
            Edge { from: BasalRateFactorSetting, button: RtButton::DOWN, to: BasalRateFactorSetting },
            Edge { from: BasalRateFactorSetting, button: RtButton::CHECK, to: BasalRateTotal },
            Edge { from: BasalRateTotal, button: RtButton::BACK, to: BasalRateProgrammingMenu },
            Edge { from: BasalRateFactorSetting, button: RtButton::BACK, to: StandardBolusMenu },
        ];
        Self { edges }
    }

    /// Returns every `(button, destination)` reachable in one press from
    /// `from`.
    fn neighbors(&self, from: ScreenKind) -> impl Iterator<Item = (RtButton, ScreenKind)> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.from == from)
            .map(|e| (e.button, e.to))
    }

    /// Breadth-first search for the shortest button sequence from `from`
    /// to `to`. Returns `None` if `to` is unreachable.
    #[must_use]
    pub fn shortest_path(&self, from: ScreenKind, to: ScreenKind) -> Option<ButtonPath> {
        if from == to {
            return Some(ButtonPath::new());
        }
        let mut visited: HashMap<ScreenKind, (ScreenKind, RtButton)> = HashMap::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(from);
        visited.insert(from, (from, RtButton::NO_BUTTON));

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = ButtonPath::new();
                let mut node = to;
                while node != from {
                    let (prev, button) = visited[&node];
                    path.push(button);
                    node = prev;
                }
                path.reverse();
                return Some(path);
            }
            for (button, next) in self.neighbors(current) {
                if !visited.contains_key(&next) {
                    visited.insert(next, (current, button));
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_shortest_path_between_top_level_menus() {
        let graph = MenuGraph::standard();
        let path = graph
            .shortest_path(ScreenKind::Main, ScreenKind::StandardBolusMenu)
            .unwrap();
        assert_eq!(
            path.as_slice(),
            [RtButton::MENU, RtButton::MENU, RtButton::MENU]
        );
    }

    #[test]
    fn same_screen_is_empty_path() {
        let graph = MenuGraph::standard();
        assert!(
            graph
                .shortest_path(ScreenKind::Main, ScreenKind::Main)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn unreachable_screen_is_none() {
        let graph = MenuGraph {
            edges: Vec::new(),
        };
        assert_eq!(
            graph.shortest_path(ScreenKind::Main, ScreenKind::Quickinfo),
            None
        );
    }
}
