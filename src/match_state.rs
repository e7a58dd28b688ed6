use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The canonical phase of a match. Held once by the game mode and mirrored
/// into the replicated [`GameState`](crate::game_state::GameState).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum MatchState {
    EnteringMap,
    WaitingToStart,
    CountdownToBegin,
    InProgress,
    MatchEnteringOvertime,
    MatchIsInOvertime,
    MapVoteHappening,
    WaitingPostMatch,
    LeavingMap,
    Aborted,
}

impl Default for MatchState {
    fn default() -> Self {
        Self::EnteringMap
    }
}

impl MatchState {
    pub fn has_match_started(self) -> bool {
        !matches!(
            self,
            Self::EnteringMap | Self::WaitingToStart | Self::CountdownToBegin
        )
    }

    /// Play is live: regulation time or either overtime phase.
    pub fn is_match_in_progress(self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::MatchEnteringOvertime | Self::MatchIsInOvertime
        )
    }

    pub fn is_in_overtime(self) -> bool {
        matches!(self, Self::MatchEnteringOvertime | Self::MatchIsInOvertime)
    }

    pub fn has_match_ended(self) -> bool {
        matches!(
            self,
            Self::WaitingPostMatch | Self::MapVoteHappening | Self::LeavingMap | Self::Aborted
        )
    }

    /// No transition leaves these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LeavingMap | Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn overtime_counts_as_in_progress() {
        assert!(MatchState::MatchIsInOvertime.is_match_in_progress());
        assert!(MatchState::MatchEnteringOvertime.is_in_overtime());
        assert!(!MatchState::WaitingPostMatch.is_match_in_progress());
    }

    #[test]
    fn terminal_states() {
        assert!(MatchState::LeavingMap.is_terminal());
        assert!(MatchState::Aborted.is_terminal());
        assert!(!MatchState::MapVoteHappening.is_terminal());
        assert!(MatchState::MapVoteHappening.has_match_ended());
    }

    #[test]
    fn names_round_trip_through_strings() {
        assert_eq!(MatchState::CountdownToBegin.to_string(), "CountdownToBegin");
        assert_eq!(
            MatchState::from_str("MapVoteHappening"),
            Ok(MatchState::MapVoteHappening)
        );
    }
}
