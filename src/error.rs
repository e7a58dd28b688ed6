use thiserror::Error;

use crate::match_state::MatchState;
use crate::PlayerId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GameError {
    #[error("Player id {0:#X} is not in this match")]
    InvalidPlayerId(PlayerId),
    #[error("The name {0:?} is already in use")]
    NameTaken(String),
    #[error("Character data for bot '{0}' not found")]
    BotCharacterNotFound(String),
    #[error("Failed to find or load mutator '{0}'")]
    UnknownMutator(String),
    #[error("Rejected mutator {name} - {reason}")]
    MutatorRejected { name: String, reason: String },
    #[error("Match state {0} is terminal")]
    TerminalState(MatchState),
}

pub type GameResult<T> = Result<T, GameError>;
