//! Engine independent match lifecycle for an arena shooter server.
//!
//! The [`GameMode`](game_mode::GameMode) owns the authoritative match: its
//! state machine, participants, bots, scoring, map vote and the link to a
//! hosting lobby. It is driven from a single simulation thread through
//! [`GameMode::tick`](game_mode::GameMode::tick).

pub mod bots;
pub mod config;
pub mod error;
pub mod events;
pub mod game_mode;
pub mod game_state;
pub mod lobby;
pub mod map_vote;
pub mod match_state;
pub mod mutator;
pub mod player;
pub mod protocol;
pub mod scheduler;
pub mod scoring;

pub use error::GameError;
pub use game_mode::{GameContext, GameMode};
pub use match_state::MatchState;

pub type PlayerId = u32;
pub type TeamId = u8;

/// Team id of participants that are not on any team.
pub const NO_TEAM: TeamId = 255;

/// Player names are capped at this many characters.
pub const MAX_NAME_LEN: usize = 15;
