use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{PlayerId, TeamId, NO_TEAM};

/// Per participant scoring and lobby state. One exists for every connected
/// human or bot for as long as they stay in the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub name: String,
    pub score: f32,
    pub kills: u32,
    pub deaths: u32,
    pub suicides: u32,
    pub team: TeamId,
    pub ready_to_play: bool,
    pub only_spectator: bool,
    pub caster: bool,
    pub has_high_score: bool,
    /// Team of the flag this player is holding, if any.
    pub carried_object: Option<TeamId>,
    pub spree: u32,
    pub multi_kill_level: u32,
    pub last_kill_time: f64,
    pub start_time: u32,
    pub last_killer: Option<PlayerId>,
    pub respawn_choices: Option<(u32, u32)>,
    pub kills_by_damage_type: HashMap<String, u32>,
    pub deaths_by_damage_type: HashMap<String, u32>,
}

impl PlayerState {
    pub fn new(player_id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            player_id,
            name: name.into(),
            score: 0.0,
            kills: 0,
            deaths: 0,
            suicides: 0,
            team: NO_TEAM,
            ready_to_play: false,
            only_spectator: false,
            caster: false,
            has_high_score: false,
            carried_object: None,
            spree: 0,
            multi_kill_level: 0,
            last_kill_time: f64::NEG_INFINITY,
            start_time: 0,
            last_killer: None,
            respawn_choices: None,
            kills_by_damage_type: HashMap::new(),
            deaths_by_damage_type: HashMap::new(),
        }
    }

    pub fn adjust_score(&mut self, delta: f32) {
        self.score += delta;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotController {
    pub skill: f32,
    /// Asset name of the character this bot was built from, if any.
    pub character: Option<String>,
    pub enemy: Option<PlayerId>,
    pub last_enemy_seen_time: f64,
}

impl BotController {
    pub fn lost_contact(&self, now: f64, max_time: f64) -> bool {
        now - self.last_enemy_seen_time >= max_time
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Controller {
    Human,
    Bot(BotController),
}

/// The in-world body of a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Pawn {
    pub spawn_time: f64,
    pub has_high_score: bool,
}

/// A connected participant assembled from its components.
#[derive(Debug, Clone)]
pub struct Participant {
    pub state: PlayerState,
    pub controller: Controller,
    pub pawn: Option<Pawn>,
    /// Forced to watch, e.g. eliminated before an only-the-strong-survive overtime.
    pub spectating: bool,
    pub death_time: f64,
}

impl Participant {
    pub fn new(state: PlayerState, controller: Controller) -> Self {
        Self {
            state,
            controller,
            pawn: None,
            spectating: false,
            death_time: 0.0,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.state.player_id
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.controller, Controller::Bot(_))
    }

    pub fn bot(&self) -> Option<&BotController> {
        match &self.controller {
            Controller::Bot(bot) => Some(bot),
            Controller::Human => None,
        }
    }

    /// Humans that play rather than only watch.
    pub fn is_active_player(&self) -> bool {
        !self.is_bot() && !self.state.only_spectator
    }
}

pub trait Scoreable {
    fn score(&self) -> f32;
    fn adjust_score(&mut self, delta: f32);
}

pub trait TeamAffiliated {
    fn team(&self) -> TeamId;

    fn on_same_team(&self, other: &impl TeamAffiliated) -> bool {
        self.team() != NO_TEAM && self.team() == other.team()
    }
}

impl Scoreable for Participant {
    fn score(&self) -> f32 {
        self.state.score
    }

    fn adjust_score(&mut self, delta: f32) {
        self.state.adjust_score(delta);
    }
}

impl TeamAffiliated for Participant {
    fn team(&self) -> TeamId {
        self.state.team
    }
}
