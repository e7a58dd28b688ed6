use crate::map_vote::MapVoteList;
use crate::match_state::MatchState;
use crate::PlayerId;

/// The replicated view of the match that every client can see.
#[derive(Debug, Default, Clone)]
pub struct GameState {
    pub match_state: MatchState,
    pub time_limit: u32,
    pub remaining_time: u32,
    pub elapsed_time: u32,
    pub stop_game_clock: bool,
    pub players_needed: u32,
    pub winner: Option<PlayerId>,
    pub vote_timer: u32,
    pub map_vote_list: MapVoteList,
    pub only_the_strong_survive: bool,
    pub is_instance_server: bool,
    pub hub_guid: Option<u128>,
}

impl GameState {
    pub fn set_time_limit(&mut self, seconds: u32) {
        self.time_limit = seconds;
        self.remaining_time = seconds;
    }

    pub fn has_match_started(&self) -> bool {
        self.match_state.has_match_started()
    }

    pub fn is_match_in_progress(&self) -> bool {
        self.match_state.is_match_in_progress()
    }

    pub fn is_match_in_overtime(&self) -> bool {
        self.match_state.is_in_overtime()
    }

    pub fn has_match_ended(&self) -> bool {
        self.match_state.has_match_ended()
    }

    /// One second of game clock.
    pub fn advance_clock(&mut self) {
        if self.is_match_in_progress() {
            self.elapsed_time += 1;
        }
        if self.remaining_time > 0 && !self.stop_game_clock && !self.has_match_ended() {
            self.remaining_time -= 1;
        }
    }
}
