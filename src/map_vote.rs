//! Post-match voting on the next map.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::events::GameEvent;
use crate::game_mode::{GameMode, TimerAction};
use crate::match_state::MatchState;
use crate::PlayerId;

/// Voting never runs for less than this many seconds.
pub const MIN_MAP_VOTE_TIME: u32 = 20;
/// Seconds before the end of the vote at which the list is culled.
pub const CULL_LEAD_TIME: u32 = 10;
pub const MAX_MAPS_AFTER_CULL: usize = 6;
/// Culling tops the list back up to this many maps when anyone voted.
pub const MIN_MAPS_AFTER_CULL: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapVoteInfo {
    pub map_package_name: String,
    pub vote_count: u32,
}

#[derive(Debug, Default, Clone)]
pub struct MapVoteList {
    entries: Vec<MapVoteInfo>,
    /// The map each voter currently backs.
    votes: HashMap<PlayerId, String>,
}

impl MapVoteList {
    pub fn new<I, S>(maps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for map in maps {
            let map = map.into();
            if list.find(&map).is_none() {
                list.entries.push(MapVoteInfo {
                    map_package_name: map,
                    vote_count: 0,
                });
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MapVoteInfo] {
        &self.entries
    }

    fn find(&self, map: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.map_package_name == map)
    }

    pub fn vote_count(&self, map: &str) -> Option<u32> {
        self.find(map).map(|i| self.entries[i].vote_count)
    }

    /// Casts or moves `voter`'s vote. False if the map is not on the list.
    pub fn register_vote(&mut self, voter: PlayerId, map: &str) -> bool {
        let Some(idx) = self.find(map) else {
            return false;
        };
        self.remove_voter(voter);
        self.entries[idx].vote_count += 1;
        self.votes.insert(voter, map.to_owned());
        true
    }

    pub fn remove_voter(&mut self, voter: PlayerId) {
        if let Some(previous) = self.votes.remove(&voter) {
            if let Some(idx) = self.find(&previous) {
                self.entries[idx].vote_count -= 1;
            }
        }
    }

    /// First entry holding the highest non-zero count.
    pub fn leader(&self) -> Option<&MapVoteInfo> {
        self.entries
            .iter()
            .filter(|e| e.vote_count > 0)
            .fold(None, |best: Option<&MapVoteInfo>, e| match best {
                Some(b) if b.vote_count >= e.vote_count => Some(b),
                _ => Some(e),
            })
    }

    /// Trims the list to the most voted maps. Returns how many were dropped.
    pub fn cull(&mut self, rng: &mut impl Rng) -> usize {
        let mut sorted = std::mem::take(&mut self.entries);
        // stable, so equal counts keep their listed order
        sorted.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

        let mut deleted = Vec::new();
        let mut forced_size = MIN_MAPS_AFTER_CULL;
        if sorted.first().map_or(false, |top| top.vote_count == 0) {
            // nobody voted, offer a random handful instead
            forced_size = MAX_MAPS_AFTER_CULL;
            deleted.append(&mut sorted);
        } else {
            let voted = sorted.iter().take_while(|e| e.vote_count > 0).count();
            deleted.extend(sorted.drain(voted..));
            if sorted.len() > MAX_MAPS_AFTER_CULL {
                deleted.extend(sorted.drain(MAX_MAPS_AFTER_CULL..));
            }
        }

        while sorted.len() < forced_size && !deleted.is_empty() {
            let idx = rng.gen_range(0..deleted.len());
            sorted.push(deleted.swap_remove(idx));
        }

        log::info!("Culling Votes: {} {}", sorted.len(), deleted.len());
        for gone in &deleted {
            self.votes.retain(|_, map| *map != gone.map_package_name);
        }
        self.entries = sorted;
        deleted.len()
    }

    /// Picks uniformly among the maps sharing the highest count. None when nobody voted.
    pub fn tally(&self, rng: &mut impl Rng) -> Option<String> {
        let best = self.entries.iter().map(|e| e.vote_count).max()?;
        if best == 0 {
            return None;
        }
        let tied: Vec<&MapVoteInfo> = self
            .entries
            .iter()
            .filter(|e| e.vote_count == best)
            .collect();
        tied.choose(rng).map(|e| e.map_package_name.clone())
    }
}

impl GameMode {
    pub(crate) fn handle_map_vote(&mut self) {
        self.config.map_vote_time = self.config.map_vote_time.max(MIN_MAP_VOTE_TIME);
        let vote_time = self.config.map_vote_time;

        self.game_state.vote_timer = vote_time;
        self.schedule(f64::from(vote_time + 1), TimerAction::TallyMapVotes);
        self.schedule(
            f64::from(vote_time - CULL_LEAD_TIME),
            TimerAction::CullMapVotes,
        );
        self.events.emit(GameEvent::ShowMapVote);
    }

    pub(crate) fn cull_map_votes(&mut self) {
        if self.match_state() != MatchState::MapVoteHappening {
            return;
        }
        self.game_state.map_vote_list.cull(&mut self.ctx.rng);
    }

    pub(crate) fn tally_map_votes(&mut self) {
        if self.match_state() != MatchState::MapVoteHappening {
            return;
        }
        self.events.emit(GameEvent::HideMapVote);

        match self.game_state.map_vote_list.tally(&mut self.ctx.rng) {
            Some(map) => self.server_travel(&map),
            None if self.is_game_instance_server() && !self.config.lobby.dedicated_instance => {
                self.send_everyone_back_to_lobby();
                self.set_match_state(MatchState::LeavingMap);
            }
            None => self.travel_by_rotation(),
        }
    }

    /// Ends the vote early once one map holds more than half of the players.
    pub(crate) fn check_map_vote_majority(&mut self) {
        let target = (self.num_players() as f32 * 0.5) as u32;
        let decided = self
            .game_state
            .map_vote_list
            .leader()
            .map_or(false, |best| best.vote_count > target);
        if decided {
            self.tally_map_votes();
        }
    }

    /// Players that are actually playing may vote while the vote is open.
    pub fn register_map_vote(&mut self, voter: PlayerId, map: &str) -> bool {
        if self.match_state() != MatchState::MapVoteHappening {
            return false;
        }
        if !self
            .participant(voter)
            .map_or(false, |p| p.is_active_player())
        {
            return false;
        }
        self.game_state.map_vote_list.register_vote(voter, map)
    }
}
