//! Kill attribution, streaks and the conditions that end a match.

use serde::{Deserialize, Serialize};

use crate::events::GameEvent;
use crate::game_mode::GameMode;
use crate::match_state::MatchState;
use crate::player::{Controller, Scoreable, TeamAffiliated};
use crate::PlayerId;

/// Kills closer together than this many seconds chain into a multi-kill.
pub const MULTI_KILL_WINDOW: f64 = 3.0;
/// Every this many kills without dying is announced as a new spree level.
pub const SPREE_STEP: u32 = 5;

/// An entry for the demo recording's event track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub group: String,
    /// Who the event is about, for scrubbing to it.
    pub meta: String,
    pub data: String,
}

impl GameMode {
    /// A participant died. `killer` is `None` for environmental deaths.
    pub fn killed(&mut self, killer: Option<PlayerId>, victim: PlayerId, damage_type: &str) {
        let state = self.match_state();
        if state.has_match_ended() || state == MatchState::MatchEnteringOvertime {
            return;
        }
        if self.participant(victim).is_none() {
            return;
        }

        // teamkills count against the victim like a suicide
        let killer = killer.filter(|k| *k == victim || self.is_enemy(*k, victim));
        let now = self.world_time();

        let mut ended_spree = None;
        if let Some(p) = self.participants.get_mut(&victim) {
            p.state.last_killer = killer;
            p.state.deaths += 1;
            *p.state
                .deaths_by_damage_type
                .entry(damage_type.to_owned())
                .or_default() += 1;
            if p.state.spree >= SPREE_STEP {
                ended_spree = Some(p.state.spree);
            }
            p.state.spree = 0;
            p.state.multi_kill_level = 0;
            p.pawn = None;
            p.death_time = now;
        }
        if let Some(spree) = ended_spree {
            self.events.emit(GameEvent::SpreeEnded {
                player: victim,
                spree,
                ended_by: killer.filter(|k| *k != victim),
            });
        }

        self.events.emit(GameEvent::Death {
            killer,
            victim,
            damage_type: damage_type.to_owned(),
        });
        self.score_kill(killer, victim, damage_type);

        if self.game_state.only_the_strong_survive && self.match_state().is_in_overtime() {
            if let Some(p) = self.participants.get_mut(&victim) {
                p.spectating = true;
            }
        }

        // bots hunting the victim need a new target
        for p in self.participants.values_mut() {
            if let Controller::Bot(bot) = &mut p.controller {
                if bot.enemy == Some(victim) {
                    bot.enemy = None;
                }
            }
        }
    }

    /// Whether `a` and `b` are on opposing sides. Everyone is an enemy outside team games.
    pub fn is_enemy(&self, a: PlayerId, b: PlayerId) -> bool {
        match (self.participant(a), self.participant(b)) {
            (Some(a), Some(b)) => a.id() != b.id() && !a.on_same_team(b),
            _ => false,
        }
    }

    pub fn score_kill(&mut self, killer: Option<PlayerId>, victim: PlayerId, damage_type: &str) {
        match killer.filter(|k| *k != victim) {
            None => {
                if let Some(p) = self.participants.get_mut(&victim) {
                    p.adjust_score(-1.0);
                    p.state.suicides += 1;
                }
            }
            Some(k) => {
                if self.participants.contains_key(&k) {
                    self.increment_kills(k, damage_type);
                    self.find_and_mark_high_scorer();
                    self.check_score(k);
                }
                if !self.first_blood_occurred {
                    self.events.emit(GameEvent::FirstBlood { killer: Some(k) });
                    self.first_blood_occurred = true;
                }
                self.add_kill_event_to_replay(k, victim, damage_type);
            }
        }

        self.mutators.score_kill(killer, victim, damage_type);
    }

    fn increment_kills(&mut self, killer: PlayerId, damage_type: &str) {
        let now = self.world_time();
        let Some(p) = self.participants.get_mut(&killer) else {
            return;
        };
        p.adjust_score(1.0);
        p.state.kills += 1;
        *p.state
            .kills_by_damage_type
            .entry(damage_type.to_owned())
            .or_default() += 1;

        let mut multi_kill = None;
        if now - p.state.last_kill_time < MULTI_KILL_WINDOW {
            p.state.multi_kill_level += 1;
            multi_kill = Some(p.state.multi_kill_level);
        } else {
            p.state.multi_kill_level = 0;
        }
        p.state.last_kill_time = now;

        p.state.spree += 1;
        let spree = (p.state.spree % SPREE_STEP == 0).then(|| p.state.spree / SPREE_STEP - 1);

        if let Some(level) = multi_kill {
            self.events.emit(GameEvent::MultiKill {
                player: killer,
                level,
            });
            self.add_replay_event("MultiKills", killer, level.to_string());
        }
        if let Some(level) = spree {
            self.events.emit(GameEvent::KillingSpree {
                player: killer,
                level,
            });
            self.add_replay_event("SpreeKills", killer, level.to_string());
        }
    }

    /// Flags the single best scorer. A shared lead flags nobody.
    pub fn find_and_mark_high_scorer(&mut self) {
        let best = self
            .participants
            .values()
            .map(|p| p.score())
            .fold(f32::NEG_INFINITY, f32::max);
        let leaders = self
            .participants
            .values()
            .filter(|p| p.score() == best)
            .count();

        let mut changed = Vec::new();
        for p in self.participants.values_mut() {
            let high = leaders == 1 && p.score() == best;
            p.state.has_high_score = high;
            if let Some(pawn) = p.pawn.as_mut() {
                if pawn.has_high_score != high {
                    pawn.has_high_score = high;
                    changed.push((p.state.player_id, high));
                }
            }
        }
        for (player, has_high_score) in changed {
            self.events.emit(GameEvent::HighScoreChanged {
                player,
                has_high_score,
            });
        }
    }

    /// Ends the match once `scorer` reaches the goal score.
    pub fn check_score(&mut self, scorer: PlayerId) -> bool {
        if !self.match_state().is_match_in_progress() {
            return false;
        }
        let goal = self.config.goal_score;
        let reached = self
            .participant(scorer)
            .map_or(false, |p| goal > 0 && p.score() >= goal as f32);
        if reached {
            self.end_game(Some(scorer), "fraglimit");
        }
        reached
    }

    /// Once a second: ends the match or starts overtime when the time limit runs out.
    pub fn check_game_time(&mut self) {
        let state = self.match_state();
        if !state.is_match_in_progress()
            || state.has_match_ended()
            || self.game_state.time_limit == 0
            || self.game_state.remaining_time > 0
        {
            return;
        }

        let (winner, tied) = self.is_there_a_winner();
        if !self.config.allow_overtime || !tied {
            self.end_game(if tied { None } else { winner }, "TimeLimit");
        } else if !state.is_in_overtime() {
            log::info!("Time limit reached with a tied score, going to overtime");
            self.game_state.stop_game_clock = true;
            self.set_match_state(MatchState::MatchEnteringOvertime);
        }
    }

    /// The best scorer among players, and whether anyone shares that score.
    pub fn is_there_a_winner(&self) -> (Option<PlayerId>, bool) {
        let mut best: Option<(PlayerId, f32)> = None;
        let mut tied = false;
        for p in self.participants.values() {
            if p.state.only_spectator {
                continue;
            }
            match best {
                Some((_, score)) if p.score() == score => tied = true,
                Some((_, score)) if p.score() < score => {}
                _ => {
                    best = Some((p.id(), p.score()));
                    tied = false;
                }
            }
        }
        (best.map(|(id, _)| id), tied)
    }

    /// Adjusts `damage` dealt to `injured`. Freshly spawned players are immune to others.
    pub fn modify_damage(
        &mut self,
        damage: i32,
        injured: PlayerId,
        instigator: Option<PlayerId>,
    ) -> i32 {
        let Some(victim) = self.participants.get(&injured) else {
            return damage;
        };
        let mut damage = damage;

        let protected = victim.pawn.as_ref().map_or(false, |pawn| {
            self.world_time - pawn.spawn_time < self.config.spawn_protection_time
        });
        if protected && instigator.map_or(false, |i| i != injured) {
            damage = 0;
        }

        let attacker = instigator.and_then(|i| self.participants.get(&i));
        self.mutators.modify_damage(&mut damage, victim, attacker);
        damage
    }

    pub fn score_damage(&mut self, amount: i32, victim: PlayerId, attacker: Option<PlayerId>) {
        self.mutators.score_damage(amount, victim, attacker);
    }

    fn add_kill_event_to_replay(&mut self, killer: PlayerId, victim: PlayerId, damage_type: &str) {
        let victim_name = self
            .participant(victim)
            .map_or_else(|| "None".to_owned(), |p| p.state.name.clone());
        let killer_name = self
            .participant(killer)
            .map_or_else(|| "None".to_owned(), |p| p.state.name.clone());
        self.add_replay_event(
            "Kills",
            killer,
            format!("{killer_name} {victim_name} {damage_type}"),
        );
    }

    fn add_replay_event(&mut self, group: &str, player: PlayerId, detail: String) {
        if !self.recording_replay {
            return;
        }
        let meta = self
            .participant(player)
            .map_or_else(|| "None".to_owned(), |p| p.state.name.clone());
        let data = if group == "Kills" {
            detail
        } else {
            format!("{meta} {detail}")
        };
        self.replay_events.push(ReplayEvent {
            group: group.to_owned(),
            meta,
            data,
        });
    }
}
