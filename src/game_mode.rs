//! The authoritative match: state machine, player lifecycle and the once a
//! second housekeeping timer.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{GameConfig, UrlOptions};
use crate::error::{GameError, GameResult};
use crate::events::{EventBus, GameEvent};
use crate::game_state::GameState;
use crate::lobby::{BeaconConnector, LobbyBeacon};
use crate::map_vote::MapVoteList;
use crate::match_state::MatchState;
use crate::mutator::{MutatorChain, MutatorRegistry};
use crate::player::{Controller, Participant, Pawn, PlayerState};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::scoring::ReplayEvent;
use crate::{PlayerId, TeamId, MAX_NAME_LEN, NO_TEAM};

/// Seconds of countdown broadcast before play begins.
pub const COUNTDOWN_SECONDS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    Standalone,
    ListenServer,
    DedicatedServer,
}

/// Everything the game mode needs from the process hosting it.
pub struct GameContext {
    pub net_mode: NetMode,
    pub rng: StdRng,
    pub beacon_connector: Option<Box<dyn BeaconConnector>>,
}

impl GameContext {
    pub fn new(net_mode: NetMode) -> Self {
        Self {
            net_mode,
            rng: StdRng::from_entropy(),
            beacon_connector: None,
        }
    }

    pub fn with_seed(net_mode: NetMode, seed: u64) -> Self {
        Self {
            net_mode,
            rng: StdRng::seed_from_u64(seed),
            beacon_connector: None,
        }
    }

    pub fn with_beacon_connector(mut self, connector: Box<dyn BeaconConnector>) -> Self {
        self.beacon_connector = Some(connector);
        self
    }
}

/// Deferred work the game mode schedules on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    CheckCountDown,
    PlayEndOfMatchMessage,
    ShowFinalScoreboard,
    StopReplayRecording,
    TravelToNextMap,
    CullMapVotes,
    TallyMapVotes,
}

pub struct GameMode {
    pub config: GameConfig,
    map_name: String,
    options: String,
    pub(crate) game_state: GameState,
    match_state: MatchState,
    pub(crate) participants: BTreeMap<PlayerId, Participant>,
    next_player_id: PlayerId,
    pub(crate) mutators: MutatorChain,
    timers: Scheduler<TimerAction>,
    countdown_timer: Option<TimerHandle>,
    count_down: u32,
    pub(crate) events: EventBus,
    pub(crate) ctx: GameContext,
    pub(crate) beacon: Option<Box<dyn LobbyBeacon>>,
    pub(crate) server_guid: u128,
    pub(crate) world_time: f64,
    timer_accumulator: f64,
    start_play_time: f64,
    end_time: f64,
    game_ended: bool,
    pub(crate) first_blood_occurred: bool,
    pub(crate) last_lobby_update_time: f64,
    empty_server_time: u32,
    pub(crate) fallback_bot_names: u32,
    next_map_override: Option<String>,
    pending_travel: Option<String>,
    exit_requested: bool,
    pub(crate) recording_replay: bool,
    pub(crate) replay_events: Vec<ReplayEvent>,
}

impl GameMode {
    /// Sets up a match on `map_name`, applying the travel URL `options` over `config`.
    pub fn new(map_name: &str, options: &str, mut config: GameConfig, mut ctx: GameContext) -> Self {
        log::info!("===============");
        log::info!("  Init Game Option: {options}");

        config.apply_options(options);
        let server_guid = ctx.rng.gen();

        let mut game = Self {
            map_name: map_name.to_owned(),
            options: options.to_owned(),
            game_state: GameState {
                map_vote_list: MapVoteList::new(config.map_vote_candidates.iter().cloned()),
                is_instance_server: config.lobby.lobby_instance_id > 0,
                ..Default::default()
            },
            match_state: MatchState::EnteringMap,
            participants: BTreeMap::new(),
            next_player_id: 1,
            mutators: MutatorChain::default(),
            timers: Scheduler::default(),
            countdown_timer: None,
            count_down: 0,
            events: EventBus::default(),
            ctx,
            beacon: None,
            server_guid,
            world_time: 0.0,
            timer_accumulator: 0.0,
            start_play_time: 0.0,
            end_time: 0.0,
            game_ended: false,
            first_blood_occurred: false,
            last_lobby_update_time: 0.0,
            empty_server_time: 0,
            fallback_bot_names: 0,
            next_map_override: None,
            pending_travel: None,
            exit_requested: false,
            recording_replay: false,
            replay_events: Vec::new(),
            config,
        };

        let registry = MutatorRegistry::default();
        for name in game.config.mutators.clone() {
            registry.add_to_chain(&mut game.mutators, &name, &game.options);
        }

        log::info!("LobbyInstanceID: {}", game.config.lobby.lobby_instance_id);
        log::info!("==================");

        game.recreate_lobby_beacon();
        game
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    pub fn mutators(&self) -> &MutatorChain {
        &self.mutators
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&GameEvent) + 'static) {
        self.events.subscribe(observer);
    }

    /// Map the server is about to load, set once the match leaves its map.
    pub fn pending_travel(&self) -> Option<&str> {
        self.pending_travel.as_deref()
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn has_game_ended(&self) -> bool {
        self.game_ended
    }

    /// World time the match was decided at.
    pub fn end_time(&self) -> Option<f64> {
        self.game_ended.then_some(self.end_time)
    }

    /// Whether an actor of `actor_class` may exist under the active mutators.
    pub fn check_relevance(&self, actor_class: &str) -> bool {
        self.mutators.check_relevance(actor_class)
    }

    /// Overrides the rotation for the next travel.
    pub fn set_next_map(&mut self, map: impl Into<String>) {
        self.next_map_override = Some(map.into());
    }

    pub(crate) fn schedule(&mut self, delay: f64, action: TimerAction) -> TimerHandle {
        self.timers.schedule(self.world_time, delay, action)
    }

    pub(crate) fn request_exit(&mut self, reason: &str) {
        log::warn!("Requesting exit: {reason}");
        self.exit_requested = true;
    }

    pub fn participant(&self, id: PlayerId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn participant_mut(&mut self, id: PlayerId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Connected humans that play.
    pub fn num_players(&self) -> u32 {
        self.participants.values().filter(|p| p.is_active_player()).count() as u32
    }

    pub fn num_spectators(&self) -> u32 {
        self.participants
            .values()
            .filter(|p| !p.is_bot() && p.state.only_spectator)
            .count() as u32
    }

    pub fn num_bots(&self) -> u32 {
        self.participants.values().filter(|p| p.is_bot()).count() as u32
    }

    pub(crate) fn next_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    pub(crate) fn is_name_taken(&self, name: &str, except: Option<PlayerId>) -> bool {
        self.participants
            .values()
            .any(|p| Some(p.id()) != except && p.state.name.eq_ignore_ascii_case(name))
    }

    /// A human joins. Recognised options: `Name`, `SpectatorOnly`, `Caster`, `Team`.
    pub fn login(&mut self, options: &str) -> PlayerId {
        let opts = UrlOptions::parse(options);
        let id = self.next_id();

        let requested: String = opts
            .get("Name")
            .unwrap_or_default()
            .chars()
            .take(MAX_NAME_LEN)
            .collect();
        let name = if requested.is_empty() || self.is_name_taken(&requested, None) {
            format!("{}{id}", self.config.default_player_name)
        } else {
            requested
        };

        let mut state = PlayerState::new(id, name);
        state.only_spectator = opts.bool("SpectatorOnly").unwrap_or(false);
        state.caster = opts.bool("Caster").unwrap_or(false);
        self.participants
            .insert(id, Participant::new(state, Controller::Human));

        let team = opts
            .int("Team")
            .and_then(|t| TeamId::try_from(t).ok())
            .unwrap_or(NO_TEAM);
        self.change_team(id, team);
        self.generic_player_initialization(id);
        log::info!("Player {id:#X} logged in");

        self.post_login(id);
        id
    }

    fn post_login(&mut self, id: PlayerId) {
        if self.match_state.is_match_in_progress() && self.player_can_restart(id) {
            self.restart_player(id);
        }
        self.check_bot_count();
    }

    pub(crate) fn generic_player_initialization(&mut self, id: PlayerId) {
        let elapsed = self.game_state.elapsed_time;
        if let Some(p) = self.participants.get_mut(&id) {
            p.state.start_time = elapsed;
            self.mutators.modify_player(p);
        }
    }

    /// A participant leaves, human or bot. Returns what was removed.
    pub fn logout(&mut self, id: PlayerId) -> Option<Participant> {
        let participant = self.participants.remove(&id)?;
        self.mutators.notify_logout(&participant.state);
        self.game_state.map_vote_list.remove_voter(id);

        if !participant.is_bot() {
            // stats go to cloud storage from here
            self.events
                .emit(GameEvent::PlayerStatsPersisted { player: id });
            if self.is_game_instance_server() {
                self.send_player_update(&participant.state, true);
            }
        }
        log::info!(
            "{} {id:#X} left the match",
            if participant.is_bot() { "Bot" } else { "Player" }
        );
        Some(participant)
    }

    /// Renames a participant. A name in use by anyone else is refused and nothing changes.
    pub fn change_name(&mut self, id: PlayerId, new_name: &str) -> GameResult<()> {
        let name: String = new_name.chars().take(MAX_NAME_LEN).collect();
        let current = self
            .participants
            .get(&id)
            .ok_or(GameError::InvalidPlayerId(id))?;
        if current.state.name.eq_ignore_ascii_case(&name) {
            return Ok(());
        }

        if self.is_name_taken(&name, Some(id)) {
            let err = GameError::NameTaken(name);
            self.events.emit(GameEvent::NameChangeRejected {
                player: id,
                message: err.to_string(),
            });
            return Err(err);
        }

        if let Some(p) = self.participants.get_mut(&id) {
            p.state.name = name;
        }
        Ok(())
    }

    /// Puts a participant on `team`, or on the smallest team when `team` is not a valid choice.
    pub fn change_team(&mut self, id: PlayerId, team: TeamId) -> bool {
        let num_teams = self.config.num_teams;
        if num_teams < 2 {
            if let Some(p) = self.participants.get_mut(&id) {
                p.state.team = NO_TEAM;
            }
            return false;
        }

        let team = if team < num_teams {
            team
        } else {
            let mut sizes = vec![0u32; num_teams as usize];
            for p in self.participants.values() {
                if p.id() != id && p.state.team < num_teams {
                    sizes[p.state.team as usize] += 1;
                }
            }
            sizes
                .iter()
                .enumerate()
                .min_by_key(|(_, size)| **size)
                .map_or(0, |(t, _)| t as TeamId)
        };

        match self.participants.get_mut(&id) {
            Some(p) => {
                p.state.team = team;
                true
            }
            None => false,
        }
    }

    pub fn set_ready(&mut self, id: PlayerId, ready: bool) -> GameResult<()> {
        let p = self
            .participants
            .get_mut(&id)
            .ok_or(GameError::InvalidPlayerId(id))?;
        p.state.ready_to_play = ready;
        Ok(())
    }

    /// Gives a participant a fresh pawn.
    pub fn restart_player(&mut self, id: PlayerId) {
        let now = self.world_time;
        if let Some(p) = self.participants.get_mut(&id) {
            p.pawn = Some(Pawn {
                spawn_time: now,
                has_high_score: p.state.has_high_score,
            });
        }
    }

    pub fn player_can_restart(&self, id: PlayerId) -> bool {
        let Some(p) = self.participants.get(&id) else {
            return false;
        };
        if p.state.only_spectator || p.spectating || p.pawn.is_some() {
            return false;
        }
        // no respawns once the weak are culled
        if self.game_state.only_the_strong_survive && self.match_state.is_in_overtime() {
            return false;
        }
        self.world_time - p.death_time >= f64::from(self.config.respawn_wait_time)
    }

    /// A dead participant asks to respawn.
    pub fn request_restart(&mut self, id: PlayerId) -> bool {
        if self.match_state.is_match_in_progress() && self.player_can_restart(id) {
            self.restart_player(id);
            true
        } else {
            false
        }
    }

    /// Moves the match to `new_state`, running its on-enter handler once.
    /// Returns false if nothing changed.
    pub fn set_match_state(&mut self, new_state: MatchState) -> bool {
        if self.match_state == new_state {
            return false;
        }
        if self.match_state.is_terminal() {
            log::warn!(
                "Ignoring {new_state}: {}",
                GameError::TerminalState(self.match_state)
            );
            return false;
        }

        let from = self.match_state;
        self.match_state = new_state;
        self.game_state.match_state = new_state;
        log::info!("Match state {from} -> {new_state}");
        self.events.emit(GameEvent::MatchStateChanged {
            from,
            to: new_state,
        });

        self.call_match_state_change_notify(new_state);
        self.mutators.notify_match_state_change(new_state);
        true
    }

    fn call_match_state_change_notify(&mut self, state: MatchState) {
        match state {
            MatchState::EnteringMap => {}
            MatchState::WaitingToStart => self.handle_match_is_waiting_to_start(),
            MatchState::CountdownToBegin => self.handle_countdown_to_begin(),
            MatchState::InProgress => self.handle_match_has_started(),
            MatchState::WaitingPostMatch => self.handle_match_has_ended(),
            MatchState::LeavingMap => self.handle_leaving_map(),
            MatchState::Aborted => self.handle_match_aborted(),
            MatchState::MatchEnteringOvertime => self.handle_entering_overtime(),
            MatchState::MatchIsInOvertime => self.handle_match_in_overtime(),
            MatchState::MapVoteHappening => self.handle_map_vote(),
        }
    }

    /// The map is loaded and play may begin once the match is ready.
    pub fn start_play(&mut self) {
        self.start_play_time = self.world_time;
        if self.match_state == MatchState::EnteringMap {
            self.set_match_state(MatchState::WaitingToStart);
        }
        self.notify_lobby_game_is_ready();
    }

    pub fn ready_to_start_match(&mut self) -> bool {
        if !self.config.delayed_start {
            return true;
        }
        if self.match_state != MatchState::WaitingToStart {
            return false;
        }

        let standalone = self.ctx.net_mode == NetMode::Standalone;
        let (num_players, num_bots) = (self.num_players(), self.num_bots());
        self.game_state.players_needed = if standalone {
            0
        } else {
            self.config
                .min_players_to_start
                .saturating_sub(num_players + num_bots)
        };

        if self.game_state.players_needed == 0 && num_players + self.num_spectators() > 0 {
            if self.config.caster_control {
                return self
                    .participants
                    .values()
                    .any(|p| p.state.caster && p.state.ready_to_play);
            }
            // once the ready-up window runs out the match starts regardless
            let ready_wait_over =
                self.config.max_ready_wait_time > 0 && self.game_state.remaining_time == 0;
            if ready_wait_over && !standalone {
                return true;
            }
            return self
                .participants
                .values()
                .all(|p| p.state.only_spectator || p.state.ready_to_play);
        }

        if self.config.max_wait_for_players > 0
            && self.world_time - self.start_play_time > f64::from(self.config.max_wait_for_players)
        {
            self.config.bot_fill_count = self
                .config
                .bot_fill_count
                .max(self.config.min_players_to_start);
        }
        if self.config.max_ready_wait_time > 0 {
            // the ready-up window restarts once enough players are in
            self.game_state
                .set_time_limit(self.config.max_ready_wait_time);
        }
        false
    }

    pub fn start_match(&mut self) {
        if !matches!(
            self.match_state,
            MatchState::EnteringMap | MatchState::WaitingToStart
        ) {
            return;
        }
        if self.config.delayed_start {
            self.set_match_state(MatchState::CountdownToBegin);
        } else {
            self.set_match_state(MatchState::InProgress);
        }
    }

    fn handle_match_is_waiting_to_start(&mut self) {
        if self.config.max_ready_wait_time > 0 {
            self.game_state
                .set_time_limit(self.config.max_ready_wait_time);
        }
    }

    fn handle_countdown_to_begin(&mut self) {
        self.count_down = COUNTDOWN_SECONDS;
        self.arm_countdown();
    }

    fn arm_countdown(&mut self) {
        if let Some(previous) = self.countdown_timer.take() {
            self.timers.cancel(previous);
        }
        self.countdown_timer = Some(self.schedule(1.0, TimerAction::CheckCountDown));
    }

    fn check_count_down(&mut self) {
        self.countdown_timer = None;
        if self.match_state != MatchState::CountdownToBegin {
            return;
        }
        if self.count_down > 0 {
            self.events.emit(GameEvent::CountDown(self.count_down));
            self.arm_countdown();
            self.count_down -= 1;
        } else {
            self.begin_game();
        }
    }

    fn begin_game(&mut self) {
        log::info!("BEGIN GAME Map: {}", self.map_name);
        log::info!(
            "Difficulty: {} GoalScore: {} TimeLimit (sec): {}",
            self.config.game_difficulty, self.config.goal_score, self.config.time_limit
        );
        for p in self.participants.values_mut() {
            p.state.start_time = 0;
        }
        self.game_state.elapsed_time = 0;
        self.set_match_state(MatchState::InProgress);
    }

    fn handle_match_has_started(&mut self) {
        // warmup leftovers don't count
        let ids: Vec<PlayerId> = self.participants.keys().copied().collect();
        for id in ids {
            let Some(p) = self.participants.get_mut(&id) else {
                continue;
            };
            let player_id = p.state.player_id;
            let name = std::mem::take(&mut p.state.name);
            let mut fresh = PlayerState::new(player_id, name);
            fresh.team = p.state.team;
            fresh.ready_to_play = p.state.ready_to_play;
            fresh.only_spectator = p.state.only_spectator;
            fresh.caster = p.state.caster;
            fresh.carried_object = p.state.carried_object;
            p.state = fresh;
            p.spectating = false;
            if !p.state.only_spectator {
                self.restart_player(id);
            }
        }

        self.game_state.set_time_limit(self.config.time_limit);
        self.game_state.stop_game_clock = false;
        self.first_blood_occurred = false;
        self.game_ended = false;
        self.recording_replay = self.config.record_demo;
        self.events.emit(GameEvent::MatchStarted);
    }

    fn handle_entering_overtime(&mut self) {
        if self.config.only_the_strong_survive {
            let best = self
                .participants
                .values()
                .filter(|p| !p.state.only_spectator)
                .map(|p| p.state.score)
                .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

            if let Some(best) = best {
                let mut eliminated = Vec::new();
                let mut respawn = Vec::new();
                for p in self.participants.values_mut() {
                    if p.state.only_spectator {
                        continue;
                    }
                    if p.state.score < best {
                        p.pawn = None;
                        p.spectating = true;
                        eliminated.push(p.id());
                    } else if p.pawn.is_none() {
                        respawn.push(p.id());
                    }
                }
                for id in eliminated {
                    self.events.emit(GameEvent::DidNotMakeTheCut(id));
                }
                for id in respawn {
                    self.restart_player(id);
                }
            }
            self.game_state.only_the_strong_survive = true;
        }

        self.set_match_state(MatchState::MatchIsInOvertime);
    }

    fn handle_match_in_overtime(&mut self) {
        self.events.emit(GameEvent::Overtime);
    }

    fn handle_match_has_ended(&mut self) {
        let humans: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| !p.is_bot())
            .map(Participant::id)
            .collect();
        for player in humans {
            self.events.emit(GameEvent::PlayerStatsPersisted { player });
        }
    }

    fn handle_leaving_map(&mut self) {
        log::info!("Leaving map {}", self.map_name);
        self.timers.clear();
    }

    fn handle_match_aborted(&mut self) {
        log::warn!("Match on {} aborted", self.map_name);
        self.timers.clear();
    }

    /// Aborts the match from any state that isn't already final.
    pub fn abort_match(&mut self) -> bool {
        self.set_match_state(MatchState::Aborted)
    }

    /// Decides the match in favour of `winner`, or nobody.
    pub fn end_game(&mut self, winner: Option<PlayerId>, reason: &str) {
        if self.game_ended || !self.match_state.is_match_in_progress() {
            return;
        }

        self.game_state.winner = winner;
        self.end_time = self.world_time;
        self.game_ended = true;

        if self.is_game_instance_server() {
            let stats = self.game_state.elapsed_time.to_string();
            self.with_beacon(|b| b.end_game(stats));
        }

        // the winner stays on camera, bring them back if they're dead
        if let Some(w) = winner {
            if self.participants.get(&w).map_or(false, |p| p.pawn.is_none()) {
                self.restart_player(w);
            }
        }

        self.schedule(
            self.config.end_scoreboard_delay,
            TimerAction::ShowFinalScoreboard,
        );
        self.schedule(self.config.end_time_delay, TimerAction::TravelToNextMap);
        self.schedule(
            (self.config.end_time_delay - 10.0).max(0.0),
            TimerAction::StopReplayRecording,
        );

        self.send_end_of_game_stats(reason);
        self.end_match();
    }

    fn end_match(&mut self) {
        if self.match_state.is_match_in_progress() {
            self.set_match_state(MatchState::WaitingPostMatch);
        }
        self.schedule(1.0, TimerAction::PlayEndOfMatchMessage);
    }

    fn send_end_of_game_stats(&mut self, reason: &str) {
        log::info!(
            "Match ended ({reason}) after {}s, winner: {:?}",
            self.game_state.elapsed_time, self.game_state.winner
        );
        self.events.emit(GameEvent::EndOfGameStats {
            reason: reason.to_owned(),
            winner: self.game_state.winner,
        });
    }

    fn play_end_of_match_message(&mut self) {
        let winner = self.game_state.winner;
        let flawless = winner
            .and_then(|w| self.participants.get(&w))
            .map_or(false, |p| p.state.deaths == 0);
        self.events.emit(GameEvent::Victory { winner, flawless });
    }

    fn stop_replay_recording(&mut self) {
        if self.recording_replay {
            self.recording_replay = false;
            self.events.emit(GameEvent::ReplayRecordingStopped);
        }
    }

    pub fn replay_events(&self) -> &[ReplayEvent] {
        &self.replay_events
    }

    pub(crate) fn server_travel(&mut self, map: &str) {
        log::info!("ServerTravel to {map}");
        self.pending_travel = Some(map.to_owned());
        self.events.emit(GameEvent::ServerTravel {
            map: map.to_owned(),
        });
        self.set_match_state(MatchState::LeavingMap);
    }

    /// Reloads the current map.
    pub fn restart_game(&mut self) {
        if self.match_state.has_match_started() {
            let map = self.map_name.clone();
            self.server_travel(&map);
        }
    }

    pub fn travel_to_next_map(&mut self) {
        log::info!(
            "TravelToNextMap: {} {}",
            self.config.lobby.dedicated_instance,
            self.is_game_instance_server()
        );

        let candidates = self.game_state.map_vote_list.len();
        if candidates > 1 {
            self.set_match_state(MatchState::MapVoteHappening);
            return;
        }

        if !self.config.lobby.dedicated_instance && self.is_game_instance_server() {
            match self.game_state.map_vote_list.entries().first() {
                Some(only) => {
                    let map = only.map_package_name.clone();
                    self.server_travel(&map);
                }
                None => {
                    self.send_everyone_back_to_lobby();
                    self.set_match_state(MatchState::LeavingMap);
                }
            }
            return;
        }

        self.travel_by_rotation();
    }

    /// Admin override first, then the map after this one in the rotation.
    /// Reloads the current map when there is no rotation.
    pub(crate) fn travel_by_rotation(&mut self) {
        if let Some(map) = self.next_map_override.take() {
            self.server_travel(&map);
            return;
        }

        let rotation = &self.config.map_rotation;
        if !rotation.is_empty() {
            let next = rotation
                .iter()
                .position(|m| m.ends_with(self.map_name.as_str()))
                .map_or(0, |i| (i + 1) % rotation.len());
            let map = rotation[next].clone();
            self.server_travel(&map);
            return;
        }

        self.restart_game();
    }

    /// Advances the simulation by `delta` seconds.
    pub fn tick(&mut self, delta: f64) {
        self.world_time += delta;

        for action in self.timers.poll(self.world_time) {
            if self.match_state.is_terminal() {
                break;
            }
            self.run_timer(action);
        }

        self.timer_accumulator += delta;
        while self.timer_accumulator >= 1.0 {
            self.timer_accumulator -= 1.0;
            self.default_timer();
        }

        if self.match_state == MatchState::WaitingToStart && self.ready_to_start_match() {
            self.start_match();
        }
    }

    fn run_timer(&mut self, action: TimerAction) {
        match action {
            TimerAction::CheckCountDown => self.check_count_down(),
            TimerAction::PlayEndOfMatchMessage => self.play_end_of_match_message(),
            TimerAction::ShowFinalScoreboard => self.events.emit(GameEvent::ShowScoreboard),
            TimerAction::StopReplayRecording => self.stop_replay_recording(),
            TimerAction::TravelToNextMap => self.travel_to_next_map(),
            TimerAction::CullMapVotes => self.cull_map_votes(),
            TimerAction::TallyMapVotes => self.tally_map_votes(),
        }
    }

    /// Once a second bookkeeping that doesn't need to run every frame.
    pub fn default_timer(&mut self) {
        if self.match_state.is_terminal() {
            return;
        }
        self.game_state.advance_clock();

        if self.match_state == MatchState::MapVoteHappening {
            self.game_state.vote_timer = self.game_state.vote_timer.saturating_sub(1);
        }

        if self.beacon_closed() {
            // an empty instance would only be asking the hub to kill it anyway
            if !self.config.lobby.dedicated_instance
                && self.num_players() == 0
                && self.match_state != MatchState::WaitingToStart
            {
                self.request_exit("lost the lobby with nobody left to play");
                return;
            }
            log::info!("Beacon lost connection. Attempting to recreate.");
            self.recreate_lobby_beacon();
        }
        self.process_lobby_commands();

        self.check_game_time();
        self.respawn_waiting_players();
        self.check_bot_count();

        if self.is_game_instance_server() && self.beacon.is_some() {
            self.sync_lobby();
        } else if self.num_players() == 0
            && self.num_spectators() == 0
            && self.match_state.has_match_started()
            && !self.match_state.has_match_ended()
        {
            self.empty_server_time += 1;
            if self.empty_server_time >= self.config.auto_restart_time {
                self.empty_server_time = 0;
                self.travel_to_next_map();
            }
        } else {
            self.empty_server_time = 0;
        }

        if self.match_state == MatchState::MapVoteHappening {
            self.check_map_vote_majority();
        }
    }

    /// Bots always come back on their own, humans only when respawn is forced.
    fn respawn_waiting_players(&mut self) {
        if !self.match_state.is_match_in_progress() {
            return;
        }
        let force = self.config.force_respawn;
        let waiting: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| p.pawn.is_none() && (force || p.is_bot()))
            .map(Participant::id)
            .collect();
        for id in waiting {
            if self.player_can_restart(id) {
                self.restart_player(id);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) fn game_with(options: &str) -> GameMode {
        let config = GameConfig {
            bot_roster: Vec::new(),
            ..Default::default()
        };
        let ctx = GameContext::with_seed(NetMode::DedicatedServer, 42);
        let mut game = GameMode::new("DM-Deck", options, config, ctx);
        game.start_play();
        game
    }

    pub(crate) fn record(game: &mut GameMode) -> Rc<RefCell<Vec<GameEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        game.subscribe(move |e| s.borrow_mut().push(e.clone()));
        seen
    }

    pub(crate) fn ready_player(game: &mut GameMode, name: &str) -> PlayerId {
        let id = game.login(&format!("?Name={name}"));
        game.set_ready(id, true).unwrap();
        id
    }

    pub(crate) fn run_until_started(game: &mut GameMode) {
        for _ in 0..20 {
            if game.match_state() == MatchState::InProgress {
                return;
            }
            game.tick(1.0);
        }
        panic!("match never started, stuck in {}", game.match_state());
    }

    #[test]
    fn same_state_is_a_no_op() {
        let mut game = game_with("");
        let seen = record(&mut game);

        assert!(!game.set_match_state(MatchState::WaitingToStart));
        assert!(seen.borrow().is_empty());

        assert!(game.set_match_state(MatchState::CountdownToBegin));
        assert!(!game.set_match_state(MatchState::CountdownToBegin));
        let changes = seen
            .borrow()
            .iter()
            .filter(|e| matches!(e, GameEvent::MatchStateChanged { .. }))
            .count();
        assert_eq!(changes, 1);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut game = game_with("");
        assert!(game.abort_match());
        assert!(!game.set_match_state(MatchState::InProgress));
        assert!(!game.abort_match());
        assert_eq!(game.match_state(), MatchState::Aborted);
    }

    #[test]
    fn waits_for_everyone_to_ready_up() {
        let mut game = game_with("?MinPlayers=2");
        let a = ready_player(&mut game, "Alpha");
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::WaitingToStart);
        assert_eq!(game.game_state().players_needed, 1);

        let b = game.login("?Name=Bravo");
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::WaitingToStart);

        game.set_ready(b, true).unwrap();
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::CountdownToBegin);
        assert!(game.participant(a).unwrap().pawn.is_none());
    }

    #[test]
    fn spectators_do_not_hold_up_the_start() {
        let mut game = game_with("");
        ready_player(&mut game, "Alpha");
        game.login("?Name=Watcher?SpectatorOnly=1");
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::CountdownToBegin);
    }

    #[test]
    fn caster_control_needs_a_ready_caster() {
        let mut game = game_with("?CasterControl=1");
        ready_player(&mut game, "Alpha");
        let caster = game.login("?Name=Caster?SpectatorOnly=1?Caster=1");
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::WaitingToStart);

        game.set_ready(caster, true).unwrap();
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::CountdownToBegin);
    }

    #[test]
    fn ready_wait_expiry_starts_anyway() {
        let mut game = game_with("?MaxReadyWait=3");
        game.login("?Name=Sleepy");
        for _ in 0..2 {
            game.tick(1.0);
            assert_eq!(game.match_state(), MatchState::WaitingToStart);
        }
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::CountdownToBegin);
    }

    #[test]
    fn long_wait_for_players_brings_in_bots() {
        let mut game = game_with("?MinPlayers=4?MaxPlayerWait=5");
        ready_player(&mut game, "Alpha");
        for _ in 0..7 {
            game.tick(1.0);
        }
        assert_eq!(game.config.bot_fill_count, 4);
        assert_eq!(game.num_bots(), 3);
    }

    #[test]
    fn countdown_broadcasts_five_times_then_starts() {
        let mut game = game_with("");
        let seen = record(&mut game);
        ready_player(&mut game, "Alpha");
        run_until_started(&mut game);

        let counts: Vec<u32> = seen
            .borrow()
            .iter()
            .filter_map(|e| match e {
                GameEvent::CountDown(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![5, 4, 3, 2, 1]);
        assert!(seen.borrow().contains(&GameEvent::MatchStarted));
    }

    #[test]
    fn immediate_start_skips_countdown() {
        let mut config = GameConfig::default();
        config.delayed_start = false;
        config.bot_roster.clear();
        let mut game = GameMode::new(
            "DM-Deck",
            "",
            config,
            GameContext::with_seed(NetMode::Standalone, 1),
        );
        game.start_play();
        game.login("?Name=Alpha");
        game.tick(0.1);
        assert_eq!(game.match_state(), MatchState::InProgress);
        assert!(game.participant(1).unwrap().pawn.is_some());
    }

    #[test]
    fn rename_rules() {
        let mut game = game_with("");
        let seen = record(&mut game);
        let a = game.login("?Name=Alpha");
        let b = game.login("?Name=Bravo");

        assert!(game.change_name(a, "ALPHA").is_ok());
        assert_eq!(game.participant(a).unwrap().state.name, "Alpha");

        assert_eq!(
            game.change_name(a, "bravo"),
            Err(GameError::NameTaken("bravo".to_owned()))
        );
        assert_eq!(game.participant(a).unwrap().state.name, "Alpha");
        assert!(seen
            .borrow()
            .iter()
            .any(|e| matches!(e, GameEvent::NameChangeRejected { player, .. } if *player == a)));

        game.change_name(b, "AVeryLongNameIndeedYes").unwrap();
        assert_eq!(game.participant(b).unwrap().state.name, "AVeryLongNameIn");
    }

    #[test]
    fn duplicate_login_names_get_a_default() {
        let mut game = game_with("");
        game.login("?Name=Alpha");
        let second = game.login("?Name=alpha");
        assert_eq!(
            game.participant(second).unwrap().state.name,
            format!("Player{second}")
        );
    }

    #[test]
    fn team_games_balance_new_players() {
        let mut game = game_with("?NumTeams=2");
        let a = game.login("?Name=A");
        let b = game.login("?Name=B");
        let c = game.login("?Name=C?Team=0");
        assert_eq!(game.participant(a).unwrap().state.team, 0);
        assert_eq!(game.participant(b).unwrap().state.team, 1);
        assert_eq!(game.participant(c).unwrap().state.team, 0);
    }

    #[test]
    fn rotation_picks_the_following_map() {
        let mut game = game_with("?GoalScore=1");
        game.config.map_rotation = vec!["DM-Outpost".into(), "DM-Deck".into(), "DM-Temple".into()];
        game.set_match_state(MatchState::InProgress);
        game.travel_to_next_map();
        assert_eq!(game.pending_travel(), Some("DM-Temple"));
        assert_eq!(game.match_state(), MatchState::LeavingMap);
    }

    #[test]
    fn admin_next_map_overrides_rotation() {
        let mut game = game_with("");
        game.config.map_rotation = vec!["DM-Outpost".into()];
        game.set_next_map("DM-Chill");
        game.set_match_state(MatchState::InProgress);
        game.travel_to_next_map();
        assert_eq!(game.pending_travel(), Some("DM-Chill"));
    }

    #[test]
    fn empty_server_moves_on() {
        let mut game = game_with("");
        let a = ready_player(&mut game, "Alpha");
        run_until_started(&mut game);
        game.logout(a);
        for _ in 0..19 {
            game.tick(1.0);
        }
        assert_eq!(game.match_state(), MatchState::InProgress);
        game.tick(1.0);
        assert_eq!(game.pending_travel(), Some("DM-Deck"));
    }
}
