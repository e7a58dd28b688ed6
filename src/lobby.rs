//! The link from a hosted match instance back to the lobby that launched it.

use crate::events::GameEvent;
use crate::game_mode::GameMode;
use crate::match_state::MatchState;
use crate::player::PlayerState;
use crate::protocol::{LobbyCommand, LobbyMessage, PlayerUpdate};

/// Lobby pushes never happen more often than this many seconds apart.
pub const MIN_LOBBY_UPDATE_INTERVAL: f64 = 10.0;
const LOCAL_HUB_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconState {
    Connecting,
    Open,
    Closed,
}

/// Where a beacon should connect to and how it introduces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyTarget {
    pub address: String,
    pub port: u16,
    pub instance_id: u32,
    pub server_guid: u128,
    pub hub_key: Option<String>,
}

/// The instance side of a lobby connection. Implementations must never block the caller.
pub trait LobbyBeacon {
    fn connection_state(&self) -> BeaconState;

    /// Queues a message for the lobby.
    fn send(&mut self, message: LobbyMessage);

    /// Commands the lobby sent since the last call.
    fn poll_commands(&mut self) -> Vec<LobbyCommand>;

    fn notify_instance_ready(&mut self) {
        self.send(LobbyMessage::InstanceReady);
    }

    fn update_match(&mut self, update: String) {
        self.send(LobbyMessage::UpdateMatch { update });
    }

    fn update_player(&mut self, player: PlayerUpdate) {
        self.send(LobbyMessage::UpdatePlayer(player));
    }

    fn update_badge(&mut self, instance_id: u32, badge: String) {
        self.send(LobbyMessage::UpdateBadge { instance_id, badge });
    }

    fn end_game(&mut self, stats: String) {
        self.send(LobbyMessage::EndGame { stats });
    }

    fn empty(&mut self) {
        self.send(LobbyMessage::Empty);
    }
}

/// Opens beacons. Supplied by whatever hosts the game mode.
pub trait BeaconConnector {
    fn connect(&mut self, target: &LobbyTarget) -> Box<dyn LobbyBeacon>;
}

impl GameMode {
    /// Launched by a lobby to host a single match.
    pub fn is_game_instance_server(&self) -> bool {
        self.config.lobby.lobby_instance_id > 0
    }

    /// Drops any current beacon and dials the lobby again.
    pub fn recreate_lobby_beacon(&mut self) {
        if !self.is_game_instance_server() {
            return;
        }
        self.beacon = None;

        let lobby = &self.config.lobby;
        let target = LobbyTarget {
            address: lobby
                .hub_address
                .clone()
                .unwrap_or_else(|| LOCAL_HUB_ADDRESS.to_owned()),
            port: lobby.host_lobby_listen_port,
            instance_id: lobby.lobby_instance_id,
            server_guid: self.server_guid,
            hub_key: lobby.hub_key.clone(),
        };

        match self.ctx.beacon_connector.as_mut() {
            Some(connector) => {
                log::info!(
                    "Connecting lobby beacon to {}:{} as instance {}",
                    target.address, target.port, target.instance_id
                );
                self.beacon = Some(connector.connect(&target));
            }
            None => log::warn!("Game instance has no way to reach its lobby"),
        }
    }

    pub(crate) fn beacon_closed(&self) -> bool {
        self.beacon
            .as_ref()
            .map_or(false, |b| b.connection_state() == BeaconState::Closed)
    }

    pub(crate) fn with_beacon(&mut self, f: impl FnOnce(&mut dyn LobbyBeacon)) {
        if let Some(beacon) = self.beacon.as_mut() {
            f(beacon.as_mut());
        }
    }

    pub fn notify_lobby_game_is_ready(&mut self) {
        if self.is_game_instance_server() {
            if let Some(beacon) = self.beacon.as_mut() {
                beacon.notify_instance_ready();
            }
        }
    }

    pub(crate) fn send_player_update(&mut self, state: &PlayerState, left: bool) {
        let update = PlayerUpdate {
            player_id: state.player_id,
            name: state.name.clone(),
            score: state.score as i32,
            spectator: state.only_spectator,
            left,
            average_rank: 0,
        };
        if let Some(beacon) = self.beacon.as_mut() {
            beacon.update_player(update);
        }
    }

    /// Pushes the roster, the badge and the match clock to the lobby.
    pub fn update_lobby_match_stats(&mut self) {
        self.update_lobby_player_list();
        self.update_lobby_badge();

        let gs = &self.game_state;
        let game_time = if gs.time_limit > 0 {
            gs.remaining_time
        } else {
            gs.elapsed_time
        };
        if let Some(beacon) = self.beacon.as_mut() {
            beacon.update_match(format!("GameTime={game_time}"));
        }
    }

    pub fn update_lobby_player_list(&mut self) {
        let humans: Vec<PlayerState> = self
            .participants
            .values()
            .filter(|p| !p.is_bot())
            .map(|p| p.state.clone())
            .collect();
        for state in &humans {
            self.send_player_update(state, false);
        }
    }

    pub fn update_lobby_badge(&mut self) {
        let badge = format!("{}\n{} Players", self.map_name(), self.num_players());
        let instance_id = self.config.lobby.lobby_instance_id;
        if let Some(beacon) = self.beacon.as_mut() {
            beacon.update_badge(instance_id, badge);
        }
    }

    /// Tells every client to head back to the lobby.
    pub fn send_everyone_back_to_lobby(&mut self) {
        log::info!("Sending everyone back to the lobby");
        self.events.emit(GameEvent::ReturnToLobby);
    }

    /// The lobby handed this instance over to run matches on its own.
    pub fn become_dedicated_instance(&mut self, hub_guid: u128) {
        log::info!("Becoming a dedicated instance for hub {hub_guid:#X}");
        self.config.lobby.dedicated_instance = true;
        self.game_state.hub_guid = Some(hub_guid);
    }

    pub fn force_lobby_update(&mut self) {
        self.last_lobby_update_time = self.world_time();
        self.update_lobby_match_stats();
    }

    pub(crate) fn process_lobby_commands(&mut self) {
        let commands = match self.beacon.as_mut() {
            Some(beacon) => beacon.poll_commands(),
            None => return,
        };
        for command in commands {
            match command {
                LobbyCommand::BecomeDedicatedInstance { hub_guid } => {
                    self.become_dedicated_instance(hub_guid)
                }
                LobbyCommand::ForceUpdate => self.force_lobby_update(),
                LobbyCommand::Terminate => self.request_exit("terminated by the lobby"),
            }
        }
    }

    /// Pushes match state to the lobby every interval. Checks for an empty instance on every pass.
    pub(crate) fn sync_lobby(&mut self) {
        let now = self.world_time();
        let interval = self
            .config
            .lobby
            .update_interval
            .max(MIN_LOBBY_UPDATE_INTERVAL);
        if now - self.last_lobby_update_time >= interval {
            self.last_lobby_update_time = now;
            self.update_lobby_match_stats();
        }

        if self.config.lobby.dedicated_instance || self.num_players() > 0 {
            return;
        }

        if self.match_state() != MatchState::WaitingToStart {
            log::info!("Instance is empty, returning it to the lobby");
            self.send_everyone_back_to_lobby();
            self.with_beacon(|b| b.empty());
            self.set_match_state(MatchState::LeavingMap);
        } else if now > self.config.lobby.initial_timeout {
            log::info!("Nobody joined within {}s", self.config.lobby.initial_timeout);
            self.with_beacon(|b| b.empty());
            self.set_match_state(MatchState::LeavingMap);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::config::GameConfig;
    use crate::game_mode::{GameContext, NetMode};

    #[derive(Default)]
    pub(crate) struct Wire {
        pub state: Option<BeaconState>,
        pub sent: Vec<LobbyMessage>,
        pub commands: Vec<LobbyCommand>,
        pub connects: u32,
    }

    pub(crate) struct MockBeacon(Rc<RefCell<Wire>>);

    impl LobbyBeacon for MockBeacon {
        fn connection_state(&self) -> BeaconState {
            self.0.borrow().state.unwrap_or(BeaconState::Open)
        }

        fn send(&mut self, message: LobbyMessage) {
            self.0.borrow_mut().sent.push(message);
        }

        fn poll_commands(&mut self) -> Vec<LobbyCommand> {
            std::mem::take(&mut self.0.borrow_mut().commands)
        }
    }

    pub(crate) struct MockConnector(pub Rc<RefCell<Wire>>);

    impl BeaconConnector for MockConnector {
        fn connect(&mut self, _target: &LobbyTarget) -> Box<dyn LobbyBeacon> {
            let mut wire = self.0.borrow_mut();
            wire.connects += 1;
            wire.state = None;
            Box::new(MockBeacon(self.0.clone()))
        }
    }

    pub(crate) fn instance(options: &str) -> (GameMode, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let config = GameConfig {
            bot_roster: Vec::new(),
            ..Default::default()
        };
        let ctx = GameContext::with_seed(NetMode::DedicatedServer, 9)
            .with_beacon_connector(Box::new(MockConnector(wire.clone())));
        let mut game = GameMode::new("DM-Deck", options, config, ctx);
        game.start_play();
        (game, wire)
    }

    #[test]
    fn instance_announces_itself() {
        let (game, wire) = instance("?LobbyInstanceID=4");
        assert!(game.is_game_instance_server());
        assert_eq!(wire.borrow().connects, 1);
        assert_eq!(wire.borrow().sent, vec![LobbyMessage::InstanceReady]);
    }

    #[test]
    fn plain_servers_have_no_beacon() {
        let (game, wire) = instance("");
        assert!(!game.is_game_instance_server());
        assert_eq!(wire.borrow().connects, 0);
    }

    #[test]
    fn periodic_push_reports_time() {
        let (mut game, wire) = instance("?LobbyInstanceID=4?TimeLimit=5");
        game.login("?Name=Alpha");
        wire.borrow_mut().sent.clear();

        for _ in 0..9 {
            game.tick(1.0);
        }
        assert!(wire.borrow().sent.is_empty());

        game.tick(1.0);
        let sent = wire.borrow().sent.clone();
        assert!(sent.contains(&LobbyMessage::UpdateBadge {
            instance_id: 4,
            badge: "DM-Deck\n1 Players".to_owned(),
        }));
        assert!(sent.iter().any(|m| matches!(m,
            LobbyMessage::UpdatePlayer(p) if p.name == "Alpha" && !p.left)));
        assert!(sent.contains(&LobbyMessage::UpdateMatch {
            update: "GameTime=0".to_owned(),
        }));
    }

    #[test]
    fn lost_beacon_reconnects_while_players_remain() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        game.login("?Name=Alpha");
        wire.borrow_mut().state = Some(BeaconState::Closed);

        game.tick(1.0);
        assert_eq!(wire.borrow().connects, 2);
        assert!(!game.exit_requested());
    }

    #[test]
    fn lost_beacon_on_an_empty_instance_exits() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        let a = game.login("?Name=Alpha");
        game.set_ready(a, true).unwrap();
        game.tick(1.0);
        assert_eq!(game.match_state(), MatchState::CountdownToBegin);

        game.logout(a);
        wire.borrow_mut().state = Some(BeaconState::Closed);
        game.tick(1.0);
        assert!(game.exit_requested());
        assert_eq!(wire.borrow().connects, 1);
    }

    #[test]
    fn lobby_commands_are_applied() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        wire.borrow_mut()
            .commands
            .push(LobbyCommand::BecomeDedicatedInstance { hub_guid: 0xAB });
        game.tick(1.0);
        assert!(game.config.lobby.dedicated_instance);
        assert_eq!(game.game_state().hub_guid, Some(0xAB));

        wire.borrow_mut().commands.push(LobbyCommand::Terminate);
        game.tick(1.0);
        assert!(game.exit_requested());
    }

    #[test]
    fn emptied_instance_returns_to_lobby() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        let seen = crate::game_mode::tests::record(&mut game);
        let a = game.login("?Name=Alpha");
        game.set_ready(a, true).unwrap();
        game.tick(1.0);
        game.logout(a);

        game.tick(1.0);
        assert!(wire.borrow().sent.contains(&LobbyMessage::Empty));
        assert!(seen.borrow().contains(&GameEvent::ReturnToLobby));
        assert_eq!(game.match_state(), MatchState::LeavingMap);
    }

    #[test]
    fn spectators_alone_do_not_keep_an_instance() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        let a = game.login("?Name=Alpha");
        game.login("?Name=Watcher?SpectatorOnly=1");
        game.set_ready(a, true).unwrap();
        game.tick(1.0);
        assert_eq!(game.num_spectators(), 1);

        game.logout(a);
        game.tick(1.0);
        assert!(wire.borrow().sent.contains(&LobbyMessage::Empty));
        assert_eq!(game.match_state(), MatchState::LeavingMap);
    }

    #[test]
    fn dedicated_instance_stays_up_when_empty() {
        let (mut game, wire) = instance("?LobbyInstanceID=4");
        let a = game.login("?Name=Alpha");
        game.set_ready(a, true).unwrap();
        game.become_dedicated_instance(0xAB);
        game.tick(1.0);
        game.logout(a);

        for _ in 0..15 {
            game.tick(1.0);
        }
        assert!(!wire.borrow().sent.contains(&LobbyMessage::Empty));
        assert_ne!(game.match_state(), MatchState::LeavingMap);
    }
}
