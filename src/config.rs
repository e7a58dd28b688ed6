//! Resting place for [GameConfig] & the travel URL option parser

use serde::{Deserialize, Serialize};

use crate::bots::{default_roster, BotCharacter};

/// Every tunable of a match. Defaults match a stock deathmatch server; the
/// travel URL options layered on top by [GameConfig::apply_options].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Seconds of regulation time, 0 for none. The `TimeLimit` option is given in minutes.
    pub time_limit: u32,
    /// Score that ends the match, 0 for none.
    pub goal_score: u32,
    /// Desired humans plus bots.
    pub bot_fill_count: u32,
    pub min_players_to_start: u32,
    pub game_difficulty: f32,
    /// If false the match starts as soon as it can, skipping readiness and the countdown.
    pub delayed_start: bool,
    pub allow_overtime: bool,
    pub only_the_strong_survive: bool,
    pub caster_control: bool,
    /// Seconds to wait for the minimum player count before bots are brought in, 0 waits forever.
    pub max_wait_for_players: u32,
    /// Seconds players get to ready up once enough are present, 0 waits forever.
    pub max_ready_wait_time: u32,
    pub respawn_wait_time: f32,
    pub force_respawn: bool,
    pub spawn_protection_time: f64,
    pub num_teams: u8,
    pub end_scoreboard_delay: f64,
    pub end_time_delay: f64,
    pub map_vote_time: u32,
    /// Seconds a started match may sit empty before the server moves on.
    pub auto_restart_time: u32,
    pub map_rotation: Vec<String>,
    /// Candidate maps offered to a vote after the match.
    pub map_vote_candidates: Vec<String>,
    pub mutators: Vec<String>,
    pub bot_roster: Vec<BotCharacter>,
    pub default_player_name: String,
    pub lobby: LobbyConfig,
    pub record_demo: bool,
    pub demo_filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// Non-zero when this server was launched by a lobby as a match instance.
    pub lobby_instance_id: u32,
    pub hub_address: Option<String>,
    pub hub_key: Option<String>,
    pub host_lobby_listen_port: u16,
    /// Instances that outlive empty rosters and pick their own next map.
    pub dedicated_instance: bool,
    /// Seconds between roster/time pushes. Never less than 10.
    pub update_interval: f64,
    /// Seconds a fresh instance waits for its first player.
    pub initial_timeout: f64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            lobby_instance_id: 0,
            hub_address: None,
            hub_key: None,
            host_lobby_listen_port: 14000,
            dedicated_instance: false,
            update_interval: 10.0,
            initial_timeout: 120.0,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            time_limit: 0,
            goal_score: 25,
            bot_fill_count: 0,
            min_players_to_start: 1,
            game_difficulty: 3.0,
            delayed_start: true,
            allow_overtime: true,
            only_the_strong_survive: false,
            caster_control: false,
            max_wait_for_players: 0,
            max_ready_wait_time: 0,
            respawn_wait_time: 1.5,
            force_respawn: false,
            spawn_protection_time: 2.0,
            num_teams: 0,
            end_scoreboard_delay: 2.0,
            end_time_delay: 15.0,
            map_vote_time: 60,
            auto_restart_time: 20,
            map_rotation: Vec::new(),
            map_vote_candidates: Vec::new(),
            mutators: Vec::new(),
            bot_roster: default_roster(),
            default_player_name: "Player".to_owned(),
            lobby: LobbyConfig::default(),
            record_demo: false,
            demo_filename: String::new(),
        }
    }
}

impl GameConfig {
    /// Layers a travel URL option string (`?TimeLimit=10?GoalScore=20?Bots=4`) on top of the current values.
    pub fn apply_options(&mut self, options: &str) {
        let opts = UrlOptions::parse(options);

        if let Some(v) = opts.int("Difficulty") {
            self.game_difficulty = v.max(0) as f32;
        }
        if let Some(v) = opts.int("HostPort") {
            self.lobby.host_lobby_listen_port = v.clamp(0, u16::MAX as i64) as u16;
        }
        if let Some(v) = opts.bool("ForceRespawn") {
            self.force_respawn = v;
        }
        if let Some(v) = opts.bool("OnlyStrong") {
            self.only_the_strong_survive = v;
        }
        if let Some(v) = opts.int("MaxPlayerWait") {
            self.max_wait_for_players = v.max(0) as u32;
        }
        if let Some(v) = opts.int("MaxReadyWait") {
            self.max_ready_wait_time = v.max(0) as u32;
        }
        if let Some(v) = opts.int("TimeLimit") {
            self.time_limit = (v.max(0) as u32).saturating_mul(60);
        }
        if let Some(v) = opts.int("GoalScore") {
            self.goal_score = v.max(0) as u32;
        }
        if let Some(v) = opts.int("MinPlayers") {
            self.min_players_to_start = v.max(1) as u32;
        }
        if let Some(v) = opts.int("RespawnWait") {
            self.respawn_wait_time = v.max(0) as f32;
        }
        if let Some(v) = opts.get("Hub").filter(|v| !v.is_empty()) {
            self.lobby.hub_address = Some(v.to_owned());
        }
        if let Some(v) = opts.get("HubKey").filter(|v| !v.is_empty()) {
            self.lobby.hub_key = Some(v.to_owned());
        }
        if let Some(v) = opts.int("LobbyInstanceID") {
            self.lobby.lobby_instance_id = v.max(0) as u32;
        }
        // `Bots` counts bots on top of the local player
        if let Some(v) = opts.int("Bots") {
            self.bot_fill_count = v.max(0) as u32 + 1;
        } else if let Some(v) = opts.int("BotFill") {
            self.bot_fill_count = v.max(0) as u32;
        }
        if let Some(v) = opts.bool("CasterControl") {
            self.caster_control = v;
        }
        if let Some(v) = opts.int("NumTeams") {
            self.num_teams = v.clamp(0, 4) as u8;
        }
        if let Some(list) = opts.get("Mutator").filter(|v| !v.is_empty()) {
            self.mutators.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned),
            );
        }
        if let Some(v) = opts.get("Demorec").filter(|v| !v.is_empty()) {
            self.record_demo = is_truthy(v);
            if self.record_demo {
                self.demo_filename = v.to_owned();
            }
        }
    }
}

/// `Key=Value` pairs split out of a `?`-separated option string. Keys are case-insensitive.
#[derive(Debug, Default)]
pub struct UrlOptions<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> UrlOptions<'a> {
    pub fn parse(options: &'a str) -> Self {
        let pairs = options
            .split('?')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();
        Self { pairs }
    }

    pub fn has(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// A present key with no value counts as true.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v.is_empty() || is_truthy(v))
    }
}

fn is_truthy(v: &str) -> bool {
    !["off", "false", "0", "no"]
        .iter()
        .any(|f| v.eq_ignore_ascii_case(f))
}

/// Splits a travel URL such as `DM-Deck?Bots=3` into the map name and its options.
pub fn split_travel_url(url: &str) -> (&str, &str) {
    match url.find('?') {
        Some(idx) => (&url[..idx], &url[idx..]),
        None => (url, ""),
    }
}
