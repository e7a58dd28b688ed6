//! Bot roster, fill and removal.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{GameError, GameResult};
use crate::game_mode::GameMode;
use crate::player::{BotController, Controller, Participant, PlayerState};
use crate::{PlayerId, TeamId, NO_TEAM};

/// Seconds without sight of an enemy after which a bot may be removed mid-fight.
const BOT_LOST_CONTACT_TIME: f64 = 5.0;

/// A bot personality the server can spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotCharacter {
    pub name: String,
    /// Names tried in turn when `name` is already in the match.
    #[serde(default)]
    pub alt_names: Vec<String>,
    pub skill: f32,
    /// Asset the bot's model is built from.
    pub character: String,
}

impl BotCharacter {
    fn new(name: &str, alt_names: &[&str], skill: f32, character: &str) -> Self {
        Self {
            name: name.to_owned(),
            alt_names: alt_names.iter().map(|s| (*s).to_owned()).collect(),
            skill,
            character: character.to_owned(),
        }
    }
}

pub fn default_roster() -> Vec<BotCharacter> {
    vec![
        BotCharacter::new("Damian", &["Dante"], 1.0, "Skaarj"),
        BotCharacter::new("Kragoth", &[], 1.5, "Necris"),
        BotCharacter::new("Leeb", &["Lauren"], 2.0, "Malcolm"),
        BotCharacter::new("Picard", &["Nikita"], 2.5, "Malcolm"),
        BotCharacter::new("Genghis", &["Gaius"], 3.0, "Skaarj"),
        BotCharacter::new("Taye", &["Tamika"], 3.5, "Malcolm"),
        BotCharacter::new("Samael", &[], 4.0, "Necris"),
        BotCharacter::new("Guan", &["Gkublok"], 4.5, "Skaarj"),
        BotCharacter::new("Aryss", &["Ariel"], 5.0, "Necris"),
        BotCharacter::new("Othello", &["Oracle"], 5.5, "Malcolm"),
        BotCharacter::new("Loque", &["Lilith"], 6.0, "Necris"),
        BotCharacter::new("Xan", &[], 7.0, "Skaarj"),
    ]
}

impl GameMode {
    /// Adds or removes bots until humans plus bots reach the fill count.
    /// Only one bot is removed per call so a departing bot never strands a fight.
    pub fn check_bot_count(&mut self) {
        if self.match_state().has_match_ended() {
            return;
        }
        let fill = self.config.bot_fill_count;

        if self.num_players() + self.num_bots() > fill {
            let removable = self
                .participants
                .values()
                .filter(|p| p.is_bot())
                .map(Participant::id)
                .find(|id| self.allow_removing_bot(*id));
            if let Some(id) = removable {
                log::info!("Removing bot {id:#X} to match fill count {fill}");
                self.logout(id);
            }
        } else {
            while self.num_players() + self.num_bots() < fill {
                self.add_bot(NO_TEAM);
            }
        }
    }

    /// A bot can be removed unless doing so would take away something the match is about.
    pub fn allow_removing_bot(&self, id: PlayerId) -> bool {
        let Some(p) = self.participant(id) else {
            return false;
        };
        let Some(bot) = p.bot() else {
            return false;
        };

        if p.state.carried_object.is_some() {
            return false;
        }

        // never pull the outright leader while there are other bots to take
        if self.num_bots() > 1 {
            let sole_leader = self
                .participants
                .values()
                .filter(|other| other.id() != id)
                .all(|other| other.state.score < p.state.score);
            if sole_leader {
                return false;
            }
        }

        p.pawn.is_none()
            || bot.enemy.is_none()
            || bot.lost_contact(self.world_time(), BOT_LOST_CONTACT_TIME)
    }

    /// Adds a bot whose skill suits the game difficulty.
    pub fn add_bot(&mut self, team: TeamId) -> PlayerId {
        let difficulty = self.config.game_difficulty;
        let eligible: Vec<BotCharacter> = self
            .config
            .bot_roster
            .iter()
            .filter(|c| c.skill >= difficulty - 0.5 && c.skill < difficulty + 1.0)
            .cloned()
            .collect();

        match eligible.choose(&mut self.ctx.rng).cloned() {
            Some(character) => self.spawn_bot(Some(&character), team),
            None => self.spawn_bot(None, team),
        }
    }

    /// Adds the roster bot called `name`, matching case-insensitively.
    pub fn add_named_bot(&mut self, name: &str, team: TeamId) -> GameResult<PlayerId> {
        let character = self
            .config
            .bot_roster
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned();
        match character {
            Some(character) => Ok(self.spawn_bot(Some(&character), team)),
            None => {
                let err = GameError::BotCharacterNotFound(name.to_owned());
                log::error!("{err}");
                Err(err)
            }
        }
    }

    /// Adds a bot and raises the fill count so it stays.
    pub fn force_add_bot(&mut self, team: TeamId) -> PlayerId {
        self.config.bot_fill_count = self.config.bot_fill_count.max(self.num_players()) + 1;
        self.add_bot(team)
    }

    /// Sets the fill to `count` bots on top of the humans present.
    pub fn set_bot_count(&mut self, count: u32) {
        self.config.bot_fill_count = self.num_players() + count;
        self.check_bot_count();
    }

    pub fn add_bots(&mut self, count: u32) {
        self.config.bot_fill_count = self.num_players() + self.num_bots() + count;
        self.check_bot_count();
    }

    /// Removes every bot and stops bot fill.
    pub fn kill_bots(&mut self) {
        self.config.bot_fill_count = 0;
        let bots: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| p.is_bot())
            .map(Participant::id)
            .collect();
        for id in bots {
            self.logout(id);
        }
    }

    /// First free of the character's name and its alternates. Past that each
    /// of them is tried again with `-2`, `-3`, ... appended.
    pub fn unique_bot_name(&self, character: &BotCharacter) -> String {
        let names: Vec<&String> = std::iter::once(&character.name)
            .chain(&character.alt_names)
            .collect();
        if let Some(free) = names.iter().find(|name| !self.is_name_taken(name, None)) {
            return (*free).clone();
        }
        (2..)
            .flat_map(|i| names.iter().map(move |name| format!("{name}-{i}")))
            .find(|name| !self.is_name_taken(name, None))
            .unwrap_or_default()
    }

    fn spawn_bot(&mut self, character: Option<&BotCharacter>, team: TeamId) -> PlayerId {
        let id = self.next_id();
        let (name, controller) = match character {
            Some(c) => (
                self.unique_bot_name(c),
                BotController {
                    skill: c.skill,
                    character: Some(c.character.clone()),
                    enemy: None,
                    last_enemy_seen_time: 0.0,
                },
            ),
            None => {
                log::warn!(
                    "Failed to find bot data for difficulty {}, using a test bot",
                    self.config.game_difficulty
                );
                (
                    self.fallback_bot_name(),
                    BotController {
                        skill: self.config.game_difficulty,
                        character: None,
                        enemy: None,
                        last_enemy_seen_time: 0.0,
                    },
                )
            }
        };

        let mut state = PlayerState::new(id, name);
        state.ready_to_play = true;
        self.participants
            .insert(id, Participant::new(state, Controller::Bot(controller)));
        self.change_team(id, team);
        self.generic_player_initialization(id);
        log::info!("Bot {id:#X} joined the match");

        if self.match_state().is_match_in_progress() {
            self.restart_player(id);
        }
        id
    }

    fn fallback_bot_name(&mut self) -> String {
        loop {
            let name = match self.fallback_bot_names {
                0 => "TestBot".to_owned(),
                n => format!("TestBot_{n}"),
            };
            self.fallback_bot_names += 1;
            if !self.is_name_taken(&name, None) {
                return name;
            }
        }
    }
}
