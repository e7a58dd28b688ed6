//! Optional rule modifiers layered over the stock game rules.

use std::collections::HashMap;

use crate::error::{GameError, GameResult};
use crate::match_state::MatchState;
use crate::player::{Participant, PlayerState};
use crate::PlayerId;

/// A rule modifier. Every hook defaults to leaving the stock behaviour alone.
pub trait Mutator {
    fn name(&self) -> &str;

    /// Mutators sharing any group name cannot run together.
    fn group_names(&self) -> &[&'static str] {
        &[]
    }

    fn init(&mut self, _options: &str) {}

    fn notify_match_state_change(&mut self, _state: MatchState) {}

    /// Keeps an actor regardless of what other mutators say about it.
    fn always_keep(&self, _actor_class: &str) -> bool {
        false
    }

    /// False removes the actor from the level.
    fn check_relevance(&self, _actor_class: &str) -> bool {
        true
    }

    fn modify_damage(
        &mut self,
        _damage: &mut i32,
        _injured: &Participant,
        _instigator: Option<&Participant>,
    ) {
    }

    fn score_kill(&mut self, _killer: Option<PlayerId>, _victim: PlayerId, _damage_type: &str) {}

    fn score_damage(&mut self, _amount: i32, _victim: PlayerId, _attacker: Option<PlayerId>) {}

    fn modify_player(&mut self, _player: &mut Participant) {}

    fn notify_logout(&mut self, _player: &PlayerState) {}
}

#[derive(Default)]
pub struct MutatorChain {
    mutators: Vec<Box<dyn Mutator>>,
}

impl MutatorChain {
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.mutators.iter().map(|m| m.name()).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Mutator>> {
        self.mutators.iter_mut()
    }

    pub fn allow_mutator(&self, candidate: &dyn Mutator) -> GameResult<()> {
        for existing in &self.mutators {
            if existing.name() == candidate.name() {
                return Err(GameError::MutatorRejected {
                    name: candidate.name().to_owned(),
                    reason: "already have one".to_owned(),
                });
            }
            if let Some(group) = existing
                .group_names()
                .iter()
                .find(|g| candidate.group_names().contains(g))
            {
                return Err(GameError::MutatorRejected {
                    name: candidate.name().to_owned(),
                    reason: format!(
                        "already have mutator {} with group {group}",
                        existing.name()
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn add(&mut self, mut mutator: Box<dyn Mutator>, options: &str) -> GameResult<()> {
        self.allow_mutator(mutator.as_ref())?;
        mutator.init(options);
        log::info!("Added mutator {}", mutator.name());
        self.mutators.push(mutator);
        Ok(())
    }

    pub fn check_relevance(&self, actor_class: &str) -> bool {
        self.mutators.iter().any(|m| m.always_keep(actor_class))
            || self.mutators.iter().all(|m| m.check_relevance(actor_class))
    }

    pub fn notify_match_state_change(&mut self, state: MatchState) {
        for m in &mut self.mutators {
            m.notify_match_state_change(state);
        }
    }

    pub fn modify_damage(
        &mut self,
        damage: &mut i32,
        injured: &Participant,
        instigator: Option<&Participant>,
    ) {
        for m in &mut self.mutators {
            m.modify_damage(damage, injured, instigator);
        }
    }

    pub fn score_kill(&mut self, killer: Option<PlayerId>, victim: PlayerId, damage_type: &str) {
        for m in &mut self.mutators {
            m.score_kill(killer, victim, damage_type);
        }
    }

    pub fn score_damage(&mut self, amount: i32, victim: PlayerId, attacker: Option<PlayerId>) {
        for m in &mut self.mutators {
            m.score_damage(amount, victim, attacker);
        }
    }

    pub fn modify_player(&mut self, player: &mut Participant) {
        for m in &mut self.mutators {
            m.modify_player(player);
        }
    }

    pub fn notify_logout(&mut self, player: &PlayerState) {
        for m in &mut self.mutators {
            m.notify_logout(player);
        }
    }
}

pub type MutatorFactory = fn() -> Box<dyn Mutator>;

/// Name to constructor lookup for mutators requested by name.
pub struct MutatorRegistry {
    factories: HashMap<String, MutatorFactory>,
}

impl Default for MutatorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("Instagib", || Box::new(Instagib));
        registry.register("Hardcore", || Box::new(Hardcore));
        registry
    }
}

impl MutatorRegistry {
    pub fn register(&mut self, name: &str, factory: MutatorFactory) {
        self.factories.insert(name.to_ascii_lowercase(), factory);
    }

    /// Accepts the full name or the `Mutator_`/`UTMutator_` prefixed shorthands.
    pub fn resolve(&self, name: &str) -> Option<Box<dyn Mutator>> {
        let name = name.to_ascii_lowercase();
        let base = name
            .strip_prefix("utmutator_")
            .or_else(|| name.strip_prefix("mutator_"))
            .unwrap_or(&name);
        let candidates = [
            base.to_owned(),
            format!("mutator_{base}"),
            format!("utmutator_{base}"),
        ];
        let factory = candidates.iter().find_map(|key| self.factories.get(key))?;
        Some(factory())
    }

    /// Resolves and adds a mutator. Problems are logged and the mutator skipped.
    pub fn add_to_chain(&self, chain: &mut MutatorChain, name: &str, options: &str) -> bool {
        let Some(mutator) = self.resolve(name) else {
            log::warn!("{}", GameError::UnknownMutator(name.to_owned()));
            return false;
        };
        match chain.add(mutator, options) {
            Ok(()) => true,
            Err(e) => {
                log::info!("{e}");
                false
            }
        }
    }
}

/// One hit kills and weapon pickups are removed.
pub struct Instagib;

impl Mutator for Instagib {
    fn name(&self) -> &str {
        "Instagib"
    }

    fn group_names(&self) -> &[&'static str] {
        &["Arena"]
    }

    fn check_relevance(&self, actor_class: &str) -> bool {
        !actor_class.starts_with("Pickup")
    }

    fn modify_damage(
        &mut self,
        damage: &mut i32,
        injured: &Participant,
        instigator: Option<&Participant>,
    ) {
        if matches!(instigator, Some(i) if i.id() != injured.id()) {
            *damage = 1000;
        }
    }
}

/// Everything hurts half again as much.
pub struct Hardcore;

impl Mutator for Hardcore {
    fn name(&self) -> &str {
        "Hardcore"
    }

    fn group_names(&self) -> &[&'static str] {
        &["Damage"]
    }

    fn modify_damage(
        &mut self,
        damage: &mut i32,
        _injured: &Participant,
        _instigator: Option<&Participant>,
    ) {
        *damage = *damage * 3 / 2;
    }
}
