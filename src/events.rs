//! Broadcasts raised by the game mode and the observers that listen to them.

use crate::match_state::MatchState;
use crate::PlayerId;

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    MatchStateChanged { from: MatchState, to: MatchState },
    /// Seconds left before play begins.
    CountDown(u32),
    MatchStarted,
    Overtime,
    /// Sent to a participant eliminated before an only-the-strong-survive overtime.
    DidNotMakeTheCut(PlayerId),
    FirstBlood { killer: Option<PlayerId> },
    Death {
        killer: Option<PlayerId>,
        victim: PlayerId,
        damage_type: String,
    },
    KillingSpree { player: PlayerId, level: u32 },
    SpreeEnded { player: PlayerId, spree: u32, ended_by: Option<PlayerId> },
    MultiKill { player: PlayerId, level: u32 },
    HighScoreChanged { player: PlayerId, has_high_score: bool },
    Victory { winner: Option<PlayerId>, flawless: bool },
    ShowScoreboard,
    ShowMapVote,
    HideMapVote,
    ReturnToLobby,
    ServerTravel { map: String },
    NameChangeRejected { player: PlayerId, message: String },
    ReplayRecordingStopped,
    EndOfGameStats { reason: String, winner: Option<PlayerId> },
    PlayerStatsPersisted { player: PlayerId },
}

type Observer = Box<dyn FnMut(&GameEvent)>;

/// Ordered list of observers, each called with every emitted event.
#[derive(Default)]
pub struct EventBus {
    observers: Vec<Observer>,
}

impl EventBus {
    pub fn subscribe(&mut self, observer: impl FnMut(&GameEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn emit(&mut self, event: GameEvent) {
        log::debug!("Broadcast {event:?}");
        for observer in &mut self.observers {
            observer(&event);
        }
    }
}
