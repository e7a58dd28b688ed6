use std::cell::RefCell;
use std::rc::Rc;

use utmatch::config::GameConfig;
use utmatch::events::GameEvent;
use utmatch::game_mode::NetMode;
use utmatch::{GameContext, GameMode, MatchState, PlayerId, NO_TEAM};

fn new_game(options: &str, config: GameConfig) -> (GameMode, Rc<RefCell<Vec<GameEvent>>>) {
    let mut game = GameMode::new(
        "DM-Deck",
        options,
        config,
        GameContext::with_seed(NetMode::DedicatedServer, 2024),
    );
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    game.subscribe(move |e| s.borrow_mut().push(e.clone()));
    game.start_play();
    (game, seen)
}

fn no_bots() -> GameConfig {
    GameConfig {
        bot_roster: Vec::new(),
        ..Default::default()
    }
}

fn join_ready(game: &mut GameMode, name: &str) -> PlayerId {
    let id = game.login(&format!("?Name={name}"));
    game.set_ready(id, true).unwrap();
    id
}

fn start(game: &mut GameMode) {
    for _ in 0..20 {
        if game.match_state() == MatchState::InProgress {
            return;
        }
        game.tick(1.0);
    }
    panic!("match never started");
}

fn states(seen: &Rc<RefCell<Vec<GameEvent>>>) -> Vec<MatchState> {
    seen.borrow()
        .iter()
        .filter_map(|e| match e {
            GameEvent::MatchStateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

#[test]
fn full_match_walks_the_state_machine() {
    let (mut game, seen) = new_game("?GoalScore=2", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);

    game.killed(Some(a), b, "Link");
    game.killed(Some(a), b, "Link");
    for _ in 0..20 {
        game.tick(1.0);
    }

    assert_eq!(
        states(&seen),
        vec![
            MatchState::WaitingToStart,
            MatchState::CountdownToBegin,
            MatchState::InProgress,
            MatchState::WaitingPostMatch,
            MatchState::LeavingMap,
        ]
    );
    let events = seen.borrow();
    assert!(events.contains(&GameEvent::Victory {
        winner: Some(a),
        flawless: true,
    }));
    assert!(events.contains(&GameEvent::ShowScoreboard));
    assert_eq!(game.pending_travel(), Some("DM-Deck"));
}

#[test]
fn repeated_state_is_not_re_entered() {
    let (mut game, seen) = new_game("", no_bots());
    join_ready(&mut game, "Alpha");
    start(&mut game);
    let before = states(&seen).len();

    assert!(!game.set_match_state(MatchState::InProgress));
    assert_eq!(states(&seen).len(), before);
    let started = seen
        .borrow()
        .iter()
        .filter(|e| **e == GameEvent::MatchStarted)
        .count();
    assert_eq!(started, 1);
}

#[test]
fn suicides_never_count_as_kills() {
    let (mut game, _) = new_game("", no_bots());
    let a = join_ready(&mut game, "Alpha");
    start(&mut game);
    game.participant_mut(a).unwrap().state.score = 4.0;

    game.killed(None, a, "Fell");
    let p = game.participant(a).unwrap();
    assert_eq!(p.state.score, 3.0);
    assert_eq!(p.state.suicides, 1);
    assert_eq!(p.state.kills, 0);
}

#[test]
fn reaching_goal_score_ends_at_once() {
    let (mut game, _) = new_game("?GoalScore=10?TimeLimit=20", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);

    game.participant_mut(a).unwrap().state.score = 8.0;
    game.killed(Some(a), b, "Shock");
    assert_eq!(game.participant(a).unwrap().state.score, 9.0);
    assert_eq!(game.match_state(), MatchState::InProgress);

    game.restart_player(b);
    game.killed(Some(a), b, "Shock");
    assert_eq!(game.participant(a).unwrap().state.score, 10.0);
    assert_eq!(game.match_state(), MatchState::WaitingPostMatch);
    assert_eq!(game.game_state().winner, Some(a));
    assert!(game.game_state().remaining_time > 0);
}

#[test]
fn warmup_kills_leave_the_match_to_be_played() {
    let (mut game, seen) = new_game("?GoalScore=1", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");

    game.killed(Some(a), b, "Link");
    assert_eq!(game.match_state(), MatchState::WaitingToStart);
    assert!(!game.has_game_ended());

    start(&mut game);
    assert_eq!(game.participant(a).unwrap().state.score, 0.0);
    game.killed(Some(a), b, "Link");
    assert_eq!(game.match_state(), MatchState::WaitingPostMatch);
    assert_eq!(game.game_state().winner, Some(a));

    for _ in 0..20 {
        game.tick(1.0);
    }
    assert_eq!(
        states(&seen),
        vec![
            MatchState::WaitingToStart,
            MatchState::CountdownToBegin,
            MatchState::InProgress,
            MatchState::WaitingPostMatch,
            MatchState::LeavingMap,
        ]
    );
}

#[test]
fn kills_after_an_abort_are_ignored() {
    let (mut game, _) = new_game("?GoalScore=5", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);
    game.killed(Some(a), b, "Link");
    game.restart_player(b);

    assert!(game.abort_match());
    game.killed(Some(a), b, "Link");
    game.killed(None, a, "Lava");
    let p = game.participant(a).unwrap();
    assert_eq!(p.state.score, 1.0);
    assert_eq!(p.state.kills, 1);
    assert_eq!(p.state.suicides, 0);
    assert_eq!(game.participant(b).unwrap().state.deaths, 1);
}

#[test]
fn tied_time_limit_goes_to_overtime() {
    let (mut game, seen) = new_game("?TimeLimit=1", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);
    game.participant_mut(a).unwrap().state.score = 5.0;
    game.participant_mut(b).unwrap().state.score = 5.0;

    for _ in 0..60 {
        game.tick(1.0);
    }
    let tail: Vec<MatchState> = states(&seen).into_iter().rev().take(2).collect();
    assert_eq!(
        tail,
        vec![
            MatchState::MatchIsInOvertime,
            MatchState::MatchEnteringOvertime
        ]
    );
    assert!(!game.has_game_ended());
    assert!(seen.borrow().contains(&GameEvent::Overtime));
    assert!(game.game_state().stop_game_clock);

    // the next second with a leader decides it
    game.killed(Some(b), a, "Rocket");
    game.tick(1.0);
    assert_eq!(game.match_state(), MatchState::WaitingPostMatch);
    assert_eq!(game.game_state().winner, Some(b));
}

#[test]
fn only_the_strong_survive_overtime() {
    let (mut game, seen) = new_game("?TimeLimit=1?OnlyStrong=1", no_bots());
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    let c = join_ready(&mut game, "Charlie");
    start(&mut game);
    game.participant_mut(a).unwrap().state.score = 5.0;
    game.participant_mut(b).unwrap().state.score = 5.0;
    game.participant_mut(c).unwrap().state.score = 3.0;
    game.killed(None, b, "Lava");
    game.participant_mut(b).unwrap().state.score = 5.0;

    for _ in 0..60 {
        game.tick(1.0);
    }
    assert_eq!(game.match_state(), MatchState::MatchIsInOvertime);
    assert!(seen.borrow().contains(&GameEvent::DidNotMakeTheCut(c)));

    let loser = game.participant(c).unwrap();
    assert!(loser.spectating && loser.pawn.is_none());
    assert!(game.participant(b).unwrap().pawn.is_some());
    assert!(!game.request_restart(c));

    // no second lives in a sudden death overtime
    game.killed(Some(a), b, "Link");
    for _ in 0..5 {
        game.tick(1.0);
    }
    assert!(game.participant(b).unwrap().spectating);
}

#[test]
fn flag_carrier_bot_survives_a_lower_fill() {
    let (mut game, _) = new_game("?BotFill=3", no_bots());
    join_ready(&mut game, "Alpha");
    let carrier = game
        .participants()
        .find(|p| p.is_bot())
        .map(|p| p.id())
        .unwrap();
    game.participant_mut(carrier).unwrap().state.carried_object = Some(1);

    game.set_bot_count(0);
    for _ in 0..5 {
        game.check_bot_count();
    }
    assert_eq!(game.num_bots(), 1);
    assert!(game.participant(carrier).is_some());

    game.participant_mut(carrier).unwrap().state.carried_object = None;
    game.check_bot_count();
    assert_eq!(game.num_bots(), 0);
}

#[test]
fn bot_fill_converges() {
    let (mut game, _) = new_game("", GameConfig::default());
    join_ready(&mut game, "Alpha");
    join_ready(&mut game, "Bravo");

    for target in [6, 2, 9, 3, 0] {
        game.config.bot_fill_count = target;
        for _ in 0..10 {
            game.check_bot_count();
        }
        assert_eq!(
            game.num_players() + game.num_bots(),
            target.max(game.num_players())
        );
    }
}

#[test]
fn bots_join_on_their_own_team() {
    let (mut game, _) = new_game("?NumTeams=2?BotFill=4", GameConfig::default());
    join_ready(&mut game, "Alpha");
    let mut sizes = [0; 2];
    for p in game.participants() {
        assert_ne!(p.state.team, NO_TEAM);
        sizes[p.state.team as usize] += 1;
    }
    assert_eq!(sizes, [2, 2]);
}

fn voting_game(
    options: &str,
    candidates: &[&str],
) -> (GameMode, Rc<RefCell<Vec<GameEvent>>>, PlayerId, PlayerId) {
    let config = GameConfig {
        map_vote_candidates: candidates.iter().map(|m| (*m).to_owned()).collect(),
        ..no_bots()
    };
    let (mut game, seen) = new_game(&format!("?GoalScore=1{options}"), config);
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);
    game.killed(Some(a), b, "Link");
    for _ in 0..16 {
        game.tick(1.0);
    }
    (game, seen, a, b)
}

#[test]
fn majority_vote_travels_early() {
    let (mut game, seen, a, b) = voting_game("", &["DM-Outpost", "DM-Temple", "DM-Chill"]);
    assert_eq!(game.match_state(), MatchState::MapVoteHappening);
    assert!(seen.borrow().contains(&GameEvent::ShowMapVote));

    assert!(game.register_map_vote(a, "DM-Temple"));
    game.tick(1.0);
    assert_eq!(game.match_state(), MatchState::MapVoteHappening);

    assert!(game.register_map_vote(b, "DM-Temple"));
    game.tick(1.0);
    assert_eq!(game.pending_travel(), Some("DM-Temple"));
    assert!(seen.borrow().contains(&GameEvent::HideMapVote));
}

#[test]
fn silent_vote_on_a_plain_server_keeps_the_server_up() {
    let (mut game, seen, _, _) = voting_game("", &["DM-Outpost", "DM-Temple"]);
    assert_eq!(game.match_state(), MatchState::MapVoteHappening);

    for _ in 0..62 {
        game.tick(1.0);
    }
    assert_eq!(game.match_state(), MatchState::LeavingMap);
    assert_eq!(game.pending_travel(), Some("DM-Deck"));
    assert!(!seen.borrow().contains(&GameEvent::ReturnToLobby));
}

#[test]
fn silent_vote_on_a_plain_server_follows_the_rotation() {
    let config = GameConfig {
        map_vote_candidates: vec!["DM-Outpost".into(), "DM-Temple".into()],
        map_rotation: vec!["DM-Deck".into(), "DM-Chill".into()],
        ..no_bots()
    };
    let (mut game, _) = new_game("?GoalScore=1", config);
    let a = join_ready(&mut game, "Alpha");
    let b = join_ready(&mut game, "Bravo");
    start(&mut game);
    game.killed(Some(a), b, "Link");

    for _ in 0..80 {
        game.tick(1.0);
    }
    assert_eq!(game.match_state(), MatchState::LeavingMap);
    assert_eq!(game.pending_travel(), Some("DM-Chill"));
}

#[test]
fn silent_vote_on_an_instance_sends_everyone_to_the_lobby() {
    let (mut game, seen, _, _) = voting_game("?LobbyInstanceID=7", &["DM-Outpost", "DM-Temple"]);
    assert!(game.is_game_instance_server());
    assert_eq!(game.match_state(), MatchState::MapVoteHappening);

    for _ in 0..62 {
        game.tick(1.0);
    }
    assert_eq!(game.match_state(), MatchState::LeavingMap);
    assert_eq!(game.pending_travel(), None);
    assert!(seen.borrow().contains(&GameEvent::ReturnToLobby));
}
