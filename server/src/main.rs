use std::time::{Duration, Instant};

use anyhow::Context;
use beacon::TcpBeaconConnector;
use tokio::runtime::Handle;
use utmatch::config::{split_travel_url, GameConfig};
use utmatch::game_mode::NetMode;
use utmatch::{GameContext, GameMode};

mod beacon;

const DEFAULT_TRAVEL_URL: &str = "DM-Deck?Bots=3";
const TICK_RATE: u64 = 30;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_TRAVEL_URL.to_owned());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(serve(url))
}

/// Runs matches back to back, following each server travel, until one asks to exit.
async fn serve(mut url: String) -> anyhow::Result<()> {
    loop {
        let (map, options) = split_travel_url(&url);
        let ctx = GameContext::new(NetMode::DedicatedServer)
            .with_beacon_connector(Box::new(TcpBeaconConnector::new(Handle::current())));
        let mut game = GameMode::new(map, options, GameConfig::default(), ctx);
        game.start_play();

        match run_match(&mut game).await {
            Some(next_map) => url = format!("{next_map}{options}"),
            None => {
                log::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// Ticks `game` at a fixed rate. Returns the map to load next, if any.
async fn run_match(game: &mut GameMode) -> Option<String> {
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / TICK_RATE));
    let mut last = Instant::now();

    loop {
        interval.tick().await;
        let now = Instant::now();
        game.tick(now.duration_since(last).as_secs_f64());
        last = now;

        if game.exit_requested() {
            return None;
        }
        if let Some(map) = game.pending_travel() {
            return Some(map.to_owned());
        }
        if game.match_state().is_terminal() {
            return None;
        }
    }
}
