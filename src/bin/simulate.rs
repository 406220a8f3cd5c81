use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use lords_rust_server::clock::{Clock, ManualClock};
use lords_rust_server::config::{MapParams, TickSpeed};
use lords_rust_server::engine::{MatchEngine, TickOutcome};
use lords_rust_server::reconciliation::{ObserverSync, UpdateDecision};
use lords_rust_server::rng::Rng;
use lords_rust_server::types::{
    Coord, GameState, MatchEvent, MatchPlayer, MovementIntent, PlayerId,
};
use lords_rust_server::validator::validate_state;
use lords_rust_server::visibility::project_for;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs headless bot matches and reports one JSON line each")]
struct Cli {
    #[arg(long, default_value_t = 1)]
    matches: usize,
    #[arg(long, default_value_t = 2)]
    players: usize,
    #[arg(long, default_value_t = 30)]
    width: i32,
    #[arg(long, default_value_t = 30)]
    height: i32,
    #[arg(long, default_value_t = 8)]
    territories: usize,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, default_value_t = 3_000)]
    max_ticks: u64,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchResultLine {
    match_id: String,
    seed: u32,
    players: usize,
    winner: Option<PlayerId>,
    ticks: u64,
    final_version: u64,
    eliminated: Vec<PlayerId>,
    lords_captured: usize,
    territories_captured: usize,
    finished: bool,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    match_count: usize,
    finished_count: usize,
    anomaly_count: usize,
    average_ticks: u64,
    winners: BTreeMap<String, usize>,
    matches: Vec<MatchResultLine>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let base_seed = cli.seed.unwrap_or_else(rand::random::<u32>);
    let params = MapParams {
        territory_count: cli.territories,
        ..MapParams::with_size(cli.width, cli.height)
    };
    if let Err(err) = params.validate() {
        error!(%err, "invalid map parameters");
        std::process::exit(2);
    }

    let mut results = Vec::new();
    for index in 0..cli.matches {
        let seed = base_seed.wrapping_add(index as u32);
        let result = match run_match(&params, cli.players.max(1), seed, cli.max_ticks) {
            Ok(result) => result,
            Err(message) => {
                error!(seed, %message, "match could not start");
                std::process::exit(2);
            }
        };
        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(%err, "result line failed to serialize"),
        }
        results.push(result);
    }

    let summary = build_run_summary(results);
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(path = %path.to_string_lossy(), %err, "summary write failed");
            std::process::exit(2);
        }
    }
    info!(
        matches = summary.match_count,
        finished = summary.finished_count,
        anomalies = summary.anomaly_count,
        average_ticks = summary.average_ticks,
        "run finished"
    );
    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn run_match(
    params: &MapParams,
    player_count: usize,
    seed: u32,
    max_ticks: u64,
) -> Result<MatchResultLine, String> {
    let players: Vec<MatchPlayer> = (0..player_count)
        .map(|idx| MatchPlayer {
            id: PlayerId::new(format!("bot_{}", idx + 1)),
            name: format!("Bot-{:02}", idx + 1),
        })
        .collect();
    let clock = ManualClock::new(0);
    let mut rng = Rng::new(seed);
    let mut engine = MatchEngine::new(
        format!("sim-{seed}"),
        params.clone(),
        &players,
        TickSpeed::Fast,
        &mut rng,
        clock.now_ms(),
    )
    .map_err(|err| err.to_string())?;
    info!(seed, players = player_count, "simulation started");

    let mut observers: BTreeMap<PlayerId, ObserverSync> = players
        .iter()
        .map(|p| (p.id.clone(), ObserverSync::new(3)))
        .collect();
    for sync in observers.values_mut() {
        sync.on_update(engine.version());
    }

    let mut anomalies = Vec::new();
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut lords_captured = 0;
    let mut territories_captured = 0;

    while !engine.is_over() && engine.state().tick < max_ticks {
        issue_bot_orders(&mut engine, &mut rng);
        clock.advance(engine.tick_interval().as_millis() as u64);
        let tick = engine.state().tick + 1;
        let update = match engine.step(clock.now_ms()) {
            TickOutcome::Committed { update, .. } => update,
            TickOutcome::Rejected(failure) => {
                push_anomaly(&mut anomalies, &mut records, &mut seen, tick, failure.to_string());
                break;
            }
            TickOutcome::Paused | TickOutcome::Over => break,
        };

        if let Err(failure) = validate_state(&update.state) {
            push_anomaly(&mut anomalies, &mut records, &mut seen, tick, failure.to_string());
        }
        for message in collect_state_anomalies(&update.state) {
            push_anomaly(&mut anomalies, &mut records, &mut seen, tick, message);
        }
        for (player, sync) in observers.iter_mut() {
            let view = project_for(&update, player);
            if sync.on_update(view.version) != UpdateDecision::Apply {
                push_anomaly(
                    &mut anomalies,
                    &mut records,
                    &mut seen,
                    tick,
                    format!("observer {player} saw non-increasing version {}", view.version),
                );
            }
        }
        for event in &update.events {
            match event {
                MatchEvent::LordCaptured { .. } => lords_captured += 1,
                MatchEvent::TerritoryCaptured { .. } => territories_captured += 1,
                _ => {}
            }
        }
    }

    for record in &records {
        warn!(seed, tick = record.tick, message = %record.message, "anomaly detected");
    }
    let summary = engine.summary();
    Ok(MatchResultLine {
        match_id: summary.match_id,
        seed,
        players: player_count,
        winner: summary.winner,
        ticks: summary.ticks,
        final_version: summary.final_version,
        eliminated: summary.eliminated,
        lords_captured,
        territories_captured,
        finished: engine.is_over(),
        anomalies,
    })
}

/// One order per bot per tick: the strongest tile marches on the nearest
/// enemy lord, or grabs a random nearby tile when no lord is reachable.
fn issue_bot_orders(engine: &mut MatchEngine, rng: &mut Rng) {
    let state = engine.state();
    let garrison = state.min_garrison;
    let mut intents = Vec::new();
    for player in &state.players {
        if state.is_eliminated(&player.id) {
            continue;
        }
        let Some(source) = state
            .tiles
            .iter()
            .filter(|t| t.owner.is(&player.id) && t.army > garrison + 1)
            .max_by_key(|t| t.army)
        else {
            continue;
        };
        let from = source.coord();
        let enemy_lord = state
            .tiles
            .iter()
            .filter(|t| t.is_lord && !t.owner.is(&player.id))
            .min_by_key(|t| (t.x - from.x).abs() + (t.y - from.y).abs())
            .map(|t| t.coord());
        let to = match enemy_lord {
            Some(lord) if rng.chance(0.7) => lord,
            _ => Coord::new(
                (from.x + rng.int(-3, 3)).clamp(0, state.width - 1),
                (from.y + rng.int(-3, 3)).clamp(0, state.height - 1),
            ),
        };
        if to == from {
            continue;
        }
        intents.push(MovementIntent {
            from,
            to,
            army_fraction: 0.8,
            waypoints: Vec::new(),
            player_id: player.id.clone(),
        });
    }
    for intent in intents {
        // Rejections are normal for random targets.
        let _ = engine.submit_movement(intent);
    }
}

fn collect_state_anomalies(state: &GameState) -> Vec<String> {
    let mut anomalies = Vec::new();
    for movement in &state.movement_queue {
        if state.is_eliminated(&movement.owner) {
            anomalies.push(format!("eliminated player {} still has orders", movement.owner));
        }
        if movement.must_reach_waypoint == movement.waypoints.is_empty() {
            anomalies.push(format!(
                "movement from {} has inconsistent waypoint flag",
                movement.from
            ));
        }
    }
    if state.is_game_over && !state.movement_queue.is_empty() {
        anomalies.push("finished match still has queued orders".to_string());
    }
    anomalies
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    records: &mut Vec<AnomalyRecord>,
    seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn build_run_summary(matches: Vec<MatchResultLine>) -> RunSummary {
    let match_count = matches.len();
    let total_ticks: u64 = matches.iter().map(|m| m.ticks).sum();
    let mut winners = BTreeMap::new();
    for result in &matches {
        let key = result
            .winner
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| if result.finished { "draw" } else { "unfinished" }.to_string());
        *winners.entry(key).or_insert(0) += 1;
    }
    RunSummary {
        match_count,
        finished_count: matches.iter().filter(|m| m.finished).count(),
        anomaly_count: matches.iter().map(|m| m.anomalies.len()).sum(),
        average_ticks: if match_count == 0 {
            0
        } else {
            total_ticks / match_count as u64
        },
        winners,
        matches,
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_result(winner: Option<&str>, ticks: u64, finished: bool) -> MatchResultLine {
        MatchResultLine {
            match_id: "sim-1".to_string(),
            seed: 1,
            players: 2,
            winner: winner.map(PlayerId::new),
            ticks,
            final_version: ticks + 1,
            eliminated: Vec::new(),
            lords_captured: 0,
            territories_captured: 0,
            finished,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn build_run_summary_counts_outcomes() {
        let summary = build_run_summary(vec![
            make_result(Some("bot_1"), 100, true),
            make_result(None, 300, true),
            make_result(None, 200, false),
        ]);
        assert_eq!(summary.average_ticks, 200);
        assert_eq!(summary.finished_count, 2);
        assert_eq!(summary.winners.get("bot_1"), Some(&1));
        assert_eq!(summary.winners.get("draw"), Some(&1));
        assert_eq!(summary.winners.get("unfinished"), Some(&1));
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("lords-missing-{}", uuid::Uuid::new_v4()))
            .join("summary.json");
        let summary = build_run_summary(vec![make_result(None, 10, false)]);
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn push_anomaly_keeps_records_and_deduplicates_summary_messages() {
        let mut anomalies = Vec::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        push_anomaly(&mut anomalies, &mut records, &mut seen, 10, "same".to_string());
        push_anomaly(&mut anomalies, &mut records, &mut seen, 11, "same".to_string());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn bot_match_runs_clean() {
        let params = MapParams::with_size(16, 16);
        let result = run_match(&params, 2, 7, 400).expect("match starts");
        assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
        assert!(result.ticks > 0);
        assert_eq!(result.final_version, result.ticks + 1);
    }
}
