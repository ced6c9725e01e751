//! Determinism check: project the event log twice from a clean state and
//! compare state digests. Exits non-zero on mismatch.
//!
//! Usage: `replay [events.jsonl]` (defaults to `EVENT_LOG_PATH`).

use std::process::ExitCode;

use anyhow::Result;
use fpmm_ledger::collaborators::{Lookups, PositionIdTable, StaticCollateralRegistry};
use fpmm_ledger::config::ProjectorConfig;
use fpmm_ledger::engine::events::Event;
use fpmm_ledger::engine::reducer::{EventProjector, ProjectionStats};
use fpmm_ledger::reliability::event_log;

fn project(events: &[Event], cfg: &ProjectorConfig, lookups: Lookups<'_>) -> (String, ProjectionStats) {
    let mut projector = EventProjector::new(cfg.clone(), lookups);
    for event in events {
        projector.apply(event);
    }
    (projector.state().digest(), projector.stats())
}

fn run() -> Result<bool> {
    let cfg = ProjectorConfig::from_env();
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| cfg.event_log_path.clone());

    let registry = StaticCollateralRegistry::from_spec(&cfg.collateral_decimals);
    let position_ids = match &cfg.position_ids_path {
        Some(p) => PositionIdTable::load(p)?,
        None => PositionIdTable::new(),
    };
    let lookups = Lookups { collateral: &registry, positions: &position_ids };

    let batch = event_log::replay(&path)?;
    let events: Vec<Event> = batch.events.into_iter().map(|e| e.event).collect();

    let (first, stats) = project(&events, &cfg, lookups);
    let (second, _) = project(&events, &cfg, lookups);

    println!(
        "{}",
        serde_json::json!({
            "events": events.len(),
            "bad_lines": batch.skipped,
            "applied": stats.applied,
            "ignored": stats.ignored,
            "skipped": stats.skipped,
            "failed": stats.failed,
            "digest_first": first,
            "digest_second": second,
            "deterministic": first == second,
        })
    );
    Ok(first == second)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("replay failed: {err:#}");
            ExitCode::from(2)
        }
    }
}
