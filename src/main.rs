use std::time::Instant;

use anyhow::Result;
use fpmm_ledger::collaborators::{Lookups, PositionIdTable, StaticCollateralRegistry};
use fpmm_ledger::config::ProjectorConfig;
use fpmm_ledger::engine::reducer::{EventProjector, Outcome};
use fpmm_ledger::logging::{self, obj, v_num, v_str, Domain, Level};
use fpmm_ledger::reliability::event_log;
use fpmm_ledger::storage::{Progress, StateStore};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = ProjectorConfig::from_env();
    let registry = StaticCollateralRegistry::from_spec(&cfg.collateral_decimals);
    let position_ids = match &cfg.position_ids_path {
        Some(path) => PositionIdTable::load(path)?,
        None => PositionIdTable::new(),
    };

    let mut store = StateStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let (state, progress) = store.load_state()?;

    logging::log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("event_log", v_str(&cfg.event_log_path)),
            ("follow", serde_json::json!(cfg.follow)),
            ("strict_positions", serde_json::json!(cfg.strict_positions)),
            ("resume_offset", v_num(progress.offset)),
            ("resume_seq", v_num(progress.seq)),
            ("pools", v_num(state.pools.len() as u64)),
            ("condition_tables", v_num(position_ids.len() as u64)),
        ]),
    );

    let lookups = Lookups { collateral: &registry, positions: &position_ids };
    let mut projector = EventProjector::with_state(state, cfg.clone(), lookups);
    let mut offset = progress.offset;
    let started = Instant::now();

    loop {
        let batch = event_log::read_from(&cfg.event_log_path, offset)?;

        for logged in &batch.events {
            let out = projector.apply(&logged.event);
            let progress = Progress {
                seq: out.seq,
                offset: logged.end_offset,
                cursor: projector.state().cursor,
            };
            match &out.outcome {
                Outcome::Applied(t) => {
                    store.persist(t, progress)?;
                    if cfg.checkpoint_every > 0 && out.seq % cfg.checkpoint_every == 0 {
                        logging::log_checkpoint(out.seq, &projector.state().digest(), logged.end_offset);
                    }
                }
                _ => store.save_progress(progress)?,
            }
            offset = logged.end_offset;
        }

        if batch.next_offset != offset {
            // Trailing unparseable lines.
            offset = batch.next_offset;
            store.save_progress(Progress {
                seq: projector.state().seq,
                offset,
                cursor: projector.state().cursor,
            })?;
        }

        if !cfg.follow {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                logging::log(Level::Info, Domain::System, "shutdown", obj(&[("reason", v_str("signal"))]));
                break;
            }
            _ = sleep(Duration::from_millis(cfg.poll_ms)) => {}
        }
    }

    let stats = projector.stats();
    let digest = projector.state().digest();
    logging::log_checkpoint(projector.state().seq, &digest, offset);
    logging::log_session_summary(
        started.elapsed().as_secs(),
        stats.applied,
        stats.ignored,
        stats.skipped,
        stats.failed,
        &digest,
    );
    logging::flush();
    Ok(())
}
