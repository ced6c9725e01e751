//! Structured JSONL logging for the projection pipeline.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain categories for filtering (`LOG_DOMAINS=pool,position`)
//! 3. One record per line, correlated by `event_id` and `pool`
//! 4. Replay/audit support via sequence numbers and state digests

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Pool,      // Curve transitions, pool lifecycle
    Position,  // Cost basis and PnL updates
    Ledger,    // Volume and fee counters
    Projector, // Per-event outcome
    Storage,   // Persistence
    System,    // Startup, shutdown, recovery
    Audit,     // State digests and checkpoints
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Pool => "pool",
            Domain::Position => "position",
            Domain::Ledger => "ledger",
            Domain::Projector => "projector",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    /// `None` when `LOG_DIR=-`: stdout only.
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        if base == "-" {
            return RunContext { run_id, events: None, trace: None };
        }

        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            run_id,
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["event_id", "pool", "user", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

/// Flush buffered sinks, called before exit.
pub fn flush() {
    if let Some(ctx) = RUN_CONTEXT.get() {
        for sink in [&ctx.events, &ctx.trace].into_iter().flatten() {
            if let Ok(mut w) = sink.lock() {
                let _ = w.flush();
            }
        }
    }
}

// =============================================================================
// Projection logs
// =============================================================================

pub fn log_event_applied(event_id: &str, kind: &str, pool: &str, seq: u64) {
    log(
        Level::Debug,
        Domain::Projector,
        "event_applied",
        obj(&[
            ("event_id", v_str(event_id)),
            ("kind", v_str(kind)),
            ("pool", v_str(pool)),
            ("seq", json!(seq)),
        ]),
    );
}

/// Recoverable rejection. This is the operator-facing diagnostic channel.
pub fn log_event_skipped(event_id: &str, kind: &str, pool: &str, error_kind: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Projector,
        "event_skipped",
        obj(&[
            ("event_id", v_str(event_id)),
            ("kind", v_str(kind)),
            ("pool", v_str(pool)),
            ("error", v_str(error_kind)),
            ("msg", v_str(reason)),
        ]),
    );
}

/// Invariant broken for a single event; state left as it was.
pub fn log_event_failed(event_id: &str, kind: &str, pool: &str, error_kind: &str, reason: &str) {
    log(
        Level::Error,
        Domain::Projector,
        "event_failed",
        obj(&[
            ("event_id", v_str(event_id)),
            ("kind", v_str(kind)),
            ("pool", v_str(pool)),
            ("error", v_str(error_kind)),
            ("msg", v_str(reason)),
        ]),
    );
}

pub fn log_event_ignored(event_id: &str, pool: &str, reason: &str) {
    log(
        Level::Info,
        Domain::Projector,
        "event_ignored",
        obj(&[
            ("event_id", v_str(event_id)),
            ("pool", v_str(pool)),
            ("msg", v_str(reason)),
        ]),
    );
}

pub fn log_pool_created(pool: &str, outcomes: usize, collateral: &str, decimals: u32) {
    log(
        Level::Info,
        Domain::Pool,
        "pool_created",
        obj(&[
            ("pool", v_str(pool)),
            ("outcomes", json!(outcomes)),
            ("collateral", v_str(collateral)),
            ("decimals", json!(decimals)),
        ]),
    );
}

pub fn log_pool_state(pool: &str, reserves: &[String], liquidity: &str, total_supply: &str) {
    log(
        Level::Trace,
        Domain::Pool,
        "pool_state",
        obj(&[
            ("pool", v_str(pool)),
            ("reserves", Value::Array(reserves.iter().map(|r| v_str(r)).collect())),
            ("liquidity_parameter", v_str(liquidity)),
            ("total_supply", v_str(total_supply)),
        ]),
    );
}

pub fn log_volume_update(pool: &str, trades: u64, collateral_volume: &str, fee_volume: &str) {
    log(
        Level::Trace,
        Domain::Ledger,
        "volume_update",
        obj(&[
            ("pool", v_str(pool)),
            ("trades", v_num(trades)),
            ("collateral_volume", v_str(collateral_volume)),
            ("fee_volume", v_str(fee_volume)),
        ]),
    );
}

pub fn log_position_update(user: &str, token: &str, amount: &str, avg_price: &str, realized_pnl: &str) {
    log(
        Level::Debug,
        Domain::Position,
        "position_update",
        obj(&[
            ("user", v_str(user)),
            ("token", v_str(token)),
            ("amount", v_str(amount)),
            ("avg_price", v_str(avg_price)),
            ("realized_pnl", v_str(realized_pnl)),
        ]),
    );
}

pub fn log_warning(domain: Domain, event: &str, fields: &[(&str, Value)]) {
    log(Level::Warn, domain, event, obj(fields));
}

// =============================================================================
// Audit and session logs
// =============================================================================

pub fn log_checkpoint(seq: u64, digest: &str, offset: u64) {
    log(
        Level::Info,
        Domain::Audit,
        "checkpoint",
        obj(&[
            ("seq", json!(seq)),
            ("state_digest", v_str(digest)),
            ("log_offset", json!(offset)),
        ]),
    );
}

pub fn log_session_summary(duration_secs: u64, applied: u64, ignored: u64, skipped: u64, failed: u64, digest: &str) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("duration_secs", json!(duration_secs)),
            ("applied", json!(applied)),
            ("ignored", json!(ignored)),
            ("skipped", json!(skipped)),
            ("failed", json!(failed)),
            ("state_digest", v_str(digest)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: u64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================
