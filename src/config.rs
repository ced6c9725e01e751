use num_bigint::BigUint;

use crate::collaborators::DEFAULT_COLLATERAL_DECIMALS;
use crate::engine::pool::CurveParams;
use crate::math::int::DEFAULT_MAX_ROOT_ITERATIONS;
use crate::math::serde_big;

pub const DEFAULT_COLLATERAL_UNIT: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub sqlite_path: String,
    pub event_log_path: String,
    /// Fixed-point base of position prices.
    pub collateral_unit: BigUint,
    pub price_decimals: u32,
    pub default_collateral_decimals: u32,
    pub max_root_iterations: u32,
    /// Reject disposals larger than the held amount instead of clamping.
    pub strict_positions: bool,
    /// Only index pools wired to this conditional-tokens contract.
    pub conditional_tokens: Option<String>,
    /// `addr:decimals,...`
    pub collateral_decimals: String,
    pub position_ids_path: Option<String>,
    pub follow: bool,
    pub poll_ms: u64,
    pub checkpoint_every: u64,
}

fn flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl ProjectorConfig {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./fpmm.sqlite".to_string()),
            event_log_path: std::env::var("EVENT_LOG_PATH").unwrap_or_else(|_| "./events.jsonl".to_string()),
            collateral_unit: std::env::var("COLLATERAL_UNIT").ok().and_then(|v| serde_big::parse_uint(&v)).unwrap_or_else(|| BigUint::from(DEFAULT_COLLATERAL_UNIT)),
            price_decimals: std::env::var("PRICE_DECIMALS").ok().and_then(|v| v.parse().ok()).unwrap_or(18),
            default_collateral_decimals: std::env::var("DEFAULT_COLLATERAL_DECIMALS").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_COLLATERAL_DECIMALS),
            max_root_iterations: std::env::var("MAX_ROOT_ITERATIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_MAX_ROOT_ITERATIONS),
            strict_positions: flag("STRICT_POSITIONS", true),
            conditional_tokens: std::env::var("CONDITIONAL_TOKENS").ok().filter(|v| !v.trim().is_empty()),
            collateral_decimals: std::env::var("COLLATERAL_DECIMALS").unwrap_or_default(),
            position_ids_path: std::env::var("POSITION_IDS_PATH").ok().filter(|v| !v.trim().is_empty()),
            follow: flag("FOLLOW", false),
            poll_ms: std::env::var("POLL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
            checkpoint_every: std::env::var("CHECKPOINT_EVERY").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
        }
    }

    pub fn curve_params(&self) -> CurveParams {
        CurveParams {
            price_decimals: self.price_decimals,
            max_root_iterations: self.max_root_iterations,
        }
    }
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./fpmm.sqlite".to_string(),
            event_log_path: "./events.jsonl".to_string(),
            collateral_unit: BigUint::from(DEFAULT_COLLATERAL_UNIT),
            price_decimals: 18,
            default_collateral_decimals: DEFAULT_COLLATERAL_DECIMALS,
            max_root_iterations: DEFAULT_MAX_ROOT_ITERATIONS,
            strict_positions: true,
            conditional_tokens: None,
            collateral_decimals: String::new(),
            position_ids_path: None,
            follow: false,
            poll_ms: 1000,
            checkpoint_every: 1000,
        }
    }
}
