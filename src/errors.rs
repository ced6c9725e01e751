//! Error taxonomy for event projection.
//!
//! Every variant leaves state untouched: the reducer stages its writes and
//! only commits once all steps succeed. The split that matters to callers is
//! [`ProjectionError::is_recoverable`]: recoverable errors are expected during
//! backfill and surface on the diagnostic channel, the rest indicate a broken
//! invariant for that one event.

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("{kind} {key} not found")]
    MissingEntity { kind: &'static str, key: String },

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("insufficient position for {user} in {token}: held {held}, requested {requested}")]
    InsufficientPosition {
        user: String,
        token: String,
        held: BigUint,
        requested: BigUint,
    },

    #[error("numeric divergence: {0}")]
    NumericDivergence(String),

    #[error("reserve underflow in pool {pool} at outcome {outcome}")]
    ReserveUnderflow { pool: String, outcome: usize },

    #[error("division by zero")]
    DivisionByZero,
}

impl ProjectionError {
    pub fn missing(kind: &'static str, key: impl Into<String>) -> Self {
        ProjectionError::MissingEntity { kind, key: key.into() }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProjectionError::MissingEntity { .. }
                | ProjectionError::InvalidTrade(_)
                | ProjectionError::InsufficientPosition { .. }
        )
    }

    /// Short machine-friendly tag used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            ProjectionError::MissingEntity { .. } => "missing_entity",
            ProjectionError::InvalidTrade(_) => "invalid_trade",
            ProjectionError::InsufficientPosition { .. } => "insufficient_position",
            ProjectionError::NumericDivergence(_) => "numeric_divergence",
            ProjectionError::ReserveUnderflow { .. } => "reserve_underflow",
            ProjectionError::DivisionByZero => "division_by_zero",
        }
    }
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;
