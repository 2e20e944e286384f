use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::Scope;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("trade {trade_id} has invalid rate {rate}")]
    InvalidRate { trade_id: Uuid, rate: Decimal },

    #[error("trade {trade_id} is malformed: {reason}")]
    MalformedTrade { trade_id: Uuid, reason: String },

    #[error("matching run over {requested} conflicts with a run already in progress")]
    ConcurrentRunConflict {
        requested: Scope,
        /// Known when the conflicting run lives in this process.
        active: Option<Scope>,
    },

    #[error("leftover {leftover_id} is tied to a run outside {scope}; re-run a scope that covers that run")]
    StaleCarryover { leftover_id: i64, scope: Scope },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether the caller may simply trigger the same run again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentRunConflict { .. } | LedgerError::Persistence(_)
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
