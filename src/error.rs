use thiserror::Error;

use crate::aggregation::AggregationKind;

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The persistent store cannot be opened in this execution context.
    /// Callers treat this as "cache empty".
    #[error("persistent storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("background worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The remote fetch failed. The local cache was left untouched.
    #[error("sync failed: {0:#}")]
    SyncFailed(anyhow::Error),

    #[error("a sync is already in progress")]
    SyncInProgress,

    #[error("{kind} computation failed: {message}")]
    Computation {
        kind: AggregationKind,
        message: String,
    },

    #[error("{kind} computation timed out after {timeout_ms}ms")]
    ComputationTimeout {
        kind: AggregationKind,
        timeout_ms: u64,
    },

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("export failed: {0:#}")]
    Export(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalyticsError {
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, AnalyticsError::StorageUnavailable(_))
    }
}
