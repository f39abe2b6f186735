use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the record layout written by the current sync code.
pub const DATA_VERSION: u32 = 1;

/// Singleton row describing the last successful sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub last_synced_at: DateTime<Utc>,
    /// Number of records present immediately after that sync.
    pub record_count: u64,
    pub data_version: u32,
}
