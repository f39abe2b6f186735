//! Logistics record data model.
//!
//! A record is one pickup/order event mirrored from the backend. Records are
//! written only by a sync and never mutated locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 6] = [
        RecordStatus::Pending,
        RecordStatus::Scheduled,
        RecordStatus::InProgress,
        RecordStatus::Completed,
        RecordStatus::Cancelled,
        RecordStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Scheduled => "scheduled",
            RecordStatus::InProgress => "inProgress",
            RecordStatus::Completed => "completed",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub operator_id: Option<String>,
    pub status: RecordStatus,
    pub category: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    /// When the record entered its current status.
    pub status_changed_at: Option<DateTime<Utc>>,
    pub quantity: u32,
    pub weight_kg: f64,
    pub cost: f64,
}

impl Record {
    /// Hours between creation and completion.
    ///
    /// `None` unless the record is completed and carries both timestamps.
    /// A completion stamped before creation is treated as missing timing data.
    pub fn completion_hours(&self) -> Option<f64> {
        if self.status != RecordStatus::Completed {
            return None;
        }
        let created = self.created_at?;
        let finished = self.status_changed_at?;
        let elapsed_ms = (finished - created).num_milliseconds();
        if elapsed_ms < 0 {
            return None;
        }
        Some(elapsed_ms as f64 / MILLIS_PER_HOUR)
    }
}
