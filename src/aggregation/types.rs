use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationKind {
    Overview,
    Trends,
    OperatorPerformance,
    Heatmap,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 4] = [
        AggregationKind::Overview,
        AggregationKind::Trends,
        AggregationKind::OperatorPerformance,
        AggregationKind::Heatmap,
    ];
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationKind::Overview => write!(f, "overview"),
            AggregationKind::Trends => write!(f, "trends"),
            AggregationKind::OperatorPerformance => write!(f, "operator performance"),
            AggregationKind::Heatmap => write!(f, "heatmap"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewMetrics {
    pub total_pickups: u64,
    pub completed_pickups: u64,
    pub in_progress_pickups: u64,
    pub cancelled_pickups: u64,
    /// Percentage in `[0, 100]`.
    pub completion_rate: f64,
    /// Hours; 0 when no completed record carries timing data.
    pub avg_completion_time: f64,
    pub today_pickups: u64,
    pub week_pickups: u64,
    pub month_pickups: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrendMetric {
    #[default]
    All,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrendGranularity {
    #[default]
    Day,
    Hour,
}

/// Which buckets a trend series contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum TrendWindow {
    /// One point per bucket holding at least one matching record.
    Sparse,
    /// Exactly `buckets` points ending at the bucket containing `as_of`,
    /// zero-filled. Records outside the window are ignored.
    Trailing { buckets: u32 },
}

impl Default for TrendWindow {
    fn default() -> Self {
        TrendWindow::Sparse
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrendQuery {
    pub metric: TrendMetric,
    pub granularity: TrendGranularity,
    pub window: TrendWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPerformance {
    pub operator_id: String,
    pub total_assigned: u64,
    pub completed: u64,
    pub completion_rate: f64,
    pub avg_completion_time: f64,
    /// Records per day spanned by this operator's own records.
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapCell {
    /// 0 = Sunday.
    pub day_of_week: u8,
    pub hour: u8,
    pub count: u64,
    pub label: String,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}
