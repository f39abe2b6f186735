use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::db::models::{Record, RecordStatus};

use super::filter::FilterSet;
use super::types::{percentage, round2, OperatorPerformance};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

struct OperatorTally {
    total: u64,
    completed: u64,
    completion_hours_sum: f64,
    timed_completions: u64,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl OperatorTally {
    fn new(first_seen: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            completed: 0,
            completion_hours_sum: 0.0,
            timed_completions: 0,
            earliest: first_seen,
            latest: first_seen,
        }
    }

    fn add(&mut self, record: &Record) {
        self.total += 1;
        if record.status == RecordStatus::Completed {
            self.completed += 1;
        }
        if let Some(hours) = record.completion_hours() {
            self.completion_hours_sum += hours;
            self.timed_completions += 1;
        }
        self.earliest = self.earliest.min(record.scheduled_at);
        self.latest = self.latest.max(record.scheduled_at);
    }

    /// `max(1, ceil(span / 1 day) + 1)`.
    fn active_days(&self) -> f64 {
        let span_ms = (self.latest - self.earliest).num_milliseconds() as f64;
        ((span_ms / MILLIS_PER_DAY).ceil() + 1.0).max(1.0)
    }

    fn into_performance(self, operator_id: String) -> OperatorPerformance {
        let avg_completion_time = if self.timed_completions == 0 {
            0.0
        } else {
            round2(self.completion_hours_sum / self.timed_completions as f64)
        };
        OperatorPerformance {
            operator_id,
            total_assigned: self.total,
            completed: self.completed,
            completion_rate: percentage(self.completed, self.total),
            avg_completion_time,
            efficiency: round2(self.total as f64 / self.active_days()),
        }
    }
}

/// Per-operator totals, busiest operator first. Unassigned records are
/// skipped; ties are broken by operator id.
pub fn compute_operator_performance(
    records: &[Record],
    filters: &FilterSet,
) -> Vec<OperatorPerformance> {
    let mut tallies: BTreeMap<&str, OperatorTally> = BTreeMap::new();
    for record in filters.apply(records) {
        let Some(operator_id) = record.operator_id.as_deref() else {
            continue;
        };
        tallies
            .entry(operator_id)
            .or_insert_with(|| OperatorTally::new(record.scheduled_at))
            .add(record);
    }

    let mut performance: Vec<OperatorPerformance> = tallies
        .into_iter()
        .map(|(operator_id, tally)| tally.into_performance(operator_id.to_string()))
        .collect();

    // Stable sort keeps the BTreeMap's id order among equal totals.
    performance.sort_by(|a, b| b.total_assigned.cmp(&a.total_assigned));
    performance
}
