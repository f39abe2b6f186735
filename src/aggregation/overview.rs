use chrono::{DateTime, Datelike, Duration, Utc};

use crate::db::models::{Record, RecordStatus};

use super::filter::FilterSet;
use super::types::{percentage, round2, OverviewMetrics};

/// Headline counts for the dashboard.
///
/// Rolling windows are anchored on the UTC calendar day of `as_of`: "today",
/// the trailing seven days including today, and the calendar month.
pub fn compute_overview(
    records: &[Record],
    filters: &FilterSet,
    as_of: DateTime<Utc>,
) -> OverviewMetrics {
    let today = as_of.date_naive();
    let week_start = today - Duration::days(6);

    let mut metrics = OverviewMetrics::default();
    let mut completion_hours_sum = 0.0;
    let mut timed_completions = 0u64;

    for record in filters.apply(records) {
        metrics.total_pickups += 1;
        match record.status {
            RecordStatus::Completed => metrics.completed_pickups += 1,
            RecordStatus::InProgress => metrics.in_progress_pickups += 1,
            RecordStatus::Cancelled => metrics.cancelled_pickups += 1,
            _ => {}
        }

        if let Some(hours) = record.completion_hours() {
            completion_hours_sum += hours;
            timed_completions += 1;
        }

        let day = record.scheduled_at.date_naive();
        if day == today {
            metrics.today_pickups += 1;
        }
        if day >= week_start && day <= today {
            metrics.week_pickups += 1;
        }
        if day.year() == today.year() && day.month() == today.month() {
            metrics.month_pickups += 1;
        }
    }

    metrics.completion_rate = percentage(metrics.completed_pickups, metrics.total_pickups);
    metrics.avg_completion_time = if timed_completions == 0 {
        0.0
    } else {
        round2(completion_hours_sum / timed_completions as f64)
    };

    metrics
}
