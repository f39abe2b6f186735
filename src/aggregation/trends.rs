use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};

use crate::db::models::{Record, RecordStatus};

use super::filter::FilterSet;
use super::types::{TrendGranularity, TrendMetric, TrendPoint, TrendQuery, TrendWindow};

/// Widest trailing window a query may ask for. Wider requests are cut to
/// this many buckets.
pub const MAX_TREND_BUCKETS: u32 = 10_000;

/// Truncates `at` to the start of its UTC day or hour.
pub fn bucket_start(at: DateTime<Utc>, granularity: TrendGranularity) -> DateTime<Utc> {
    let day_start = at.date_naive().and_time(NaiveTime::MIN).and_utc();
    match granularity {
        TrendGranularity::Day => day_start,
        TrendGranularity::Hour => day_start + Duration::hours(i64::from(at.hour())),
    }
}

/// Length of `count` consecutive buckets. `count` is at most
/// `MAX_TREND_BUCKETS`, well inside `Duration`'s range.
fn buckets_span(granularity: TrendGranularity, count: i64) -> Duration {
    match granularity {
        TrendGranularity::Day => Duration::days(count),
        TrendGranularity::Hour => Duration::hours(count),
    }
}

fn bucket_label(start: DateTime<Utc>, granularity: TrendGranularity) -> String {
    match granularity {
        TrendGranularity::Day => start.format("%Y-%m-%d").to_string(),
        TrendGranularity::Hour => start.format("%Y-%m-%d %H:00").to_string(),
    }
}

fn counts_toward(record: &Record, metric: TrendMetric) -> bool {
    match metric {
        TrendMetric::All => true,
        TrendMetric::Completed => record.status == RecordStatus::Completed,
    }
}

/// Record counts per time bucket, ascending by bucket start.
pub fn compute_trends(
    records: &[Record],
    filters: &FilterSet,
    query: &TrendQuery,
    as_of: DateTime<Utc>,
) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
    for record in filters
        .apply(records)
        .filter(|record| counts_toward(record, query.metric))
    {
        *buckets
            .entry(bucket_start(record.scheduled_at, query.granularity))
            .or_insert(0) += 1;
    }

    match query.window {
        TrendWindow::Sparse => buckets
            .into_iter()
            .map(|(start, count)| TrendPoint {
                bucket_start: start,
                label: bucket_label(start, query.granularity),
                count,
            })
            .collect(),
        TrendWindow::Trailing { buckets: width } => {
            let width = i64::from(width.min(MAX_TREND_BUCKETS));
            if width == 0 {
                return Vec::new();
            }
            let last = bucket_start(as_of, query.granularity);
            let Some(first) =
                last.checked_sub_signed(buckets_span(query.granularity, width - 1))
            else {
                return Vec::new();
            };

            (0..width)
                .filter_map(|offset| {
                    first.checked_add_signed(buckets_span(query.granularity, offset))
                })
                .map(|start| TrendPoint {
                    bucket_start: start,
                    label: bucket_label(start, query.granularity),
                    count: buckets.get(&start).copied().unwrap_or(0),
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, minute, 0).unwrap()
    }

    fn record(id: &str, status: RecordStatus, scheduled_at: DateTime<Utc>) -> Record {
        Record {
            id: id.into(),
            operator_id: None,
            status,
            category: None,
            scheduled_at,
            created_at: None,
            status_changed_at: None,
            quantity: 1,
            weight_kg: 1.0,
            cost: 1.0,
        }
    }

    fn sample() -> Vec<Record> {
        vec![
            record("a", RecordStatus::Completed, at(10, 9, 15)),
            record("b", RecordStatus::Scheduled, at(10, 9, 45)),
            record("c", RecordStatus::Completed, at(10, 17, 0)),
            record("d", RecordStatus::Completed, at(7, 8, 0)),
            record("e", RecordStatus::Scheduled, at(1, 8, 0)),
        ]
    }

    #[test]
    fn sparse_daily_series_is_sorted_and_omits_empty_days() {
        let points = compute_trends(
            &sample(),
            &FilterSet::new(),
            &TrendQuery::default(),
            at(10, 20, 0),
        );
        let summary: Vec<(String, u64)> = points.into_iter().map(|p| (p.label, p.count)).collect();
        assert_eq!(
            summary,
            vec![
                ("2026-02-01".to_string(), 1),
                ("2026-02-07".to_string(), 1),
                ("2026-02-10".to_string(), 3),
            ]
        );
    }

    #[test]
    fn trailing_window_is_zero_filled() {
        let query = TrendQuery {
            window: TrendWindow::Trailing { buckets: 7 },
            ..TrendQuery::default()
        };
        let points = compute_trends(&sample(), &FilterSet::new(), &query, at(10, 20, 0));
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].label, "2026-02-04");
        assert_eq!(points[6].label, "2026-02-10");
        let counts: Vec<u64> = points.iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![0, 0, 0, 1, 0, 0, 3]);
        assert!(points.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
    }

    #[test]
    fn completed_metric_by_hour() {
        let query = TrendQuery {
            metric: TrendMetric::Completed,
            granularity: TrendGranularity::Hour,
            window: TrendWindow::Sparse,
        };
        let points = compute_trends(&sample(), &FilterSet::new(), &query, at(10, 20, 0));
        let summary: Vec<(String, u64)> = points.into_iter().map(|p| (p.label, p.count)).collect();
        assert_eq!(
            summary,
            vec![
                ("2026-02-07 08:00".to_string(), 1),
                ("2026-02-10 09:00".to_string(), 1),
                ("2026-02-10 17:00".to_string(), 1),
            ]
        );
    }

    #[test]
    fn empty_records_give_empty_sparse_series() {
        let query = TrendQuery::default();
        assert_eq!(query.window, TrendWindow::Sparse);
        assert!(compute_trends(&[], &FilterSet::new(), &query, at(10, 0, 0)).is_empty());
    }

    #[test]
    fn zero_width_window_is_empty() {
        let query = TrendQuery {
            window: TrendWindow::Trailing { buckets: 0 },
            ..TrendQuery::default()
        };
        assert!(compute_trends(&sample(), &FilterSet::new(), &query, at(10, 0, 0)).is_empty());
    }

    #[test]
    fn oversized_window_is_capped() {
        let query = TrendQuery {
            granularity: TrendGranularity::Hour,
            window: TrendWindow::Trailing { buckets: u32::MAX },
            ..TrendQuery::default()
        };
        let points = compute_trends(&sample(), &FilterSet::new(), &query, at(10, 20, 0));
        assert_eq!(points.len(), MAX_TREND_BUCKETS as usize);
        assert_eq!(points.last().unwrap().label, "2026-02-10 20:00");
        assert_eq!(points.iter().map(|p| p.count).sum::<u64>(), 5);
    }

    #[test]
    fn bucket_start_truncates() {
        let moment = at(10, 9, 45);
        assert_eq!(bucket_start(moment, TrendGranularity::Day), at(10, 0, 0));
        assert_eq!(bucket_start(moment, TrendGranularity::Hour), at(10, 9, 0));
    }
}
