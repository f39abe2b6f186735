use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Record, RecordStatus};

/// Inclusive bounds on the scheduled timestamp. A missing bound is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| *at >= start) && self.end.map_or(true, |end| *at <= end)
    }
}

/// Per-request restriction shared by both aggregation paths.
///
/// An absent dimension places no restriction. An empty set is treated the
/// same as an absent one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<BTreeSet<RecordStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeSet<String>>,
}

fn admits(set: &Option<BTreeSet<String>>, value: Option<&str>) -> bool {
    match set {
        Some(allowed) if !allowed.is_empty() => value.map_or(false, |v| allowed.contains(v)),
        _ => true,
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_range = Some(DateRange { start, end });
        self
    }

    pub fn with_operators<I, S>(mut self, operators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operator_ids = Some(operators.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = RecordStatus>,
    {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(range) = &self.date_range {
            if !range.contains(&record.scheduled_at) {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.is_empty() && !statuses.contains(&record.status) {
                return false;
            }
        }

        admits(&self.operator_ids, record.operator_id.as_deref())
            && admits(&self.categories, record.category.as_deref())
    }

    pub fn apply<'a>(&'a self, records: &'a [Record]) -> impl Iterator<Item = &'a Record> + 'a {
        records.iter().filter(move |record| self.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> Record {
        Record {
            id: "PU-7".into(),
            operator_id: Some("op-1".into()),
            status: RecordStatus::Scheduled,
            category: Some("freight".into()),
            scheduled_at: Utc.with_ymd_and_hms(2026, 4, 10, 14, 0, 0).unwrap(),
            created_at: None,
            status_changed_at: None,
            quantity: 1,
            weight_kg: 1.0,
            cost: 1.0,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(FilterSet::new().matches(&record()));
        assert_eq!(FilterSet::new().apply(&[record()]).count(), 1);
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let at = record().scheduled_at;
        assert!(FilterSet::new().with_date_range(Some(at), Some(at)).matches(&record()));
        assert!(!FilterSet::new()
            .with_date_range(Some(at + chrono::Duration::seconds(1)), None)
            .matches(&record()));
        assert!(!FilterSet::new()
            .with_date_range(None, Some(at - chrono::Duration::seconds(1)))
            .matches(&record()));
    }

    #[test]
    fn every_populated_dimension_must_hold() {
        let filters = FilterSet::new()
            .with_operators(["op-1", "op-2"])
            .with_statuses([RecordStatus::Scheduled])
            .with_categories(["freight"]);
        assert!(filters.matches(&record()));

        let wrong_status = filters.clone().with_statuses([RecordStatus::Completed]);
        assert!(!wrong_status.matches(&record()));

        let wrong_category = filters.with_categories(["parcel"]);
        assert!(!wrong_category.matches(&record()));
    }

    #[test]
    fn unassigned_record_fails_operator_filter() {
        let mut unassigned = record();
        unassigned.operator_id = None;
        assert!(!FilterSet::new().with_operators(["op-1"]).matches(&unassigned));
        assert!(FilterSet::new().matches(&unassigned));
    }

    #[test]
    fn empty_sets_do_not_restrict() {
        let filters = FilterSet::new()
            .with_operators(Vec::<String>::new())
            .with_statuses([]);
        assert!(filters.matches(&record()));
        let mut unassigned = record();
        unassigned.operator_id = None;
        assert!(filters.matches(&unassigned));
    }

    #[test]
    fn deserializes_partial_camel_case_json() {
        let filters: FilterSet =
            serde_json::from_str(r#"{"operatorIds":["op-1"],"statuses":["inProgress"]}"#)
                .unwrap();
        assert_eq!(filters.date_range, None);
        assert!(filters
            .statuses
            .as_ref()
            .unwrap()
            .contains(&RecordStatus::InProgress));
    }
}
