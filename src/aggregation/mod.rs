//! Aggregation engine.
//!
//! Four pure functions of `(records, filters, as_of)`. The background worker
//! and the in-process fallback both go through [`evaluate`], so the two paths
//! run the same code on the same inputs.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use chrono::{DateTime, Utc};

pub mod filter;
pub mod heatmap;
pub mod overview;
pub mod performance;
pub mod trends;
mod types;

pub use filter::{DateRange, FilterSet};
pub use heatmap::{compute_heatmap, HEATMAP_CELLS};
pub use overview::compute_overview;
pub use performance::compute_operator_performance;
pub use trends::{compute_trends, MAX_TREND_BUCKETS};
pub use types::{
    AggregationKind, HeatmapCell, OperatorPerformance, OverviewMetrics, TrendGranularity,
    TrendMetric, TrendPoint, TrendQuery, TrendWindow,
};

use crate::db::models::Record;

/// Everything a computation needs. The record snapshot is immutable and
/// shared, never mutated after a refresh captures it.
#[derive(Debug, Clone)]
pub struct AggregationInput {
    pub records: Arc<Vec<Record>>,
    pub filters: FilterSet,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AggregationRequest {
    Overview(AggregationInput),
    Trends {
        input: AggregationInput,
        query: TrendQuery,
    },
    OperatorPerformance(AggregationInput),
    Heatmap(AggregationInput),
}

impl AggregationRequest {
    pub fn kind(&self) -> AggregationKind {
        match self {
            AggregationRequest::Overview(_) => AggregationKind::Overview,
            AggregationRequest::Trends { .. } => AggregationKind::Trends,
            AggregationRequest::OperatorPerformance(_) => AggregationKind::OperatorPerformance,
            AggregationRequest::Heatmap(_) => AggregationKind::Heatmap,
        }
    }

    pub fn for_kind(kind: AggregationKind, input: AggregationInput, query: TrendQuery) -> Self {
        match kind {
            AggregationKind::Overview => AggregationRequest::Overview(input),
            AggregationKind::Trends => AggregationRequest::Trends { input, query },
            AggregationKind::OperatorPerformance => AggregationRequest::OperatorPerformance(input),
            AggregationKind::Heatmap => AggregationRequest::Heatmap(input),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutput {
    Overview(OverviewMetrics),
    Trends(Vec<TrendPoint>),
    OperatorPerformance(Vec<OperatorPerformance>),
    Heatmap(Vec<HeatmapCell>),
}

impl AggregationOutput {
    pub fn kind(&self) -> AggregationKind {
        match self {
            AggregationOutput::Overview(_) => AggregationKind::Overview,
            AggregationOutput::Trends(_) => AggregationKind::Trends,
            AggregationOutput::OperatorPerformance(_) => AggregationKind::OperatorPerformance,
            AggregationOutput::Heatmap(_) => AggregationKind::Heatmap,
        }
    }
}

/// Message describing why a computation did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationFailure {
    pub kind: AggregationKind,
    pub message: String,
}

fn compute(request: &AggregationRequest) -> AggregationOutput {
    match request {
        AggregationRequest::Overview(input) => AggregationOutput::Overview(compute_overview(
            &input.records,
            &input.filters,
            input.as_of,
        )),
        AggregationRequest::Trends { input, query } => AggregationOutput::Trends(compute_trends(
            &input.records,
            &input.filters,
            query,
            input.as_of,
        )),
        AggregationRequest::OperatorPerformance(input) => AggregationOutput::OperatorPerformance(
            compute_operator_performance(&input.records, &input.filters),
        ),
        AggregationRequest::Heatmap(input) => {
            AggregationOutput::Heatmap(compute_heatmap(&input.records, &input.filters))
        }
    }
}

/// Runs one request, converting a panic inside the math into a failure for
/// that request alone.
pub fn evaluate(request: &AggregationRequest) -> Result<AggregationOutput, ComputationFailure> {
    catch_unwind(AssertUnwindSafe(|| compute(request))).map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "aggregation panicked".to_string());
        ComputationFailure {
            kind: request.kind(),
            message,
        }
    })
}
