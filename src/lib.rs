//! Local analytics cache and aggregation for the operations console.
//!
//! Records are mirrored from the backend into a SQLite cache by the
//! [`SyncController`]. The [`AnalyticsCoordinator`] reads that cache, computes
//! four derived views on a background worker thread (or in-process when no
//! worker can be hosted) and publishes them as watch streams.

pub mod aggregation;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod export;
pub mod settings;
pub mod sync;
mod utils;
pub mod worker;

pub use aggregation::{
    AggregationKind, FilterSet, HeatmapCell, OperatorPerformance, OverviewMetrics, TrendPoint,
    TrendQuery,
};
pub use coordinator::{
    AnalyticsCoordinator, ComputationPath, CoordinatorMode, FallbackReason, RefreshReport,
};
pub use db::{CacheMetadata, Record, RecordStatus, RecordStore, StoreLocation};
pub use error::{AnalyticsError, AnalyticsResult};
pub use export::ExportBlob;
pub use settings::{AnalyticsSettings, EnvironmentProbe, HostEnvironment, TimeoutPolicy};
pub use sync::{RemoteSource, SyncController, SyncReport, SyncStatus};
pub use utils::logging::init_logging;
