//! Aggregation coordinator: execution-path selection, reactive view state
//! and export.

mod controller;
mod slots;
mod state;

pub use controller::{AnalyticsCoordinator, CoordinatorBuilder, RefreshReport, ViewReport};
pub use state::{ComputationPath, CoordinatorMode, FallbackReason};
