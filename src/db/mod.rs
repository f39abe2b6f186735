//! Persistent record cache.
//!
//! [`RecordStore`] is the only shared mutable resource of the subsystem. It
//! wraps a lazily opened SQLite [`Database`]; when the execution context has
//! no persistent storage every call fails with
//! [`AnalyticsError::StorageUnavailable`], which callers treat as an empty
//! cache.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::OnceCell;

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{CacheMetadata, Record, RecordStatus, DATA_VERSION};

use crate::error::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
    /// No persistent storage in this execution context.
    Unavailable,
}

#[derive(Clone)]
pub struct RecordStore {
    location: Arc<StoreLocation>,
    db: Arc<OnceCell<Database>>,
}

impl RecordStore {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location: Arc::new(location),
            db: Arc::new(OnceCell::new()),
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    pub fn unavailable() -> Self {
        Self::new(StoreLocation::Unavailable)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Opens the database on first use. A failed open leaves the cell empty
    /// so the next call tries again.
    async fn database(&self) -> AnalyticsResult<&Database> {
        self.db
            .get_or_try_init(|| async {
                let location = StoreLocation::clone(&self.location);
                let opened = tokio::task::spawn_blocking(move || match location {
                    StoreLocation::File(path) => Database::open(path),
                    StoreLocation::InMemory => Database::open_in_memory(),
                    StoreLocation::Unavailable => {
                        Err(anyhow::anyhow!("no persistent storage in this context"))
                    }
                })
                .await
                .map_err(|err| {
                    AnalyticsError::StorageUnavailable(format!("store open task failed: {err}"))
                })?;

                opened.map_err(|err| {
                    if *self.location != StoreLocation::Unavailable {
                        warn!("Record store could not be opened: {err:#}");
                    }
                    AnalyticsError::StorageUnavailable(format!("{err:#}"))
                })
            })
            .await
    }

    /// Succeeds when the backing database is open and migrated.
    pub async fn probe(&self) -> AnalyticsResult<()> {
        self.database().await.map(|_| ())
    }

    /// Atomically replaces every record and the metadata row.
    pub async fn replace_all(
        &self,
        records: Vec<Record>,
        synced_at: DateTime<Utc>,
    ) -> AnalyticsResult<CacheMetadata> {
        self.database()
            .await?
            .replace_records(records, synced_at)
            .await
            .map_err(AnalyticsError::Storage)
    }

    /// Every stored record, order unspecified.
    pub async fn get_all(&self) -> AnalyticsResult<Vec<Record>> {
        self.database()
            .await?
            .list_records()
            .await
            .map_err(AnalyticsError::Storage)
    }

    /// `None` until the first successful sync.
    pub async fn get_metadata(&self) -> AnalyticsResult<Option<CacheMetadata>> {
        self.database()
            .await?
            .get_cache_metadata()
            .await
            .map_err(AnalyticsError::Storage)
    }

    pub async fn get_by_operator(&self, operator_id: &str) -> AnalyticsResult<Vec<Record>> {
        self.database()
            .await?
            .list_records_by_operator(operator_id)
            .await
            .map_err(AnalyticsError::Storage)
    }

    pub async fn get_by_status(&self, status: RecordStatus) -> AnalyticsResult<Vec<Record>> {
        self.database()
            .await?
            .list_records_by_status(status)
            .await
            .map_err(AnalyticsError::Storage)
    }

    pub async fn get_scheduled_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnalyticsResult<Vec<Record>> {
        self.database()
            .await?
            .list_records_scheduled_between(start, end)
            .await
            .map_err(AnalyticsError::Storage)
    }
}
