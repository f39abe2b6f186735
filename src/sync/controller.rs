use std::{future::Future, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::db::{CacheMetadata, Record, RecordStore};
use crate::error::{AnalyticsError, AnalyticsResult};

/// Supplies the authoritative record list. Implemented by the REST layer.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_all(&self) -> anyhow::Result<Vec<Record>>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub sync_id: String,
    pub record_count: u64,
    pub metadata: CacheMetadata,
    pub duration_ms: u64,
}

/// Outcome of the most recent sync attempt.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum SyncStatus {
    Never,
    Succeeded {
        at: DateTime<Utc>,
        record_count: u64,
    },
    Failed {
        at: DateTime<Utc>,
        message: String,
    },
}

/// Repopulates the record store from the remote source.
///
/// Only one sync runs at a time per controller; a second request made while
/// one is in flight is rejected with [`AnalyticsError::SyncInProgress`].
/// A failed fetch leaves the store exactly as it was.
#[derive(Clone)]
pub struct SyncController {
    store: RecordStore,
    gate: Arc<Mutex<()>>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl SyncController {
    pub fn new(store: RecordStore) -> Self {
        let (status, _) = watch::channel(SyncStatus::Never);
        Self {
            store,
            gate: Arc::new(Mutex::new(())),
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub async fn sync_from(&self, source: &dyn RemoteSource) -> AnalyticsResult<SyncReport> {
        self.sync(|| source.fetch_all()).await
    }

    pub async fn sync<F, Fut>(&self, fetch: F) -> AnalyticsResult<SyncReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Record>>>,
    {
        let _guard = self
            .gate
            .try_lock()
            .map_err(|_| AnalyticsError::SyncInProgress)?;

        let sync_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!("Sync {sync_id} started");

        let records = match fetch().await {
            Ok(records) => records,
            Err(err) => {
                error!("Sync {sync_id} fetch failed; keeping cached records: {err:#}");
                self.mark_failed(format!("{err:#}"));
                return Err(AnalyticsError::SyncFailed(err));
            }
        };

        let fetched = records.len();
        let metadata = match self.store.replace_all(records, Utc::now()).await {
            Ok(metadata) => metadata,
            Err(err) => {
                error!("Sync {sync_id} could not write {fetched} records: {err}");
                self.mark_failed(err.to_string());
                return Err(err);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Sync {sync_id} stored {} records in {duration_ms}ms",
            metadata.record_count
        );
        self.status.send_replace(SyncStatus::Succeeded {
            at: metadata.last_synced_at,
            record_count: metadata.record_count,
        });

        Ok(SyncReport {
            sync_id,
            record_count: metadata.record_count,
            metadata,
            duration_ms,
        })
    }

    fn mark_failed(&self, message: String) {
        self.status.send_replace(SyncStatus::Failed {
            at: Utc::now(),
            message,
        });
    }
}
