use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::aggregation::{
    evaluate, AggregationInput, AggregationKind, AggregationOutput, AggregationRequest, FilterSet,
    HeatmapCell, OperatorPerformance, OverviewMetrics, TrendPoint,
};
use crate::db::{Record, RecordStore};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::export::{self, ExportBlob};
use crate::settings::{AnalyticsSettings, EnvironmentProbe, HostEnvironment, TimeoutPolicy};
use crate::worker::{RequestId, WorkerClient, WorkerRequest};

use super::slots::ViewSlot;
use super::state::{ComputationPath, CoordinatorMode, FallbackReason};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type WorkerSpawner = Arc<dyn Fn(Duration) -> AnalyticsResult<WorkerClient> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// What happened to one view during a refresh.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewReport {
    pub kind: AggregationKind,
    pub request_id: RequestId,
    /// `None` when the computation failed.
    pub path: Option<ComputationPath>,
    /// False when a newer request for the view had already been issued.
    pub published: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub mode: CoordinatorMode,
    pub record_count: usize,
    /// False when the store could not be opened and the refresh ran on an
    /// empty record set.
    pub store_available: bool,
    pub views: Vec<ViewReport>,
}

impl RefreshReport {
    pub fn view(&self, kind: AggregationKind) -> Option<&ViewReport> {
        self.views.iter().find(|view| view.kind == kind)
    }

    pub fn failed_views(&self) -> impl Iterator<Item = &ViewReport> {
        self.views.iter().filter(|view| view.error.is_some())
    }
}

struct CoordinatorInner {
    store: RecordStore,
    settings: AnalyticsSettings,
    environment: Arc<dyn EnvironmentProbe>,
    clock: Clock,
    spawn_worker: WorkerSpawner,
    mode: watch::Sender<CoordinatorMode>,
    worker: Mutex<Option<WorkerClient>>,
    init_lock: AsyncMutex<()>,
    next_request_id: AtomicU64,
    filters: watch::Sender<FilterSet>,
    /// Records read by the most recent refresh. `None` before the first one.
    snapshot: RwLock<Option<Arc<Vec<Record>>>>,
    overview: ViewSlot<Option<OverviewMetrics>>,
    trends: ViewSlot<Vec<TrendPoint>>,
    performance: ViewSlot<Vec<OperatorPerformance>>,
    heatmap: ViewSlot<Vec<HeatmapCell>>,
}

pub struct CoordinatorBuilder {
    store: RecordStore,
    settings: AnalyticsSettings,
    environment: Arc<dyn EnvironmentProbe>,
    clock: Clock,
    spawn_worker: WorkerSpawner,
}

impl CoordinatorBuilder {
    pub fn settings(mut self, settings: AnalyticsSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn environment(mut self, environment: Arc<dyn EnvironmentProbe>) -> Self {
        self.environment = environment;
        self
    }

    /// Source of the `as_of` timestamp stamped on every request.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    #[cfg(test)]
    pub(crate) fn worker_spawner<F>(mut self, spawner: F) -> Self
    where
        F: Fn(Duration) -> AnalyticsResult<WorkerClient> + Send + Sync + 'static,
    {
        self.spawn_worker = Arc::new(spawner);
        self
    }

    pub fn build(self) -> AnalyticsResult<AnalyticsCoordinator> {
        self.settings.validate()?;
        let (mode, _) = watch::channel(CoordinatorMode::Uninitialized);
        let (filters, _) = watch::channel(FilterSet::default());
        Ok(AnalyticsCoordinator {
            inner: Arc::new(CoordinatorInner {
                store: self.store,
                settings: self.settings,
                environment: self.environment,
                clock: self.clock,
                spawn_worker: self.spawn_worker,
                mode,
                worker: Mutex::new(None),
                init_lock: AsyncMutex::new(()),
                next_request_id: AtomicU64::new(0),
                filters,
                snapshot: RwLock::new(None),
                overview: ViewSlot::new(None),
                trends: ViewSlot::new(Vec::new()),
                performance: ViewSlot::new(Vec::new()),
                heatmap: ViewSlot::new(Vec::new()),
            }),
        })
    }
}

/// Owns the four derived views and routes their computation to the worker
/// thread or, when that path is not usable, to an in-process call.
///
/// In fallback mode the aggregation runs inline on the task that called
/// `refresh`, blocking that runtime thread for the duration of the math.
/// For very large record sets this is a visible latency cost, accepted so
/// that analytics keep working when no worker can be hosted.
#[derive(Clone)]
pub struct AnalyticsCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AnalyticsCoordinator {
    pub fn builder(store: RecordStore) -> CoordinatorBuilder {
        CoordinatorBuilder {
            store,
            settings: AnalyticsSettings::default(),
            environment: Arc::new(HostEnvironment),
            clock: Arc::new(Utc::now),
            spawn_worker: Arc::new(WorkerClient::spawn),
        }
    }

    pub fn new(store: RecordStore, settings: AnalyticsSettings) -> AnalyticsResult<Self> {
        Self::builder(store).settings(settings).build()
    }

    pub fn mode(&self) -> CoordinatorMode {
        *self.inner.mode.borrow()
    }

    pub fn mode_changes(&self) -> watch::Receiver<CoordinatorMode> {
        self.inner.mode.subscribe()
    }

    pub fn active_filters(&self) -> FilterSet {
        self.inner.filters.borrow().clone()
    }

    pub fn filter_changes(&self) -> watch::Receiver<FilterSet> {
        self.inner.filters.subscribe()
    }

    pub fn settings(&self) -> &AnalyticsSettings {
        &self.inner.settings
    }

    /// Decides the execution path once. Later calls return the current mode.
    /// Never fails: anything missing downgrades to `FallbackOnly`.
    pub async fn initialize(&self) -> CoordinatorMode {
        let _guard = self.inner.init_lock.lock().await;
        let current = self.mode();
        if current != CoordinatorMode::Uninitialized {
            return current;
        }
        let next = self.probe().await;
        self.transition(next, false);
        self.mode()
    }

    /// Re-runs the environment probe, replacing any existing worker. The
    /// only way out of `FallbackOnly`.
    pub async fn force_reinitialize(&self) -> CoordinatorMode {
        let _guard = self.inner.init_lock.lock().await;
        let previous = lock(&self.inner.worker).take();
        if previous.is_some() {
            log_info!("Dropping existing aggregation worker for re-initialisation");
        }
        drop(previous);
        let next = self.probe().await;
        self.transition(next, true);
        self.mode()
    }

    async fn probe(&self) -> CoordinatorMode {
        let inner = &self.inner;
        let fallback = |reason| CoordinatorMode::FallbackOnly { reason };

        if !inner.settings.worker_enabled {
            return fallback(FallbackReason::Disabled);
        }
        if !inner.environment.supports_persistent_storage() {
            return fallback(FallbackReason::StorageUnavailable);
        }
        if let Err(err) = inner.store.probe().await {
            log_warn!("Record store unusable, using in-process aggregation: {err}");
            return fallback(FallbackReason::StorageUnavailable);
        }
        if !inner.environment.supports_background_workers() {
            return fallback(FallbackReason::WorkerUnavailable);
        }

        match (inner.spawn_worker)(inner.settings.worker_timeout()) {
            Ok(client) => {
                *lock(&inner.worker) = Some(client);
                CoordinatorMode::WorkerBacked
            }
            Err(err) => {
                log_warn!("Aggregation worker could not start: {err}");
                fallback(FallbackReason::WorkerUnavailable)
            }
        }
    }

    fn transition(&self, next: CoordinatorMode, explicit: bool) {
        let current = self.mode();
        if !current.can_transition_to(next, explicit) {
            log_debug!("Ignoring coordinator transition {current} -> {next}");
            return;
        }
        if next.is_fallback() {
            let retired = lock(&self.inner.worker).take();
            drop(retired);
        }
        log_info!("Analytics coordinator mode: {current} -> {next}");
        self.inner.mode.send_replace(next);
    }

    /// The worker to dispatch to, if the coordinator is worker-backed and the
    /// worker thread is still running.
    fn live_worker(&self) -> Option<WorkerClient> {
        if !self.mode().is_worker_backed() {
            return None;
        }
        let worker = lock(&self.inner.worker).clone();
        match worker {
            Some(client) if client.is_alive() => Some(client),
            _ => {
                self.transition(
                    CoordinatorMode::FallbackOnly {
                        reason: FallbackReason::WorkerLost,
                    },
                    false,
                );
                None
            }
        }
    }

    fn snapshot(&self) -> Option<Arc<Vec<Record>>> {
        match self.inner.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_snapshot(&self, records: Arc<Vec<Record>>) {
        let mut guard = match self.inner.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(records);
    }

    /// Reads every record, treating an unavailable store as empty.
    async fn load_records(&self) -> AnalyticsResult<(Vec<Record>, bool)> {
        match self.inner.store.get_all().await {
            Ok(records) => Ok((records, true)),
            Err(err) if err.is_storage_unavailable() => {
                log_debug!("Record store unavailable; treating cache as empty");
                Ok((Vec::new(), false))
            }
            Err(err) => Err(err),
        }
    }

    /// Assigns the next request id and marks it as the newest for `kind`.
    fn issue(&self, kind: AggregationKind) -> RequestId {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        match kind {
            AggregationKind::Overview => self.inner.overview.begin(request_id),
            AggregationKind::Trends => self.inner.trends.begin(request_id),
            AggregationKind::OperatorPerformance => self.inner.performance.begin(request_id),
            AggregationKind::Heatmap => self.inner.heatmap.begin(request_id),
        }
        request_id
    }

    fn publish(&self, request_id: RequestId, output: AggregationOutput) -> bool {
        let kind = output.kind();
        let published = match output {
            AggregationOutput::Overview(metrics) => {
                self.inner.overview.publish(request_id, Some(metrics))
            }
            AggregationOutput::Trends(points) => self.inner.trends.publish(request_id, points),
            AggregationOutput::OperatorPerformance(rows) => {
                self.inner.performance.publish(request_id, rows)
            }
            AggregationOutput::Heatmap(cells) => self.inner.heatmap.publish(request_id, cells),
        };
        if !published {
            log_debug!("Discarding stale {kind} result for request {request_id}");
        }
        published
    }

    async fn dispatch(
        &self,
        request_id: RequestId,
        request: AggregationRequest,
    ) -> AnalyticsResult<(AggregationOutput, ComputationPath)> {
        if let Some(worker) = self.live_worker() {
            let message = WorkerRequest {
                request_id,
                payload: request.clone(),
            };
            match worker.submit(message).await {
                Ok(output) => return Ok((output, ComputationPath::Worker)),
                Err(AnalyticsError::ComputationTimeout { kind, timeout_ms }) => {
                    match self.inner.settings.timeout_policy {
                        TimeoutPolicy::Fallback => log_warn!(
                            "{kind} request {request_id} timed out after {timeout_ms}ms; computing in-process"
                        ),
                        TimeoutPolicy::Error => {
                            log_warn!("{kind} request {request_id} timed out after {timeout_ms}ms");
                            return Err(AnalyticsError::ComputationTimeout { kind, timeout_ms });
                        }
                    }
                }
                Err(AnalyticsError::WorkerUnavailable(message)) => {
                    log_error!("Aggregation worker lost: {message}");
                    self.transition(
                        CoordinatorMode::FallbackOnly {
                            reason: FallbackReason::WorkerLost,
                        },
                        false,
                    );
                }
                Err(err) => return Err(err),
            }
        }

        evaluate(&request)
            .map(|output| (output, ComputationPath::InProcess))
            .map_err(|failure| AnalyticsError::Computation {
                kind: failure.kind,
                message: failure.message,
            })
    }

    async fn run_view(
        &self,
        kind: AggregationKind,
        request_id: RequestId,
        input: AggregationInput,
    ) -> ViewReport {
        let request = AggregationRequest::for_kind(kind, input, self.inner.settings.trend);
        match self.dispatch(request_id, request).await {
            Ok((output, path)) => ViewReport {
                kind,
                request_id,
                path: Some(path),
                published: self.publish(request_id, output),
                error: None,
            },
            Err(err) => {
                log_error!("{kind} request {request_id} failed: {err}");
                ViewReport {
                    kind,
                    request_id,
                    path: None,
                    published: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Re-reads the store once and recomputes all four views.
    ///
    /// `filters`, when given, becomes the active filter set. A view whose
    /// computation fails keeps its previous value and the failure is listed
    /// in the report. Only a store read error fails the whole call.
    pub async fn refresh(&self, filters: Option<FilterSet>) -> AnalyticsResult<RefreshReport> {
        self.initialize().await;
        if let Some(filters) = filters {
            self.inner.filters.send_replace(filters);
        }

        let (records, store_available) = self.load_records().await?;
        let records = Arc::new(records);
        self.store_snapshot(Arc::clone(&records));

        let input = AggregationInput {
            records: Arc::clone(&records),
            filters: self.active_filters(),
            as_of: (self.inner.clock)(),
        };
        let ids = AggregationKind::ALL.map(|kind| self.issue(kind));

        let (overview, trends, performance, heatmap) = tokio::join!(
            self.run_view(AggregationKind::Overview, ids[0], input.clone()),
            self.run_view(AggregationKind::Trends, ids[1], input.clone()),
            self.run_view(AggregationKind::OperatorPerformance, ids[2], input.clone()),
            self.run_view(AggregationKind::Heatmap, ids[3], input),
        );

        let report = RefreshReport {
            mode: self.mode(),
            record_count: records.len(),
            store_available,
            views: vec![overview, trends, performance, heatmap],
        };
        log_debug!(
            "Refresh over {} records finished in {} mode",
            report.record_count,
            report.mode
        );
        Ok(report)
    }

    /// Applies `filters` and recomputes one view against the last refresh's
    /// records. Before the first refresh only the filter set is updated.
    async fn recompute_view(
        &self,
        kind: AggregationKind,
        filters: Option<FilterSet>,
    ) -> AnalyticsResult<()> {
        let Some(filters) = filters else {
            return Ok(());
        };
        self.inner.filters.send_replace(filters.clone());
        self.initialize().await;

        let Some(records) = self.snapshot() else {
            return Ok(());
        };
        let input = AggregationInput {
            records,
            filters,
            as_of: (self.inner.clock)(),
        };
        let request_id = self.issue(kind);
        let request = AggregationRequest::for_kind(kind, input, self.inner.settings.trend);
        let (output, _) = self.dispatch(request_id, request).await?;
        self.publish(request_id, output);
        Ok(())
    }

    /// `None` until the first refresh completes.
    pub async fn get_overview(
        &self,
        filters: Option<FilterSet>,
    ) -> AnalyticsResult<watch::Receiver<Option<OverviewMetrics>>> {
        self.recompute_view(AggregationKind::Overview, filters)
            .await?;
        Ok(self.inner.overview.subscribe())
    }

    pub async fn get_trends(
        &self,
        filters: Option<FilterSet>,
    ) -> AnalyticsResult<watch::Receiver<Vec<TrendPoint>>> {
        self.recompute_view(AggregationKind::Trends, filters).await?;
        Ok(self.inner.trends.subscribe())
    }

    pub async fn get_operator_performance(
        &self,
        filters: Option<FilterSet>,
    ) -> AnalyticsResult<watch::Receiver<Vec<OperatorPerformance>>> {
        self.recompute_view(AggregationKind::OperatorPerformance, filters)
            .await?;
        Ok(self.inner.performance.subscribe())
    }

    pub async fn get_heatmap(
        &self,
        filters: Option<FilterSet>,
    ) -> AnalyticsResult<watch::Receiver<Vec<HeatmapCell>>> {
        self.recompute_view(AggregationKind::Heatmap, filters)
            .await?;
        Ok(self.inner.heatmap.subscribe())
    }

    /// Records currently in the store that pass the active filter set,
    /// ordered by schedule then id.
    async fn export_records(&self) -> AnalyticsResult<(Vec<Record>, FilterSet)> {
        let filters = self.active_filters();
        let (records, _) = self.load_records().await?;
        let mut records: Vec<Record> = records
            .into_iter()
            .filter(|record| filters.matches(record))
            .collect();
        records.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok((records, filters))
    }

    pub async fn export_csv(&self) -> AnalyticsResult<ExportBlob> {
        let (records, _) = self.export_records().await?;
        let blob = export::to_csv(&records).map_err(AnalyticsError::Export)?;
        log_info!(
            "Exported {} records as CSV ({} bytes)",
            blob.record_count,
            blob.bytes.len()
        );
        Ok(blob)
    }

    pub async fn export_json(&self) -> AnalyticsResult<ExportBlob> {
        let (records, filters) = self.export_records().await?;
        let blob = export::to_json(&records, &filters, (self.inner.clock)())
            .map_err(AnalyticsError::Export)?;
        log_info!(
            "Exported {} records as JSON ({} bytes)",
            blob.record_count,
            blob.bytes.len()
        );
        Ok(blob)
    }
}
