use std::{
    collections::HashMap,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use tokio::sync::{mpsc as async_mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::aggregation::{evaluate, AggregationOutput};
use crate::error::{AnalyticsError, AnalyticsResult};

use super::protocol::{RequestId, ResponsePayload, WorkerRequest, WorkerResponse};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

enum WorkerCommand {
    Process(WorkerRequest),
    Shutdown,
}

type PendingReplies = Arc<Mutex<HashMap<RequestId, oneshot::Sender<WorkerResponse>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Computes one request on the worker thread.
pub fn handle_request(request: WorkerRequest) -> WorkerResponse {
    let payload = match evaluate(&request.payload) {
        Ok(output) => ResponsePayload::Complete(output),
        Err(failure) => {
            log_error!(
                "worker {} computation failed for request {}: {}",
                failure.kind,
                request.request_id,
                failure.message
            );
            ResponsePayload::Error {
                kind: failure.kind,
                message: failure.message,
            }
        }
    };
    WorkerResponse {
        request_id: request.request_id,
        payload,
    }
}

struct WorkerThread {
    sender: mpsc::Sender<WorkerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Dropping asks the thread to stop and detaches it. A computation already
/// running finishes on its own; the caller never waits for it.
impl Drop for WorkerThread {
    fn drop(&mut self) {
        if lock(&self.handle).take().is_some()
            && self.sender.send(WorkerCommand::Shutdown).is_err()
        {
            log_debug!("aggregation worker already stopped");
        }
    }
}

struct ClientInner {
    thread: WorkerThread,
    /// Shared with the worker thread, which skips requests no longer listed.
    pending: PendingReplies,
    router_cancel: CancellationToken,
    timeout: Duration,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.router_cancel.cancel();
    }
}

/// Async handle to the aggregation worker thread.
///
/// Replies come back on a single channel and are matched to their callers
/// by request id, so they may complete in any order.
#[derive(Clone)]
pub struct WorkerClient {
    inner: Arc<ClientInner>,
}

impl WorkerClient {
    pub fn spawn(timeout: Duration) -> AnalyticsResult<Self> {
        Self::spawn_with_handler(timeout, handle_request)
    }

    pub(crate) fn spawn_with_handler<H>(timeout: Duration, handler: H) -> AnalyticsResult<Self>
    where
        H: Fn(WorkerRequest) -> WorkerResponse + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AnalyticsError::WorkerUnavailable("no async runtime to route worker replies".into())
        })?;

        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (reply_tx, reply_rx) = async_mpsc::unbounded_channel::<WorkerResponse>();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let awaited = Arc::clone(&pending);

        let handle = thread::Builder::new()
            .name("opsdesk-analytics-worker".into())
            .spawn(move || {
                if ready_tx.send(()).is_err() {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        WorkerCommand::Process(request) => {
                            if !lock(&awaited).contains_key(&request.request_id) {
                                log_debug!(
                                    "skipping {} request {}: caller gave up",
                                    request.kind(),
                                    request.request_id
                                );
                                continue;
                            }
                            let response = handler(request);
                            if reply_tx.send(response).is_err() {
                                log_warn!("worker reply router is gone; stopping worker");
                                break;
                            }
                        }
                        WorkerCommand::Shutdown => break,
                    }
                }

                log_info!("Aggregation worker shutting down");
            })
            .map_err(|err| {
                AnalyticsError::WorkerUnavailable(format!("failed to spawn worker thread: {err}"))
            })?;

        ready_rx.recv().map_err(|_| {
            AnalyticsError::WorkerUnavailable(
                "worker thread exited before signaling readiness".into(),
            )
        })?;

        let router_cancel = CancellationToken::new();
        runtime.spawn(route_replies(
            reply_rx,
            Arc::clone(&pending),
            router_cancel.clone(),
        ));

        log_info!("Aggregation worker started (timeout {}ms)", timeout.as_millis());

        Ok(Self {
            inner: Arc::new(ClientInner {
                thread: WorkerThread {
                    sender: command_tx,
                    handle: Mutex::new(Some(handle)),
                },
                pending,
                router_cancel,
                timeout,
            }),
        })
    }

    pub fn is_alive(&self) -> bool {
        if self.inner.router_cancel.is_cancelled() {
            return false;
        }
        lock(&self.inner.thread.handle)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Sends one request and waits for the reply carrying the same id.
    pub async fn submit(&self, request: WorkerRequest) -> AnalyticsResult<AggregationOutput> {
        let request_id = request.request_id;
        let kind = request.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id, reply_tx);

        if self.inner.router_cancel.is_cancelled()
            || self
                .inner
                .thread
                .sender
                .send(WorkerCommand::Process(request))
                .is_err()
        {
            lock(&self.inner.pending).remove(&request_id);
            return Err(AnalyticsError::WorkerUnavailable(
                "worker thread is no longer running".into(),
            ));
        }

        match tokio::time::timeout(self.inner.timeout, reply_rx).await {
            Ok(Ok(response)) => match response.payload {
                ResponsePayload::Complete(output) => Ok(output),
                ResponsePayload::Error { kind, message } => {
                    Err(AnalyticsError::Computation { kind, message })
                }
            },
            Ok(Err(_)) => Err(AnalyticsError::WorkerUnavailable(
                "worker disconnected before replying".into(),
            )),
            Err(_) => {
                lock(&self.inner.pending).remove(&request_id);
                Err(AnalyticsError::ComputationTimeout {
                    kind,
                    timeout_ms: self.inner.timeout.as_millis() as u64,
                })
            }
        }
    }
}

async fn route_replies(
    mut replies: async_mpsc::UnboundedReceiver<WorkerResponse>,
    pending: PendingReplies,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            reply = replies.recv() => match reply {
                Some(response) => {
                    let waiter = lock(&pending).remove(&response.request_id);
                    match waiter {
                        Some(tx) => {
                            if tx.send(response).is_err() {
                                log_debug!("caller stopped waiting for a worker reply");
                            }
                        }
                        None => log_debug!(
                            "dropping {} reply for expired request {}",
                            response.kind(),
                            response.request_id
                        ),
                    }
                }
                None => {
                    log_warn!("aggregation worker reply channel closed");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    // Mark the router gone before dropping the senders, so a caller that
    // registers after the clear still sees the cancellation.
    cancel.cancel();
    lock(&pending).clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{
        compute_overview, AggregationInput, AggregationKind, AggregationRequest, FilterSet,
        TrendQuery,
    };
    use crate::db::models::{Record, RecordStatus};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn input() -> AggregationInput {
        let scheduled_at = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        let records = (0..4)
            .map(|i| Record {
                id: format!("PU-{i}"),
                operator_id: Some(format!("op-{}", i % 2)),
                status: if i % 2 == 0 {
                    RecordStatus::Completed
                } else {
                    RecordStatus::Scheduled
                },
                category: None,
                scheduled_at,
                created_at: None,
                status_changed_at: None,
                quantity: 1,
                weight_kg: 1.0,
                cost: 1.0,
            })
            .collect();
        AggregationInput {
            records: Arc::new(records),
            filters: FilterSet::new(),
            as_of: scheduled_at,
        }
    }

    #[tokio::test]
    async fn worker_result_matches_direct_computation() {
        let client = WorkerClient::spawn(Duration::from_secs(5)).unwrap();
        let input = input();
        let direct = compute_overview(&input.records, &input.filters, input.as_of);

        let output = client
            .submit(WorkerRequest {
                request_id: 1,
                payload: AggregationRequest::Overview(input),
            })
            .await
            .unwrap();
        assert_eq!(output, AggregationOutput::Overview(direct));
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn concurrent_requests_are_correlated_by_id() {
        let client = WorkerClient::spawn(Duration::from_secs(5)).unwrap();

        let submissions = AggregationKind::ALL.into_iter().enumerate().map(|(i, kind)| {
            let client = client.clone();
            let request = WorkerRequest {
                request_id: 100 + i as u64,
                payload: AggregationRequest::for_kind(kind, input(), TrendQuery::default()),
            };
            async move { (kind, client.submit(request).await) }
        });

        for (kind, result) in join_spawned(submissions).await {
            assert_eq!(result.unwrap().kind(), kind);
        }
    }

    #[tokio::test]
    async fn late_reply_for_expired_request_is_dropped() {
        let client = WorkerClient::spawn_with_handler(Duration::from_millis(50), |request| {
            if request.request_id == 1 {
                std::thread::sleep(Duration::from_millis(200));
            }
            handle_request(request)
        })
        .unwrap();

        let first = client
            .submit(WorkerRequest {
                request_id: 1,
                payload: AggregationRequest::Overview(input()),
            })
            .await;
        assert!(matches!(first, Err(AnalyticsError::ComputationTimeout { .. })));

        // Let the stale reply for id 1 arrive; it must not be handed to id 2.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let second = client
            .submit(WorkerRequest {
                request_id: 2,
                payload: AggregationRequest::Heatmap(input()),
            })
            .await
            .unwrap();
        assert_eq!(second.kind(), AggregationKind::Heatmap);
    }

    #[tokio::test]
    async fn expired_requests_are_not_computed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let client = WorkerClient::spawn_with_handler(Duration::from_millis(50), move |request| {
            counted.fetch_add(1, Ordering::SeqCst);
            if request.request_id == 1 {
                std::thread::sleep(Duration::from_millis(250));
            }
            handle_request(request)
        })
        .unwrap();

        // Request 2 queues behind the slow request 1 and expires while waiting.
        for request_id in [1, 2] {
            let result = client
                .submit(WorkerRequest {
                    request_id,
                    payload: AggregationRequest::Overview(input()),
                })
                .await;
            assert!(matches!(result, Err(AnalyticsError::ComputationTimeout { .. })));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        client
            .submit(WorkerRequest {
                request_id: 3,
                payload: AggregationRequest::Heatmap(input()),
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_a_busy_worker_does_not_wait_for_it() {
        let client = WorkerClient::spawn_with_handler(Duration::from_millis(20), |request| {
            std::thread::sleep(Duration::from_millis(1_500));
            handle_request(request)
        })
        .unwrap();
        let _ = client
            .submit(WorkerRequest {
                request_id: 1,
                payload: AggregationRequest::Overview(input()),
            })
            .await;

        let started = std::time::Instant::now();
        drop(client);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn slow_worker_times_out() {
        let client = WorkerClient::spawn_with_handler(Duration::from_millis(20), |request| {
            std::thread::sleep(Duration::from_millis(300));
            handle_request(request)
        })
        .unwrap();

        let err = client
            .submit(WorkerRequest {
                request_id: 9,
                payload: AggregationRequest::Heatmap(input()),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::ComputationTimeout {
                kind: AggregationKind::Heatmap,
                timeout_ms: 20
            }
        ));
    }

    #[tokio::test]
    async fn handler_errors_surface_per_request() {
        let client = WorkerClient::spawn_with_handler(Duration::from_secs(5), |request| {
            if request.request_id == 2 {
                WorkerResponse {
                    request_id: request.request_id,
                    payload: ResponsePayload::Error {
                        kind: request.kind(),
                        message: "malformed record".into(),
                    },
                }
            } else {
                handle_request(request)
            }
        })
        .unwrap();

        let failed = client
            .submit(WorkerRequest {
                request_id: 2,
                payload: AggregationRequest::OperatorPerformance(input()),
            })
            .await;
        assert!(matches!(failed, Err(AnalyticsError::Computation { .. })));

        let ok = client
            .submit(WorkerRequest {
                request_id: 3,
                payload: AggregationRequest::OperatorPerformance(input()),
            })
            .await
            .unwrap();
        assert_eq!(ok.kind(), AggregationKind::OperatorPerformance);
    }

    #[test]
    fn spawn_requires_runtime() {
        let err = WorkerClient::spawn(Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, AnalyticsError::WorkerUnavailable(_)));
    }

    async fn join_spawned<F, T>(futures: impl Iterator<Item = F>) -> Vec<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = futures.map(tokio::spawn).collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }
}
