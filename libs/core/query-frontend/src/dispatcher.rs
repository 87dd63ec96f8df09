//! The synchronous round-trip entry point.
//!
//! `round_trip` coordinates the three asynchronous parties of one call: the
//! caller (cancellation and deadline), the scheduler stream worker (enqueue
//! verdict), and the result sink (executed response). All waits multiplex
//! those sources with the process shutdown signal.

use std::sync::Arc;

use rpc::dispatch::{HttpRequest, HttpResponse};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FrontendConfig;
use crate::error::{FrontendError, FrontendResult};
use crate::metrics::FrontendMetrics;
use crate::pool::WorkerPool;
use crate::registry::{EnqueueStatus, QueryResult, RegisteredQuery, RequestRegistry};
use crate::worker::{EnqueuedQuery, WorkerHandle};

/// Caller context for one round trip: tenant identity, an optional
/// deadline, and a cancellation token the caller may fire at any time.
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant: String,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct Dispatcher {
    registry: Arc<RequestRegistry>,
    pool: Arc<WorkerPool>,
    worker_concurrency: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: &FrontendConfig) -> Self {
        let registry = Arc::new(RequestRegistry::new());
        let metrics = Arc::new(FrontendMetrics::new());
        let shutdown = CancellationToken::new();
        let pool = Arc::new(WorkerPool::new(
            config,
            Arc::clone(&registry),
            metrics,
            shutdown.child_token(),
        ));

        Self {
            registry,
            pool,
            worker_concurrency: config.worker_concurrency,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<FrontendMetrics> {
        self.pool.metrics()
    }

    /// Fail in-flight calls with `ShuttingDown` and tear the pool down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.pool.shutdown().await;
    }

    /// Submit one request and wait for its scheduler-delivered response.
    ///
    /// Returns the executed response, a synthesized 429 when the tenant is
    /// over its quota, or an error. Honours the caller's cancellation token
    /// and deadline at every wait point. The pending entry is always
    /// unregistered before returning.
    pub async fn round_trip(
        &self,
        ctx: &RequestContext,
        request: HttpRequest,
    ) -> FrontendResult<HttpResponse> {
        if ctx.tenant.is_empty() {
            return Err(FrontendError::MissingTenant);
        }

        let RegisteredQuery {
            pending,
            mut enqueue_rx,
            mut response_rx,
        } = self.registry.register(&ctx.tenant);
        let query_id = pending.query_id();

        let result = self
            .dispatch(ctx, query_id, request, &mut enqueue_rx, &mut response_rx)
            .await;
        self.registry.unregister(query_id);
        result
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        query_id: u64,
        request: HttpRequest,
        enqueue_rx: &mut mpsc::Receiver<EnqueueStatus>,
        response_rx: &mut oneshot::Receiver<QueryResult>,
    ) -> FrontendResult<HttpResponse> {
        // Retries are bounded by the pool's own parallelism per address, so
        // the loop terminates even when every scheduler is draining.
        for attempt in 0..self.worker_concurrency {
            let query = EnqueuedQuery {
                query_id,
                tenant: ctx.tenant.clone(),
                request: request.clone(),
            };
            let Some(worker) = self.pool.offer(query) else {
                return Err(FrontendError::NoSchedulers);
            };

            let status = tokio::select! {
                status = enqueue_rx.recv() => status.unwrap_or(EnqueueStatus::Failed),
                _ = ctx.cancel.cancelled() => {
                    worker.cancel(query_id);
                    return Err(FrontendError::Cancelled);
                }
                _ = deadline_elapsed(ctx.deadline) => {
                    worker.cancel(query_id);
                    return Err(FrontendError::DeadlineExceeded);
                }
                _ = self.shutdown.cancelled() => {
                    worker.cancel(query_id);
                    return Err(FrontendError::ShuttingDown);
                }
            };

            match status {
                EnqueueStatus::Accepted => {
                    debug!(query_id, tenant = %ctx.tenant, scheduler = %worker.address(), "query enqueued");
                    return self.await_response(ctx, query_id, &worker, response_rx).await;
                }
                EnqueueStatus::ShuttingDown => {
                    debug!(query_id, attempt, "scheduler shutting down, retrying enqueue");
                }
                EnqueueStatus::TenantLimited => {
                    return Ok(too_many_requests_response());
                }
                EnqueueStatus::Failed => {
                    return Err(FrontendError::EnqueueFailed);
                }
            }
        }

        Err(FrontendError::EnqueueFailed)
    }

    async fn await_response(
        &self,
        ctx: &RequestContext,
        query_id: u64,
        worker: &WorkerHandle,
        response_rx: &mut oneshot::Receiver<QueryResult>,
    ) -> FrontendResult<HttpResponse> {
        tokio::select! {
            result = &mut *response_rx => match result {
                Ok(result) => {
                    debug!(query_id, code = result.response.code, "query completed");
                    Ok(result.response)
                }
                // The sender lives inside the registered pending entry, so
                // this only fires if the process is tearing state down.
                Err(_) => Err(FrontendError::ShuttingDown),
            },
            _ = ctx.cancel.cancelled() => {
                worker.cancel(query_id);
                Err(FrontendError::Cancelled)
            }
            _ = deadline_elapsed(ctx.deadline) => {
                worker.cancel(query_id);
                Err(FrontendError::DeadlineExceeded)
            }
            _ = self.shutdown.cancelled() => Err(FrontendError::ShuttingDown),
        }
    }
}

/// The quota rejection is an ordinary response, not an error.
fn too_many_requests_response() -> HttpResponse {
    HttpResponse {
        code: 429,
        headers: vec![],
        body: b"too many outstanding requests".to_vec(),
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&FrontendConfig::default())
    }

    #[tokio::test]
    async fn test_missing_tenant_is_rejected() {
        let dispatcher = dispatcher();
        let ctx = RequestContext::new("");

        let err = dispatcher
            .round_trip(&ctx, HttpRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FrontendError::MissingTenant));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pool_fails_with_no_schedulers() {
        let dispatcher = dispatcher();
        let ctx = RequestContext::new("tenant-a");

        let err = dispatcher
            .round_trip(&ctx, HttpRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FrontendError::NoSchedulers));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_before_dispatch() {
        let dispatcher = dispatcher();
        let ctx = RequestContext::new("tenant-a");
        ctx.cancel();

        // With an empty pool the offer fails first; the point is that the
        // registry never leaks whatever path is taken.
        let _ = dispatcher.round_trip(&ctx, HttpRequest::default()).await;
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_quota_response_shape() {
        let response = too_many_requests_response();
        assert_eq!(response.code, 429);
    }
}
