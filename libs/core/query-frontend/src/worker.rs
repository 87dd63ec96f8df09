//! Scheduler stream workers.
//!
//! Each worker is one long-running task owning one persistent bidirectional
//! stream to one scheduler. A [`WorkerSet`] groups the fixed number of
//! workers for a single scheduler address and tears them down together when
//! discovery removes the address.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpc::dispatch::scheduler_for_frontend_client::SchedulerForFrontendClient;
use rpc::dispatch::{
    FrontendToScheduler, FrontendToSchedulerType, HttpRequest, SchedulerStatus,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::registry::{EnqueueStatus, RequestRegistry};

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

// Frames buffered towards the transport; beyond this the worker waits for
// the stream to drain before dequeuing more outbound work.
const STREAM_BUFFER: usize = 4;

impl From<SchedulerStatus> for EnqueueStatus {
    fn from(status: SchedulerStatus) -> Self {
        match status {
            SchedulerStatus::Ok => Self::Accepted,
            SchedulerStatus::ShuttingDown => Self::ShuttingDown,
            SchedulerStatus::TooManyRequestsPerTenant => Self::TenantLimited,
            SchedulerStatus::Error => Self::Failed,
        }
    }
}

/// An ENQUEUE or CANCEL waiting in a worker's outbound queue.
#[derive(Debug)]
pub(crate) enum Outbound {
    Enqueue(EnqueuedQuery),
    Cancel { query_id: u64 },
}

/// Everything a worker needs to submit one query to its scheduler.
#[derive(Debug, Clone)]
pub(crate) struct EnqueuedQuery {
    pub query_id: u64,
    pub tenant: String,
    pub request: HttpRequest,
}

/// Cheap cloneable handle feeding one worker's outbound queue.
#[derive(Clone)]
pub struct WorkerHandle {
    address: String,
    outbound: mpsc::Sender<Outbound>,
}

impl WorkerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Non-blocking offer; a full or closed queue returns the message.
    pub(crate) fn offer(
        &self,
        message: Outbound,
    ) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.outbound.try_send(message)
    }

    /// Best-effort cancel on the worker that enqueued the query. The
    /// scheduler copes on its own if the frame never leaves this process.
    pub(crate) fn cancel(&self, query_id: u64) {
        if self.offer(Outbound::Cancel { query_id }).is_err() {
            debug!(
                query_id,
                scheduler = %self.address,
                "dropping cancel, worker queue unavailable"
            );
        }
    }
}

struct WorkerContext {
    address: String,
    frontend_address: String,
    registry: Arc<RequestRegistry>,
    shutdown: CancellationToken,
    ready: Arc<watch::Sender<bool>>,
}

impl WorkerContext {
    fn deposit(&self, query_id: u64, status: EnqueueStatus) {
        match self.registry.lookup(query_id) {
            Some(pending) => pending.deposit_status(status),
            None => debug!(query_id, "no pending query for scheduler verdict"),
        }
    }
}

/// Why one stream attempt ended.
enum StreamEnd {
    /// Set shutdown observed; do not reconnect.
    Shutdown,
    /// The stream failed before the INIT handshake completed.
    ConnectFailed,
    /// The stream failed after serving traffic.
    Disconnected,
}

/// The fixed-size group of workers for one scheduler address.
pub(crate) struct WorkerSet {
    address: String,
    handles: Vec<WorkerHandle>,
    shutdown: CancellationToken,
    ready_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerSet {
    pub(crate) fn spawn(
        address: &str,
        frontend_address: &str,
        concurrency: usize,
        queue_size: usize,
        registry: Arc<RequestRegistry>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        let ready_tx = Arc::new(ready_tx);

        let mut handles = Vec::with_capacity(concurrency);
        let mut tasks = Vec::with_capacity(concurrency);

        for _ in 0..concurrency {
            let (outbound_tx, outbound_rx) = mpsc::channel(queue_size);
            handles.push(WorkerHandle {
                address: address.to_string(),
                outbound: outbound_tx,
            });

            let ctx = WorkerContext {
                address: address.to_string(),
                frontend_address: frontend_address.to_string(),
                registry: Arc::clone(&registry),
                shutdown: shutdown.clone(),
                ready: Arc::clone(&ready_tx),
            };
            tasks.push(tokio::spawn(worker_loop(ctx, outbound_rx)));
        }

        Arc::new(Self {
            address: address.to_string(),
            handles,
            shutdown,
            ready_rx,
            tasks: Mutex::new(tasks),
        })
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    /// Resolves once the first worker completed its INIT handshake, or the
    /// set was shut down before any worker managed to.
    pub(crate) async fn ready(&self) {
        let mut ready_rx = self.ready_rx.clone();
        while !*ready_rx.borrow() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                changed = ready_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Signal every worker to stop and wait for them to drain their queues.
    pub(crate) async fn stop(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .expect("worker set lock poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        debug!(scheduler = %self.address, "worker set stopped");
    }
}

fn build_endpoint(address: &str) -> Result<Endpoint, tonic::transport::Error> {
    // Keep-alive tuning for a stream that stays idle between queries. No
    // request timeout: the loop call lives as long as the connection.
    Ok(Endpoint::from_shared(format!("http://{address}"))?
        .connect_timeout(Duration::from_secs(5))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true)
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(30))))
}

async fn worker_loop(ctx: WorkerContext, mut outbound_rx: mpsc::Receiver<Outbound>) {
    let endpoint = match build_endpoint(&ctx.address) {
        Ok(endpoint) => endpoint,
        Err(error) => {
            warn!(scheduler = %ctx.address, %error, "invalid scheduler address");
            reject_until_shutdown(&ctx, &mut outbound_rx).await;
            drain_queue(&ctx, &mut outbound_rx);
            return;
        }
    };
    let channel = endpoint.connect_lazy();

    let mut backoff = RECONNECT_BACKOFF_INITIAL;
    loop {
        if ctx.shutdown.is_cancelled() {
            break;
        }

        match run_stream(&ctx, channel.clone(), &mut outbound_rx).await {
            StreamEnd::Shutdown => break,
            StreamEnd::Disconnected => {
                // The stream served traffic; retry promptly.
                backoff = RECONNECT_BACKOFF_INITIAL;
            }
            StreamEnd::ConnectFailed => {
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }

        debug!(scheduler = %ctx.address, backoff = ?backoff, "scheduler stream down, reconnecting");
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
    }

    drain_queue(&ctx, &mut outbound_rx);
}

/// One connect-handshake-pump cycle over a single stream.
async fn run_stream(
    ctx: &WorkerContext,
    channel: Channel,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
) -> StreamEnd {
    let mut client = SchedulerForFrontendClient::new(channel);
    let (frames_tx, frames_rx) = mpsc::channel::<FrontendToScheduler>(STREAM_BUFFER);

    let mut inbound = tokio::select! {
        _ = ctx.shutdown.cancelled() => return StreamEnd::Shutdown,
        response = client.frontend_loop(ReceiverStream::new(frames_rx)) => match response {
            Ok(response) => response.into_inner(),
            Err(status) => {
                debug!(scheduler = %ctx.address, error = %status, "failed to open scheduler stream");
                return StreamEnd::ConnectFailed;
            }
        }
    };

    // INIT is the first frame on every stream and consumes exactly one ack.
    let init = FrontendToScheduler {
        r#type: FrontendToSchedulerType::Init as i32,
        frontend_address: ctx.frontend_address.clone(),
        ..Default::default()
    };
    if frames_tx.send(init).await.is_err() {
        return StreamEnd::ConnectFailed;
    }
    match inbound.message().await {
        Ok(Some(ack)) if ack.status() == SchedulerStatus::Ok => {}
        Ok(Some(ack)) => {
            warn!(
                scheduler = %ctx.address,
                status = ack.status().as_str_name(),
                "scheduler refused stream init"
            );
            return StreamEnd::ConnectFailed;
        }
        Ok(None) => return StreamEnd::ConnectFailed,
        Err(status) => {
            debug!(scheduler = %ctx.address, error = %status, "scheduler stream init failed");
            return StreamEnd::ConnectFailed;
        }
    }

    let _ = ctx.ready.send_replace(true);
    info!(scheduler = %ctx.address, "scheduler stream established");

    // ENQUEUE acks arrive in send order, so a FIFO of in-flight query IDs
    // is enough to match them. CANCEL frames receive no ack.
    let mut inflight: VecDeque<u64> = VecDeque::new();

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                fail_inflight(ctx, &mut inflight);
                return StreamEnd::Shutdown;
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Enqueue(query)) => {
                        let query_id = query.query_id;
                        let frame = FrontendToScheduler {
                            r#type: FrontendToSchedulerType::Enqueue as i32,
                            query_id,
                            tenant_id: query.tenant,
                            frontend_address: ctx.frontend_address.clone(),
                            http_request: Some(query.request),
                        };
                        if frames_tx.send(frame).await.is_err() {
                            ctx.deposit(query_id, EnqueueStatus::ShuttingDown);
                            fail_inflight(ctx, &mut inflight);
                            return StreamEnd::Disconnected;
                        }
                        inflight.push_back(query_id);
                    }
                    Some(Outbound::Cancel { query_id }) => {
                        let frame = FrontendToScheduler {
                            r#type: FrontendToSchedulerType::Cancel as i32,
                            query_id,
                            ..Default::default()
                        };
                        if frames_tx.send(frame).await.is_err() {
                            fail_inflight(ctx, &mut inflight);
                            return StreamEnd::Disconnected;
                        }
                    }
                    None => {
                        fail_inflight(ctx, &mut inflight);
                        return StreamEnd::Shutdown;
                    }
                }
            }
            ack = inbound.message() => {
                match ack {
                    Ok(Some(ack)) => match inflight.pop_front() {
                        Some(query_id) => {
                            let status = SchedulerStatus::try_from(ack.status)
                                .map(EnqueueStatus::from)
                                .unwrap_or(EnqueueStatus::Failed);
                            ctx.deposit(query_id, status);
                        }
                        None => {
                            debug!(scheduler = %ctx.address, "ack without outstanding enqueue");
                        }
                    },
                    Ok(None) => {
                        fail_inflight(ctx, &mut inflight);
                        return StreamEnd::Disconnected;
                    }
                    Err(status) => {
                        debug!(scheduler = %ctx.address, error = %status, "scheduler stream failed");
                        fail_inflight(ctx, &mut inflight);
                        return StreamEnd::Disconnected;
                    }
                }
            }
        }
    }
}

/// Queries that were sent but not yet acknowledged retry elsewhere.
fn fail_inflight(ctx: &WorkerContext, inflight: &mut VecDeque<u64>) {
    while let Some(query_id) = inflight.pop_front() {
        ctx.deposit(query_id, EnqueueStatus::ShuttingDown);
    }
}

/// Final pass over the queue once the worker stops: queued ENQUEUEs observe
/// SHUTTING_DOWN so their callers retry, queued CANCELs are dropped.
fn drain_queue(ctx: &WorkerContext, outbound_rx: &mut mpsc::Receiver<Outbound>) {
    outbound_rx.close();
    while let Ok(outbound) = outbound_rx.try_recv() {
        if let Outbound::Enqueue(query) = outbound {
            ctx.deposit(query.query_id, EnqueueStatus::ShuttingDown);
        }
    }
}

/// Fallback when the scheduler address cannot even form an endpoint: answer
/// every ENQUEUE with SHUTTING_DOWN until the set is torn down.
async fn reject_until_shutdown(ctx: &WorkerContext, outbound_rx: &mut mpsc::Receiver<Outbound>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => return,
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Enqueue(query)) => {
                    ctx.deposit(query.query_id, EnqueueStatus::ShuttingDown);
                }
                Some(Outbound::Cancel { .. }) => {}
                None => return,
            }
        }
    }
}
