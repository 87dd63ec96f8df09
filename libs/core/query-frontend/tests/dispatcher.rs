//! End-to-end dispatcher tests against a scripted in-process scheduler.
//!
//! The mock scheduler serves the real `SchedulerForFrontend` bidi stream on
//! a localhost port and records every ENQUEUE/CANCEL frame it sees. When
//! scripted to accept a query it can play the part of the executing worker
//! too, delivering the result back through the frontend's real
//! `FrontendForWorker` endpoint.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use query_frontend::{
    Dispatcher, FrontendConfig, FrontendError, FrontendService, RequestContext, ResultSink,
    WorkerResultService, TENANT_METADATA_KEY,
};
use rpc::dispatch::frontend_client::FrontendClient;
use rpc::dispatch::frontend_for_worker_client::FrontendForWorkerClient;
use rpc::dispatch::frontend_for_worker_server::FrontendForWorkerServer;
use rpc::dispatch::frontend_server::FrontendServer;
use rpc::dispatch::scheduler_for_frontend_server::{
    SchedulerForFrontend, SchedulerForFrontendServer,
};
use rpc::dispatch::{
    FrontendToScheduler, FrontendToSchedulerType, HttpRequest, HttpResponse, QueryResultRequest,
    QueryStats, RoundTripRequest, SchedulerStatus, SchedulerToFrontend,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::Stream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// What the mock delivers after accepting an ENQUEUE.
#[derive(Clone)]
struct Delivery {
    delay: Duration,
    response: HttpResponse,
}

struct SchedulerState {
    /// ENQUEUE and CANCEL frames in arrival order, across all streams.
    frames: Mutex<Vec<FrontendToScheduler>>,
    /// Per-ENQUEUE verdicts consumed front to back; empty falls back to
    /// `default_status`.
    script: Mutex<VecDeque<SchedulerStatus>>,
    default_status: SchedulerStatus,
    delivery: Option<Delivery>,
}

impl SchedulerState {
    fn new(default_status: SchedulerStatus) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_status,
            delivery: None,
        })
    }

    fn with_delivery(default_status: SchedulerStatus, delivery: Delivery) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_status,
            delivery: Some(delivery),
        })
    }

    fn push_script(&self, statuses: impl IntoIterator<Item = SchedulerStatus>) {
        self.script.lock().unwrap().extend(statuses);
    }

    fn next_status(&self) -> SchedulerStatus {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_status)
    }

    fn frames(&self) -> Vec<FrontendToScheduler> {
        self.frames.lock().unwrap().clone()
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn count_of(&self, frame_type: FrontendToSchedulerType) -> usize {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.r#type() == frame_type)
            .count()
    }
}

struct MockScheduler {
    state: Arc<SchedulerState>,
}

#[tonic::async_trait]
impl SchedulerForFrontend for MockScheduler {
    type FrontendLoopStream =
        Pin<Box<dyn Stream<Item = Result<SchedulerToFrontend, Status>> + Send>>;

    async fn frontend_loop(
        &self,
        request: Request<Streaming<FrontendToScheduler>>,
    ) -> Result<Response<Self::FrontendLoopStream>, Status> {
        let mut inbound = request.into_inner();
        let state = Arc::clone(&self.state);
        let (ack_tx, ack_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            while let Ok(Some(frame)) = inbound.message().await {
                match frame.r#type() {
                    FrontendToSchedulerType::Init => {
                        let ack = SchedulerToFrontend {
                            status: SchedulerStatus::Ok as i32,
                        };
                        if ack_tx.send(Ok(ack)).await.is_err() {
                            return;
                        }
                    }
                    FrontendToSchedulerType::Enqueue => {
                        state.frames.lock().unwrap().push(frame.clone());
                        let status = state.next_status();
                        if status == SchedulerStatus::Ok {
                            if let Some(delivery) = state.delivery.clone() {
                                tokio::spawn(deliver_result(frame, delivery));
                            }
                        }
                        let ack = SchedulerToFrontend {
                            status: status as i32,
                        };
                        if ack_tx.send(Ok(ack)).await.is_err() {
                            return;
                        }
                    }
                    FrontendToSchedulerType::Cancel => {
                        state.frames.lock().unwrap().push(frame);
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(ack_rx))))
    }
}

/// Plays the executing worker: waits, then pushes the result to the
/// frontend address carried in the ENQUEUE frame.
async fn deliver_result(frame: FrontendToScheduler, delivery: Delivery) {
    tokio::time::sleep(delivery.delay).await;

    let mut client =
        match FrontendForWorkerClient::connect(format!("http://{}", frame.frontend_address)).await
        {
            Ok(client) => client,
            Err(_) => return,
        };
    let mut request = Request::new(QueryResultRequest {
        query_id: frame.query_id,
        http_response: Some(delivery.response),
        stats: Some(QueryStats {
            queue_time_ms: 1,
            execution_time_ms: 7,
        }),
    });
    request
        .metadata_mut()
        .insert(TENANT_METADATA_KEY, frame.tenant_id.parse().unwrap());
    let _ = client.query_result(request).await;
}

async fn spawn_scheduler(state: Arc<SchedulerState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        Server::builder()
            .add_service(SchedulerForFrontendServer::new(MockScheduler { state }))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    address
}

/// A frontend wired up the way the app wires it: dispatcher plus the two
/// gRPC services on one localhost socket.
async fn spawn_frontend(worker_concurrency: usize) -> (Arc<Dispatcher>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();

    let config = FrontendConfig::default()
        .with_advertised("127.0.0.1", local.port())
        .with_worker_concurrency(worker_concurrency);
    config.validate().unwrap();

    let dispatcher = Arc::new(Dispatcher::new(&config));
    let frontend_service = FrontendService::new(Arc::clone(&dispatcher));
    let result_service =
        WorkerResultService::new(ResultSink::new(Arc::clone(dispatcher.registry())));

    tokio::spawn(async move {
        Server::builder()
            .add_service(FrontendServer::new(frontend_service))
            .add_service(FrontendForWorkerServer::new(result_service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (dispatcher, local.to_string())
}

fn get_request() -> HttpRequest {
    HttpRequest {
        method: "GET".to_string(),
        url: "/api/v1/query".to_string(),
        headers: vec![],
        body: vec![],
    }
}

async fn eventually(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn basic_round_trip_returns_scheduler_result() {
    let state = SchedulerState::with_delivery(
        SchedulerStatus::Ok,
        Delivery {
            delay: Duration::from_millis(100),
            response: HttpResponse {
                code: 200,
                headers: vec![],
                body: b"all fine here".to_vec(),
            },
        },
    );
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let response = dispatcher.round_trip(&ctx, get_request()).await.unwrap();

    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"all fine here");
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn retries_until_scheduler_accepts() {
    let state = SchedulerState::with_delivery(
        SchedulerStatus::Ok,
        Delivery {
            delay: Duration::from_millis(20),
            response: HttpResponse {
                code: 200,
                headers: vec![],
                body: b"hello world".to_vec(),
            },
        },
    );
    state.push_script([
        SchedulerStatus::ShuttingDown,
        SchedulerStatus::ShuttingDown,
        SchedulerStatus::ShuttingDown,
        SchedulerStatus::ShuttingDown,
    ]);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let response = dispatcher.round_trip(&ctx, get_request()).await.unwrap();

    assert_eq!(response.body, b"hello world");
    assert_eq!(state.count_of(FrontendToSchedulerType::Enqueue), 5);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn tenant_over_quota_gets_429() {
    let state = SchedulerState::new(SchedulerStatus::TooManyRequestsPerTenant);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let response = dispatcher.round_trip(&ctx, get_request()).await.unwrap();

    assert_eq!(response.code, 429);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn draining_schedulers_exhaust_all_retries() {
    let state = SchedulerState::new(SchedulerStatus::ShuttingDown);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let err = dispatcher.round_trip(&ctx, get_request()).await.unwrap_err();

    assert!(err.to_string().contains("failed to enqueue request"));
    assert_eq!(state.count_of(FrontendToSchedulerType::Enqueue), 5);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn scheduler_error_fails_without_retry() {
    let state = SchedulerState::new(SchedulerStatus::Error);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let err = dispatcher.round_trip(&ctx, get_request()).await.unwrap_err();

    assert!(matches!(err, FrontendError::EnqueueFailed));
    assert_eq!(state.count_of(FrontendToSchedulerType::Enqueue), 1);
}

#[tokio::test]
async fn caller_deadline_cancels_an_enqueued_query() {
    // The scheduler accepts but nothing ever delivers a result.
    let state = SchedulerState::new(SchedulerStatus::Ok);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test").with_timeout(Duration::from_millis(200));
    let err = dispatcher.round_trip(&ctx, get_request()).await.unwrap_err();
    assert!(matches!(err, FrontendError::DeadlineExceeded));
    assert!(dispatcher.registry().is_empty());

    assert!(
        eventually(|| state.frame_count() == 2, Duration::from_secs(2)).await,
        "expected exactly ENQUEUE then CANCEL, got {:?}",
        state.frames()
    );
    let frames = state.frames();
    assert_eq!(frames[0].r#type(), FrontendToSchedulerType::Enqueue);
    assert_eq!(frames[1].r#type(), FrontendToSchedulerType::Cancel);
    assert_eq!(frames[0].query_id, frames[1].query_id);
}

#[tokio::test]
async fn deadline_fanout_cancels_every_concurrent_query() {
    let state = SchedulerState::new(SchedulerStatus::Ok);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let worker_concurrency = 5;
    let (dispatcher, _) = spawn_frontend(worker_concurrency).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let total = worker_concurrency + 5;
    let mut calls = Vec::new();
    for _ in 0..total {
        let dispatcher = Arc::clone(&dispatcher);
        let ctx = RequestContext::new("test").with_timeout(Duration::from_millis(200));
        calls.push(tokio::spawn(async move {
            dispatcher.round_trip(&ctx, get_request()).await
        }));
    }

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, FrontendError::DeadlineExceeded));
    }
    assert!(dispatcher.registry().is_empty());

    assert!(
        eventually(|| state.frame_count() == 2 * total, Duration::from_secs(2)).await,
        "expected {} frames, got {}",
        2 * total,
        state.frame_count()
    );
    assert_eq!(state.count_of(FrontendToSchedulerType::Enqueue), total);
    assert_eq!(state.count_of(FrontendToSchedulerType::Cancel), total);
}

#[tokio::test]
async fn metric_series_follow_pool_membership() {
    let state = SchedulerState::with_delivery(
        SchedulerStatus::Ok,
        Delivery {
            delay: Duration::from_millis(10),
            response: HttpResponse {
                code: 200,
                headers: vec![],
                body: vec![],
            },
        },
    );
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;

    dispatcher.pool().add_address(&scheduler_address).await;
    assert_eq!(
        dispatcher.metrics().enqueued_requests(&scheduler_address),
        Some(0)
    );
    assert_eq!(
        dispatcher.metrics().scheduler_addresses(),
        dispatcher.pool().addresses()
    );

    let ctx = RequestContext::new("test");
    dispatcher.round_trip(&ctx, get_request()).await.unwrap();
    assert_eq!(
        dispatcher.metrics().enqueued_requests(&scheduler_address),
        Some(1)
    );

    dispatcher.pool().remove_address(&scheduler_address).await;
    assert_eq!(
        dispatcher.metrics().enqueued_requests(&scheduler_address),
        None
    );
    assert!(dispatcher.pool().addresses().is_empty());
    assert!(dispatcher.metrics().scheduler_addresses().is_empty());
}

#[tokio::test]
async fn removing_the_only_scheduler_does_not_break_cancellation() {
    let state = SchedulerState::new(SchedulerStatus::Ok);
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, _) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let ctx = RequestContext::new("test");
    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        let ctx = ctx.clone();
        tokio::spawn(async move { dispatcher.round_trip(&ctx, get_request()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatcher.pool().remove_address(&scheduler_address).await;
    ctx.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, FrontendError::Cancelled));
    assert!(dispatcher.registry().is_empty());

    // The cancel had nowhere to go: the scheduler saw only the ENQUEUE.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.frame_count(), 1);
    assert_eq!(state.frames()[0].r#type(), FrontendToSchedulerType::Enqueue);
}

#[tokio::test]
async fn round_trip_served_over_grpc() {
    let state = SchedulerState::with_delivery(
        SchedulerStatus::Ok,
        Delivery {
            delay: Duration::from_millis(20),
            response: HttpResponse {
                code: 200,
                headers: vec![],
                body: b"all fine here".to_vec(),
            },
        },
    );
    let scheduler_address = spawn_scheduler(Arc::clone(&state)).await;
    let (dispatcher, frontend_address) = spawn_frontend(5).await;
    dispatcher.pool().add_address(&scheduler_address).await;

    let mut client = FrontendClient::connect(format!("http://{frontend_address}"))
        .await
        .unwrap();

    // Without a tenant the call is rejected outright.
    let err = client
        .round_trip(Request::new(RoundTripRequest {
            http_request: Some(get_request()),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let mut request = Request::new(RoundTripRequest {
        http_request: Some(get_request()),
    });
    request
        .metadata_mut()
        .insert(TENANT_METADATA_KEY, "test".parse().unwrap());
    let response = client.round_trip(request).await.unwrap().into_inner();

    let http_response = response.http_response.unwrap();
    assert_eq!(http_response.code, 200);
    assert_eq!(http_response.body, b"all fine here");
}
