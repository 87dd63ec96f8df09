//! gRPC surface of the frontend.
//!
//! Two services share the frontend's listening socket: `Frontend` for the
//! synchronous caller-facing round trip and `FrontendForWorker` for the
//! out-of-band result push from the executing worker service. Tenant
//! identity rides the `x-tenant-id` metadata key on both.

use std::sync::Arc;

use rpc::dispatch::frontend_for_worker_server::FrontendForWorker;
use rpc::dispatch::frontend_server::Frontend;
use rpc::dispatch::{
    QueryResultRequest, QueryResultResponse, RoundTripRequest, RoundTripResponse,
};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::dispatcher::{Dispatcher, RequestContext};
use crate::error::FrontendError;
use crate::result_sink::ResultSink;

pub const TENANT_METADATA_KEY: &str = "x-tenant-id";

fn tenant_from_metadata(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(TENANT_METADATA_KEY)
        .and_then(|value| value.to_str().ok())
        .filter(|tenant| !tenant.is_empty())
        .map(str::to_string)
}

/// Caller-facing service.
pub struct FrontendService {
    dispatcher: Arc<Dispatcher>,
}

impl FrontendService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[tonic::async_trait]
impl Frontend for FrontendService {
    async fn round_trip(
        &self,
        request: Request<RoundTripRequest>,
    ) -> Result<Response<RoundTripResponse>, Status> {
        let tenant = tenant_from_metadata(request.metadata())
            .ok_or_else(|| Status::from(FrontendError::MissingTenant))?;
        let http_request = request
            .into_inner()
            .http_request
            .ok_or_else(|| Status::invalid_argument("missing http_request"))?;

        // The dispatch runs in its own task so that a caller vanishing
        // mid-call still drives the cancel + unregister path: dropping this
        // handler fires the guard, which cancels the context.
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let ctx = RequestContext::new(tenant).with_cancel(cancel);

        let dispatcher = Arc::clone(&self.dispatcher);
        let task = tokio::spawn(async move { dispatcher.round_trip(&ctx, http_request).await });
        let result = task
            .await
            .map_err(|_| Status::internal("round trip task failed"))?;
        drop(guard);

        let http_response = result.map_err(Status::from)?;
        Ok(Response::new(RoundTripResponse {
            http_response: Some(http_response),
        }))
    }
}

/// Worker-facing result delivery service.
pub struct WorkerResultService {
    sink: ResultSink,
}

impl WorkerResultService {
    pub fn new(sink: ResultSink) -> Self {
        Self { sink }
    }
}

#[tonic::async_trait]
impl FrontendForWorker for WorkerResultService {
    async fn query_result(
        &self,
        request: Request<QueryResultRequest>,
    ) -> Result<Response<QueryResultResponse>, Status> {
        let tenant = tenant_from_metadata(request.metadata())
            .ok_or_else(|| Status::from(FrontendError::MissingTenant))?;
        let delivery = request.into_inner();

        self.sink
            .deliver(
                &tenant,
                delivery.query_id,
                delivery.http_response.unwrap_or_default(),
                delivery.stats,
            )
            .map_err(Status::from)?;

        Ok(Response::new(QueryResultResponse {}))
    }
}
