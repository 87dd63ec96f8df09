//! Out-of-band result delivery.
//!
//! The executing worker service pushes each finished query back to the
//! frontend that submitted it. Delivery is idempotent and a result for a
//! query nobody is waiting on anymore (caller cancelled or timed out) is
//! discarded without error.

use std::sync::Arc;

use rpc::dispatch::{HttpResponse, QueryStats};
use tracing::{debug, warn};

use crate::error::{FrontendError, FrontendResult};
use crate::registry::{QueryResult, RequestRegistry};

#[derive(Clone)]
pub struct ResultSink {
    registry: Arc<RequestRegistry>,
}

impl ResultSink {
    pub fn new(registry: Arc<RequestRegistry>) -> Self {
        Self { registry }
    }

    /// Route one executed result to the caller still waiting on it.
    ///
    /// The delivering tenant must match the tenant that submitted the
    /// query; everything else about a failed match-up is not an error.
    pub fn deliver(
        &self,
        tenant: &str,
        query_id: u64,
        response: HttpResponse,
        stats: Option<QueryStats>,
    ) -> FrontendResult<()> {
        let Some(pending) = self.registry.lookup(query_id) else {
            debug!(query_id, "discarding result for unknown query");
            return Ok(());
        };

        if pending.tenant() != tenant {
            warn!(
                query_id,
                delivered = %tenant,
                "rejecting result delivered under the wrong tenant"
            );
            return Err(FrontendError::TenantMismatch {
                query_id,
                delivered: tenant.to_string(),
            });
        }

        if let Some(stats) = &stats {
            debug!(
                query_id,
                queue_time_ms = stats.queue_time_ms,
                execution_time_ms = stats.execution_time_ms,
                "query stats"
            );
        }

        if !pending.deliver(QueryResult { response, stats }) {
            debug!(query_id, "duplicate result delivery ignored");
        }
        Ok(())
    }
}
