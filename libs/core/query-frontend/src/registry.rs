//! Pending-query bookkeeping.
//!
//! The registry is the single process-wide table correlating the three
//! asynchronous parties of a round trip: the caller task, the scheduler
//! stream worker that acknowledges the enqueue, and the result-sink handler
//! that delivers the executed response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rpc::dispatch::{HttpResponse, QueryStats};
use tokio::sync::{mpsc, oneshot};

// One verdict per outstanding attempt; the second slot absorbs a verdict
// that races caller cancellation between attempts.
const ENQUEUE_STATUS_BUFFER: usize = 2;

/// Scheduler verdict for one ENQUEUE attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// The scheduler accepted the query; a result will follow out-of-band.
    Accepted,
    /// The scheduler is draining; another scheduler may accept the query.
    ShuttingDown,
    /// The tenant hit its outstanding-request limit.
    TenantLimited,
    /// The scheduler rejected the query outright.
    Failed,
}

/// Result pushed back by the executing worker.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub response: HttpResponse,
    pub stats: Option<QueryStats>,
}

/// Per-call coordination state, owned by the registry for the lifetime of
/// one round trip.
pub struct PendingQuery {
    query_id: u64,
    tenant: String,
    enqueue_tx: mpsc::Sender<EnqueueStatus>,
    response_tx: Mutex<Option<oneshot::Sender<QueryResult>>>,
}

impl PendingQuery {
    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Deposit the scheduler verdict for the most recent ENQUEUE of this
    /// query. Dropped silently if the caller is no longer listening.
    pub fn deposit_status(&self, status: EnqueueStatus) {
        let _ = self.enqueue_tx.try_send(status);
    }

    /// Write the response slot. Only the first delivery lands; later ones
    /// report `false`.
    pub fn deliver(&self, result: QueryResult) -> bool {
        let sender = self
            .response_tx
            .lock()
            .expect("response slot lock poisoned")
            .take();
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// Receive halves handed to the dispatcher task for one registered query.
pub struct RegisteredQuery {
    pub pending: Arc<PendingQuery>,
    pub enqueue_rx: mpsc::Receiver<EnqueueStatus>,
    pub response_rx: oneshot::Receiver<QueryResult>,
}

/// Process-wide table of live queries, keyed by query ID.
pub struct RequestRegistry {
    next_query_id: AtomicU64,
    pending: Mutex<HashMap<u64, Arc<PendingQuery>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            next_query_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh query ID and register its pending state.
    pub fn register(&self, tenant: &str) -> RegisteredQuery {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let (enqueue_tx, enqueue_rx) = mpsc::channel(ENQUEUE_STATUS_BUFFER);
        let (response_tx, response_rx) = oneshot::channel();

        let pending = Arc::new(PendingQuery {
            query_id,
            tenant: tenant.to_string(),
            enqueue_tx,
            response_tx: Mutex::new(Some(response_tx)),
        });

        self.pending
            .lock()
            .expect("registry lock poisoned")
            .insert(query_id, Arc::clone(&pending));

        RegisteredQuery {
            pending,
            enqueue_rx,
            response_rx,
        }
    }

    pub fn lookup(&self, query_id: u64) -> Option<Arc<PendingQuery>> {
        self.pending
            .lock()
            .expect("registry lock poisoned")
            .get(&query_id)
            .cloned()
    }

    /// Remove a query from the table. Returns whether it was present.
    pub fn unregister(&self, query_id: u64) -> bool {
        self.pending
            .lock()
            .expect("registry lock poisoned")
            .remove(&query_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
