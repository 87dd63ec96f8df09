//! Scheduler worker pool.
//!
//! Maps scheduler addresses to their worker sets and round-robins new
//! queries across every live worker. Discovery events are the only mutators
//! of membership; the metric label set changes in the same critical section
//! so the two can never disagree.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FrontendConfig;
use crate::metrics::FrontendMetrics;
use crate::registry::RequestRegistry;
use crate::worker::{EnqueuedQuery, Outbound, WorkerHandle, WorkerSet};

struct PoolState {
    sets: BTreeMap<String, Arc<WorkerSet>>,
    cursor: usize,
}

pub struct WorkerPool {
    state: Mutex<PoolState>,
    registry: Arc<RequestRegistry>,
    metrics: Arc<FrontendMetrics>,
    frontend_address: String,
    worker_concurrency: usize,
    worker_queue_size: usize,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        config: &FrontendConfig,
        registry: Arc<RequestRegistry>,
        metrics: Arc<FrontendMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: Mutex::new(PoolState {
                sets: BTreeMap::new(),
                cursor: 0,
            }),
            registry,
            metrics,
            frontend_address: config.frontend_address(),
            worker_concurrency: config.worker_concurrency,
            worker_queue_size: config.worker_queue_size,
            shutdown,
        }
    }

    /// Handle an AddressAdded discovery event.
    ///
    /// The set is published only after its first worker completed the INIT
    /// handshake, so a caller observing the address in the pool can rely on
    /// at least one live stream.
    pub async fn add_address(&self, address: &str) {
        if self.lock_state().sets.contains_key(address) {
            debug!(scheduler = %address, "scheduler address already in the pool");
            return;
        }

        let set = WorkerSet::spawn(
            address,
            &self.frontend_address,
            self.worker_concurrency,
            self.worker_queue_size,
            Arc::clone(&self.registry),
            self.shutdown.child_token(),
        );
        set.ready().await;

        if self.shutdown.is_cancelled() {
            set.stop().await;
            return;
        }

        let published = {
            let mut state = self.lock_state();
            if state.sets.contains_key(address) {
                false
            } else {
                state.sets.insert(address.to_string(), Arc::clone(&set));
                self.metrics.add_address(address);
                true
            }
        };

        if published {
            info!(scheduler = %address, workers = self.worker_concurrency, "scheduler address added");
        } else {
            set.stop().await;
        }
    }

    /// Handle an AddressRemoved discovery event.
    ///
    /// The set disappears from selection and from the metric label set
    /// atomically; its workers then drain pending work with SHUTTING_DOWN
    /// and are awaited.
    pub async fn remove_address(&self, address: &str) {
        let set = {
            let mut state = self.lock_state();
            let Some(set) = state.sets.remove(address) else {
                debug!(scheduler = %address, "scheduler address not in the pool");
                return;
            };
            self.metrics.remove_address(address);
            set
        };

        set.stop().await;
        info!(scheduler = %address, "scheduler address removed");
    }

    /// Round-robin one query across every live worker, skipping workers
    /// whose queue is full. Returns the accepting worker, or `None` after a
    /// full rotation without acceptance.
    pub(crate) fn offer(&self, query: EnqueuedQuery) -> Option<WorkerHandle> {
        let mut state = self.lock_state();

        let workers: Vec<WorkerHandle> = state
            .sets
            .values()
            .flat_map(|set| set.handles().iter().cloned())
            .collect();
        if workers.is_empty() {
            return None;
        }

        let start = state.cursor % workers.len();
        let mut message = Outbound::Enqueue(query);
        for step in 0..workers.len() {
            let index = (start + step) % workers.len();
            let worker = &workers[index];
            match worker.offer(message) {
                Ok(()) => {
                    state.cursor = (index + 1) % workers.len();
                    self.metrics.inc_enqueued(worker.address());
                    return Some(worker.clone());
                }
                Err(rejected) => message = rejected.into_inner(),
            }
        }

        None
    }

    /// Addresses currently published, in selection order.
    pub fn addresses(&self) -> Vec<String> {
        self.lock_state().sets.keys().cloned().collect()
    }

    /// Total live workers across all sets.
    pub fn worker_count(&self) -> usize {
        self.lock_state()
            .sets
            .values()
            .map(|set| set.handles().len())
            .sum()
    }

    pub fn metrics(&self) -> &Arc<FrontendMetrics> {
        &self.metrics
    }

    /// Tear down every worker set. Used on process shutdown.
    pub async fn shutdown(&self) {
        let sets: Vec<Arc<WorkerSet>> = {
            let mut state = self.lock_state();
            let sets: Vec<_> = std::mem::take(&mut state.sets).into_values().collect();
            for set in &sets {
                self.metrics.remove_address(set.address());
            }
            sets
        };

        self.shutdown.cancel();
        for set in sets {
            set.stop().await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool lock poisoned")
    }
}
