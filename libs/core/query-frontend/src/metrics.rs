//! Frontend metrics.
//!
//! The scheduler-address label set mirrors pool membership exactly: a series
//! is created when an address is published and deleted (not zeroed) when the
//! address is removed, so the exposition never reports schedulers that no
//! longer exist.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Metric names as constants for consistency
pub mod names {
    pub const ENQUEUED_REQUESTS: &str = "workers_enqueued_requests_total";
}

pub struct FrontendMetrics {
    registry: Registry,
    enqueued_requests: IntCounterVec,
}

impl FrontendMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let enqueued_requests = IntCounterVec::new(
            Opts::new(
                names::ENQUEUED_REQUESTS,
                "Total requests handed to a scheduler worker, by scheduler address.",
            ),
            &["scheduler_address"],
        )
        .expect("invalid metric definition");
        registry
            .register(Box::new(enqueued_requests.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            enqueued_requests,
        }
    }

    /// Create the label series for a newly published scheduler address so it
    /// reports zero before the first request.
    pub(crate) fn add_address(&self, address: &str) {
        self.enqueued_requests.with_label_values(&[address]);
    }

    /// Delete the label series of a removed scheduler address.
    pub(crate) fn remove_address(&self, address: &str) {
        let _ = self.enqueued_requests.remove_label_values(&[address]);
    }

    pub(crate) fn inc_enqueued(&self, address: &str) {
        self.enqueued_requests.with_label_values(&[address]).inc();
    }

    /// Counter value for one scheduler address, if its series exists.
    pub fn enqueued_requests(&self, address: &str) -> Option<u64> {
        self.registry
            .gather()
            .iter()
            .find(|family| family.get_name() == names::ENQUEUED_REQUESTS)
            .and_then(|family| {
                family
                    .get_metric()
                    .iter()
                    .find(|metric| {
                        metric
                            .get_label()
                            .iter()
                            .any(|label| {
                                label.get_name() == "scheduler_address"
                                    && label.get_value() == address
                            })
                    })
                    .map(|metric| metric.get_counter().get_value() as u64)
            })
    }

    /// Every scheduler address currently carrying a label series.
    pub fn scheduler_addresses(&self) -> Vec<String> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == names::ENQUEUED_REQUESTS)
            .flat_map(|family| family.get_metric())
            .flat_map(|metric| metric.get_label())
            .filter(|label| label.get_name() == "scheduler_address")
            .map(|label| label.get_value().to_string())
            .collect()
    }

    /// Render the whole registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(error) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(%error, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for FrontendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_created_at_zero() {
        let metrics = FrontendMetrics::new();
        metrics.add_address("scheduler-1:9095");

        assert_eq!(metrics.enqueued_requests("scheduler-1:9095"), Some(0));
    }

    #[test]
    fn test_series_deleted_on_removal() {
        let metrics = FrontendMetrics::new();
        metrics.add_address("scheduler-1:9095");
        metrics.inc_enqueued("scheduler-1:9095");
        assert_eq!(metrics.enqueued_requests("scheduler-1:9095"), Some(1));

        metrics.remove_address("scheduler-1:9095");
        assert_eq!(metrics.enqueued_requests("scheduler-1:9095"), None);
        assert!(metrics.scheduler_addresses().is_empty());
    }

    #[test]
    fn test_removal_of_unknown_address_is_harmless() {
        let metrics = FrontendMetrics::new();
        metrics.remove_address("never-added:9095");
    }

    #[test]
    fn test_render_contains_series() {
        let metrics = FrontendMetrics::new();
        metrics.add_address("scheduler-1:9095");
        metrics.inc_enqueued("scheduler-1:9095");

        let rendered = metrics.render();
        assert!(rendered.contains(names::ENQUEUED_REQUESTS));
        assert!(rendered.contains("scheduler-1:9095"));
    }
}
