// std
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
// crates
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use qda_core::QuorumId;
// internal

pub type ControllerRegistry = Arc<Mutex<Registry>>;

pub fn new_registry() -> ControllerRegistry {
    Arc::new(Mutex::new(Registry::default()))
}

/// Render every registered metric in the text exposition format.
pub fn encode_metrics(registry: &ControllerRegistry) -> Result<String, std::fmt::Error> {
    let registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
    Ok(buffer)
}

fn latency_histogram() -> Histogram {
    // 10ms up to ~40s
    Histogram::new(exponential_buckets(0.01, 2.0, 13))
}

#[derive(Clone)]
pub struct EncodingManagerMetrics {
    blobs_encoded: Counter,
    blobs_failed: Counter,
    encoding_retries: Counter,
    encoding_latency: Histogram,
}

impl EncodingManagerMetrics {
    pub fn new(registry: &ControllerRegistry) -> Self {
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let sub_registry = registry.sub_registry_with_prefix("encoding_manager");

        let blobs_encoded = Counter::default();
        sub_registry.register(
            "blobs_encoded",
            "Blobs moved to encoded",
            blobs_encoded.clone(),
        );
        let blobs_failed = Counter::default();
        sub_registry.register(
            "blobs_failed",
            "Blobs that failed encoding",
            blobs_failed.clone(),
        );
        let encoding_retries = Counter::default();
        sub_registry.register(
            "encoding_retries",
            "Encoding attempts left for a later retry",
            encoding_retries.clone(),
        );
        let encoding_latency = latency_histogram();
        sub_registry.register(
            "encoding_latency_seconds",
            "Time to encode and store one blob",
            encoding_latency.clone(),
        );

        Self {
            blobs_encoded,
            blobs_failed,
            encoding_retries,
            encoding_latency,
        }
    }

    pub(crate) fn record_encoded(&self, latency: Duration) {
        self.blobs_encoded.inc();
        self.encoding_latency.observe(latency.as_secs_f64());
    }

    pub(crate) fn record_failed(&self) {
        self.blobs_failed.inc();
    }

    pub(crate) fn record_retry(&self) {
        self.encoding_retries.inc();
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum BatchOutcome {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: BatchOutcome,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QuorumLabels {
    quorum: String,
}

impl From<QuorumId> for QuorumLabels {
    fn from(quorum: QuorumId) -> Self {
        Self {
            quorum: quorum.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct DispatcherMetrics {
    batches: Family<OutcomeLabels, Counter>,
    signed_stake_percent: Family<QuorumLabels, Gauge>,
    significant_signing_breaches: Family<QuorumLabels, Counter>,
    attestation_latency: Histogram,
    operator_request_failures: Counter,
}

impl DispatcherMetrics {
    pub fn new(registry: &ControllerRegistry) -> Self {
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let sub_registry = registry.sub_registry_with_prefix("dispatcher");

        let batches = Family::default();
        sub_registry.register("batches", "Dispatched batches by outcome", batches.clone());
        let signed_stake_percent = Family::default();
        sub_registry.register(
            "signed_stake_percent",
            "Signed stake of the last batch per quorum",
            signed_stake_percent.clone(),
        );
        let significant_signing_breaches = Family::default();
        sub_registry.register(
            "significant_signing_breaches",
            "Batches signed by less than the significant signing threshold",
            significant_signing_breaches.clone(),
        );
        let attestation_latency = latency_histogram();
        sub_registry.register(
            "attestation_latency_seconds",
            "Time from dispatch to the end of signature collection",
            attestation_latency.clone(),
        );
        let operator_request_failures = Counter::default();
        sub_registry.register(
            "operator_request_failures",
            "Requests to operators that did not return a valid signature",
            operator_request_failures.clone(),
        );

        Self {
            batches,
            signed_stake_percent,
            significant_signing_breaches,
            attestation_latency,
            operator_request_failures,
        }
    }

    pub(crate) fn record_batch(&self, outcome: BatchOutcome) {
        self.batches.get_or_create(&OutcomeLabels { outcome }).inc();
    }

    pub(crate) fn record_signed_stake(&self, quorum: QuorumId, percentage: u8, breach: bool) {
        let labels = QuorumLabels::from(quorum);
        self.signed_stake_percent
            .get_or_create(&labels)
            .set(i64::from(percentage));
        if breach {
            self.significant_signing_breaches
                .get_or_create(&labels)
                .inc();
        }
    }

    pub(crate) fn record_attestation_latency(&self, latency: Duration) {
        self.attestation_latency.observe(latency.as_secs_f64());
    }

    pub(crate) fn record_operator_failure(&self) {
        self.operator_request_failures.inc();
    }
}

#[cfg(test)]
mod test {
    use super::{encode_metrics, new_registry, BatchOutcome, DispatcherMetrics};

    #[test]
    fn dispatcher_metrics_are_exported() {
        let registry = new_registry();
        let metrics = DispatcherMetrics::new(&registry);
        metrics.record_batch(BatchOutcome::Failed);
        metrics.record_signed_stake(0, 40, true);
        metrics.record_signed_stake(1, 90, false);

        let text = encode_metrics(&registry).unwrap();
        assert!(text.contains("dispatcher_batches_total{outcome=\"Failed\"} 1"));
        assert!(text.contains("dispatcher_signed_stake_percent{quorum=\"0\"} 40"));
        assert!(text.contains("dispatcher_significant_signing_breaches_total{quorum=\"0\"} 1"));
        assert!(!text.contains("dispatcher_significant_signing_breaches_total{quorum=\"1\"}"));
    }
}
