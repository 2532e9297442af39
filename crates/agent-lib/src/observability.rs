//! Observability infrastructure for the anomaly agent
//!
//! Provides:
//! - Prometheus metrics (sampling latency, scoring latency, buffer occupancy, model info)
//! - Structured logging with tracing

use crate::models::{AnomalyRecord, ClassificationResult};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, Encoder,
    GaugeVec, Histogram, IntCounter, IntGauge, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    sampling_latency_seconds: Histogram,
    scoring_latency_seconds: Histogram,
    tracked_entities: IntGauge,
    buffered_samples: IntGauge,
    sampling_cycles: IntCounter,
    collection_errors: IntCounter,
    evicted_entities: IntCounter,
    detection_passes: IntCounter,
    anomalies_flagged: IntCounter,
    model_info: GaugeVec,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "anomaly_agent_sampling_latency_seconds",
                "Time spent in one sampling cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            scoring_latency_seconds: register_histogram!(
                "anomaly_agent_scoring_latency_seconds",
                "Time spent scoring all ready windows in one detection pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scoring_latency_seconds"),

            tracked_entities: register_int_gauge!(
                "anomaly_agent_tracked_entities",
                "Number of entities with a window in the buffer"
            )
            .expect("Failed to register tracked_entities"),

            buffered_samples: register_int_gauge!(
                "anomaly_agent_buffered_samples",
                "Number of samples held across all windows"
            )
            .expect("Failed to register buffered_samples"),

            sampling_cycles: register_int_counter!(
                "anomaly_agent_sampling_cycles_total",
                "Total number of completed sampling cycles"
            )
            .expect("Failed to register sampling_cycles"),

            collection_errors: register_int_counter!(
                "anomaly_agent_collection_errors_total",
                "Total number of failed sampling cycles"
            )
            .expect("Failed to register collection_errors"),

            evicted_entities: register_int_counter!(
                "anomaly_agent_evicted_entities_total",
                "Total number of entities garbage-collected from the buffer"
            )
            .expect("Failed to register evicted_entities"),

            detection_passes: register_int_counter!(
                "anomaly_agent_detection_passes_total",
                "Total number of completed detection passes"
            )
            .expect("Failed to register detection_passes"),

            anomalies_flagged: register_int_counter!(
                "anomaly_agent_anomalies_flagged_total",
                "Total number of anomaly records produced"
            )
            .expect("Failed to register anomalies_flagged"),

            model_info: register_gauge_vec!(
                "anomaly_agent_model_info",
                "Information about the loaded anomaly model",
                &["version", "status"]
            )
            .expect("Failed to register model_info"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_sampling_latency(&self, duration_secs: f64) {
        self.inner().sampling_latency_seconds.observe(duration_secs);
        self.inner().sampling_cycles.inc();
    }

    pub fn observe_scoring_latency(&self, duration_secs: f64) {
        self.inner().scoring_latency_seconds.observe(duration_secs);
    }

    /// Update buffer occupancy
    pub fn set_buffer_occupancy(&self, entities: usize, samples: usize) {
        self.inner().tracked_entities.set(entities as i64);
        self.inner().buffered_samples.set(samples as i64);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn inc_evicted(&self, count: usize) {
        self.inner().evicted_entities.inc_by(count as u64);
    }

    /// Record a finished detection pass and the records it produced
    pub fn record_detection(&self, anomalies: usize) {
        self.inner().detection_passes.inc();
        self.inner().anomalies_flagged.inc_by(anomalies as u64);
    }

    /// Update model info; `status` is "ready" or "unavailable"
    pub fn set_model_info(&self, version: &str, status: &str) {
        self.inner().model_info.reset();
        self.inner()
            .model_info
            .with_label_values(&[version, status])
            .set(1.0);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for agent events
///
/// Every line carries an `event` field so logs can be filtered by kind.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, model_version: &str) {
        info!(
            event = "agent_started",
            host = %self.host,
            agent_version = %version,
            model_version = %model_version,
            "Anomaly agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host = %self.host,
            reason = %reason,
            "Anomaly agent shutting down"
        );
    }

    pub fn log_model_loaded(&self, path: &Path, version: &str) {
        info!(
            event = "model_loaded",
            host = %self.host,
            path = %path.display(),
            model_version = %version,
            "Anomaly model ready"
        );
    }

    pub fn log_model_unavailable(&self, path: &Path, reason: &str) {
        warn!(
            event = "model_unavailable",
            host = %self.host,
            path = %path.display(),
            reason = %reason,
            "Anomaly model unavailable, detection disabled"
        );
    }

    /// Log one flagged entity
    pub fn log_anomaly(&self, record: &AnomalyRecord) {
        let reason = record.top_features.join(", ");
        match record.severity {
            crate::models::Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    host = %self.host,
                    entity = %record.entity,
                    name = %record.name,
                    score = record.score.value,
                    severity = record.severity.as_str(),
                    reason = %reason,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    host = %self.host,
                    entity = %record.entity,
                    name = %record.name,
                    score = record.score.value,
                    severity = record.severity.as_str(),
                    reason = %reason,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log the summary of one detection pass
    pub fn log_detection(&self, result: &ClassificationResult) {
        info!(
            event = "detection_completed",
            host = %self.host,
            entities = result.entities_considered,
            skipped = result.skipped_insufficient,
            anomalies = result.anomaly_count(),
            threshold = result.threshold,
            policy = %result.threshold_policy,
            model_version = %result.model_version,
            "Detection pass completed"
        );
    }

    pub fn log_snapshot_saved(&self, path: &Path, anomalies: usize) {
        info!(
            event = "snapshot_saved",
            host = %self.host,
            path = %path.display(),
            anomalies = anomalies,
            "Anomaly report written"
        );
    }
}
