//! Core data models for the anomaly pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metric names shared by the sampler, feature layout and snapshot writer
pub mod metric {
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const MEMORY_MB: &str = "memory_mb";
    pub const IO_READ_BYTES: &str = "io_read_bytes";
    pub const IO_WRITE_BYTES: &str = "io_write_bytes";
    pub const RUN_TIME_SECS: &str = "run_time_secs";
    pub const LOAD_AVG_1: &str = "load_avg_1";
    pub const CPU_FREQ_MHZ: &str = "cpu_freq_mhz";
    pub const PROCESS_COUNT: &str = "process_count";
}

/// Identity of a tracked entity.
///
/// Processes are keyed by `(pid, start_time)` so a recycled pid is a new
/// entity. Ordering puts the system entity first, then processes by pid and
/// start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityId {
    System,
    Process { pid: u32, start_time: u64 },
}

impl EntityId {
    pub fn process(pid: u32, start_time: u64) -> Self {
        EntityId::Process { pid, start_time }
    }

    pub fn is_process(&self) -> bool {
        matches!(self, EntityId::Process { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            EntityId::System => None,
            EntityId::Process { pid, .. } => Some(*pid),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::System => write!(f, "system"),
            EntityId::Process { pid, start_time } => write!(f, "pid {} (started {})", pid, start_time),
        }
    }
}

/// One observation of one entity. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub entity: EntityId,
    /// Process name, or `"system"`
    pub name: String,
    pub metrics: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, entity: EntityId, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            entity,
            name: name.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Metric value, or 0.0 when the sampler did not report it
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

/// Everything one sampling cycle produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBatch {
    pub timestamp: DateTime<Utc>,
    pub system: Sample,
    pub processes: Vec<Sample>,
}

impl SampleBatch {
    /// Number of entities observed, the system entity included
    pub fn entity_count(&self) -> usize {
        self.processes.len() + 1
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        std::iter::once(&self.system).chain(self.processes.iter())
    }
}

/// Ordered, bounded history of one entity, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub entity: EntityId,
    pub samples: Vec<Sample>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.timestamp)
    }

    /// Values of one metric across the window, oldest first
    pub fn series(&self, metric: &str) -> Vec<f64> {
        self.samples.iter().map(|s| s.metric(metric)).collect()
    }
}

/// Fixed-length numeric summary of a window, the model's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity: EntityId,
    pub window_end: DateTime<Utc>,
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Model output for one feature vector. Higher is more anomalous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f32,
    /// Per-feature contribution (e.g. squared reconstruction error); empty if
    /// the model only produces a scalar
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_feature: Vec<f32>,
}

impl Score {
    pub fn scalar(value: f32) -> Self {
        Self {
            value,
            per_feature: Vec::new(),
        }
    }
}

/// Severity levels for flagged entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A flagged entity with the evidence that flagged it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub entity: EntityId,
    pub name: String,
    pub score: Score,
    pub severity: Severity,
    /// Names of the features contributing most to the score
    pub top_features: Vec<String>,
    pub features: FeatureVector,
    pub latest: Sample,
}

/// Output of one detection pass. Records are sorted by descending score,
/// ties broken by ascending entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub timestamp: DateTime<Utc>,
    pub records: Vec<AnomalyRecord>,
    pub entities_considered: usize,
    pub skipped_insufficient: usize,
    pub threshold: f32,
    pub threshold_policy: String,
    pub model_version: String,
}

impl ClassificationResult {
    pub fn anomaly_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_clean(&self) -> bool {
        self.records.is_empty()
    }
}
