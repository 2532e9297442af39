//! Anomaly report files
//!
//! One pretty-printed JSON document per saved detection pass, named
//! `anomaly_report_<YYMMDD>_<HHMMSS>.json` after the result's timestamp.
//! The document carries every flagged entity's raw metrics and named features
//! so a reader can see why it was flagged without re-running the model.

use crate::error::Result;
use crate::models::{AnomalyRecord, ClassificationResult, EntityId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const REPORT_PREFIX: &str = "anomaly_report_";

/// Distinguishes temp files of concurrent writes within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Self-describing report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub model_version: String,
    pub threshold: f32,
    pub threshold_policy: String,
    pub total_entities: usize,
    pub skipped_insufficient: usize,
    pub anomaly_count: usize,
    pub anomalies: Vec<SnapshotAnomaly>,
}

/// One flagged entity in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAnomaly {
    pub entity: EntityId,
    pub name: String,
    pub score: f32,
    pub severity: Severity,
    pub reason: String,
    pub top_features: Vec<String>,
    /// Raw metrics of the most recent sample
    pub metrics: BTreeMap<String, f64>,
    /// Feature name to value
    pub features: BTreeMap<String, f32>,
}

impl SnapshotDocument {
    pub fn from_result(result: &ClassificationResult, host: &str, feature_names: &[String]) -> Self {
        Self {
            timestamp: result.timestamp,
            host: host.to_string(),
            model_version: result.model_version.clone(),
            threshold: result.threshold,
            threshold_policy: result.threshold_policy.clone(),
            total_entities: result.entities_considered,
            skipped_insufficient: result.skipped_insufficient,
            anomaly_count: result.anomaly_count(),
            anomalies: result
                .records
                .iter()
                .map(|r| SnapshotAnomaly::from_record(r, result.threshold, feature_names))
                .collect(),
        }
    }

    /// Read a report back from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

impl SnapshotAnomaly {
    fn from_record(record: &AnomalyRecord, threshold: f32, feature_names: &[String]) -> Self {
        let features = record
            .features
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let name = feature_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{}", i));
                (name, *v)
            })
            .collect();

        Self {
            entity: record.entity,
            name: record.name.clone(),
            score: record.score.value,
            severity: record.severity,
            reason: reason(record, threshold),
            top_features: record.top_features.clone(),
            metrics: record.latest.metrics.clone(),
            features,
        }
    }
}

/// Human-readable explanation of a flag
pub fn reason(record: &AnomalyRecord, threshold: f32) -> String {
    let base = format!(
        "score {:.4} exceeds threshold {:.4}",
        record.score.value, threshold
    );
    if record.top_features.is_empty() {
        base
    } else {
        format!("{}; largest deviations: {}", base, record.top_features.join(", "))
    }
}

/// Writes classification results as report files
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    report_dir: PathBuf,
    host: String,
    feature_names: Vec<String>,
}

impl SnapshotWriter {
    pub fn new(report_dir: impl Into<PathBuf>, host: impl Into<String>, feature_names: Vec<String>) -> Self {
        Self {
            report_dir: report_dir.into(),
            host: host.into(),
            feature_names,
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Write one report and return its path. Never overwrites an existing
    /// report: a colliding name gets a `_<n>` suffix. Safe to call
    /// concurrently, also from several processes sharing a report directory.
    pub fn write(&self, result: &ClassificationResult) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.report_dir)?;

        let document = SnapshotDocument::from_result(result, &self.host, &self.feature_names);
        let json = serde_json::to_vec_pretty(&document)?;

        let stem = format!("{}{}", REPORT_PREFIX, result.timestamp.format("%y%m%d_%H%M%S"));
        let temp_path = self.report_dir.join(format!(
            ".{}.{}.{}.tmp",
            stem,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = write_synced(&temp_path, &json).and_then(|()| self.claim(&stem, &temp_path));
        if let Err(e) = std::fs::remove_file(&temp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %e, "Failed to remove temporary report");
            }
        }
        let path = written?;

        debug!(path = %path.display(), bytes = json.len(), "Snapshot written");
        Ok(path)
    }

    /// Link the finished temp file under the first free report name. The link
    /// fails atomically if the name is taken, so two writers never share one.
    fn claim(&self, stem: &str, temp_path: &Path) -> std::io::Result<PathBuf> {
        let mut n = 0usize;
        loop {
            let path = if n == 0 {
                self.report_dir.join(format!("{}.json", stem))
            } else {
                self.report_dir.join(format!("{}_{}.json", stem, n))
            };
            match std::fs::hard_link(temp_path, &path) {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
