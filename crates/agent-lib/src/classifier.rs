//! Anomaly classification
//!
//! Turns one detection cycle's scores into a ranked [`ClassificationResult`].
//! An entity is anomalous when its score is strictly greater than the cycle
//! threshold. The threshold comes from a [`ThresholdPolicy`], which is a pure
//! function of the cycle's score distribution.

use crate::features::FeatureLayout;
use crate::models::{
    AnomalyRecord, ClassificationResult, EntityId, FeatureVector, Sample, Score, Severity,
};
use chrono::Utc;
use std::collections::HashMap;

/// Number of contributing features named on each record
pub const TOP_FEATURES: usize = 3;

/// Decision threshold policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdPolicy {
    /// Constant cutoff, typically the training-time percentile shipped with the model
    Fixed(f32),
    /// `mean + k * std` over every score of the cycle, never below `floor`
    MeanPlusKStd { k: f32, floor: f32 },
}

impl ThresholdPolicy {
    /// Threshold for one cycle. Uses the population standard deviation; an
    /// empty cycle yields the floor.
    pub fn threshold(&self, scores: &[f32]) -> f32 {
        match *self {
            ThresholdPolicy::Fixed(t) => t,
            ThresholdPolicy::MeanPlusKStd { k, floor } => {
                if scores.is_empty() {
                    return floor;
                }
                let n = scores.len() as f64;
                let mean = scores.iter().map(|s| *s as f64).sum::<f64>() / n;
                let var = scores
                    .iter()
                    .map(|s| (*s as f64 - mean).powi(2))
                    .sum::<f64>()
                    / n;
                let t = (mean + k as f64 * var.sqrt()).min(f32::MAX as f64) as f32;
                t.max(floor)
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            ThresholdPolicy::Fixed(_) => "fixed".to_string(),
            ThresholdPolicy::MeanPlusKStd { k, .. } => format!("mean_plus_{}_std", k),
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Fixed(1.0)
    }
}

/// Raw evidence kept alongside a score
#[derive(Debug, Clone)]
pub struct Evidence {
    pub features: FeatureVector,
    pub latest: Sample,
}

/// Applies the threshold policy and ranks flagged entities
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: ThresholdPolicy,
    feature_names: Vec<String>,
    model_version: String,
}

impl Classifier {
    pub fn new(policy: ThresholdPolicy, layout: &FeatureLayout) -> Self {
        Self {
            policy,
            feature_names: layout.names(),
            model_version: String::from("unknown"),
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    /// Classify one cycle's scores.
    ///
    /// Records are ordered by descending score, equal scores by ascending
    /// entity id. Entities without evidence are counted but never flagged.
    pub fn classify(
        &self,
        scores: &HashMap<EntityId, Score>,
        evidence: &HashMap<EntityId, Evidence>,
    ) -> ClassificationResult {
        let values: Vec<f32> = scores.values().map(|s| s.value).collect();
        let threshold = self.policy.threshold(&values);

        let mut records: Vec<AnomalyRecord> = scores
            .iter()
            .filter(|(_, score)| score.value > threshold)
            .filter_map(|(entity, score)| {
                let ev = evidence.get(entity)?;
                Some(AnomalyRecord {
                    entity: *entity,
                    name: ev.latest.name.clone(),
                    score: score.clone(),
                    severity: severity(score.value, threshold),
                    top_features: self.top_features(score),
                    features: ev.features.clone(),
                    latest: ev.latest.clone(),
                })
            })
            .collect();

        records.sort_by(|a, b| {
            b.score
                .value
                .total_cmp(&a.score.value)
                .then_with(|| a.entity.cmp(&b.entity))
        });

        ClassificationResult {
            timestamp: Utc::now(),
            records,
            entities_considered: scores.len(),
            skipped_insufficient: 0,
            threshold,
            threshold_policy: self.policy.name(),
            model_version: self.model_version.clone(),
        }
    }

    /// Names of the largest per-feature contributions
    fn top_features(&self, score: &Score) -> Vec<String> {
        let mut ranked: Vec<(usize, f32)> = score
            .per_feature
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite() && *v > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(TOP_FEATURES)
            .map(|(i, _)| {
                self.feature_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{}", i))
            })
            .collect()
    }
}

/// Severity from how far a score overshoots the threshold
pub fn severity(score: f32, threshold: f32) -> Severity {
    if threshold <= 0.0 {
        return Severity::Warning;
    }
    if score >= threshold * 4.0 {
        Severity::Critical
    } else if score >= threshold * 2.0 {
        Severity::High
    } else {
        Severity::Warning
    }
}
