//! Anomaly scoring
//!
//! The [`Scorer`] wraps one pretrained model, loaded once at startup and
//! read-only afterwards. If loading fails the scorer is still constructed in
//! an unavailable state so sampling can go on; every scoring call then fails
//! with [`AgentError::ModelUnavailable`].

mod baseline;
mod inference;
mod manifest;

pub use baseline::BaselineModel;
pub use inference::OnnxAutoencoder;
pub use manifest::{compute_checksum, load_model, ModelKind, ModelManifest, Scaler};

use crate::error::{AgentError, Result};
use crate::features::FeatureBuilder;
use crate::models::{FeatureVector, Score};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Scoring latency above which a warning is logged
const MAX_SCORE_MS: u128 = 50;

/// Trait for pretrained anomaly models
pub trait AnomalyModel: Send + Sync {
    /// Number of features the model consumes
    fn input_len(&self) -> usize;

    /// Version string of the loaded artifact
    fn model_version(&self) -> &str;

    /// Training-time decision threshold shipped with the model, if any
    fn threshold(&self) -> Option<f32> {
        None
    }

    /// Feature names the model was trained on, if recorded
    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    /// Score one feature vector. Must not mutate model state.
    fn score(&self, features: &[f32]) -> Result<Score>;
}

enum ModelState {
    Ready(Box<dyn AnomalyModel>),
    Unavailable(String),
}

/// Scoring statistics
#[derive(Debug, Clone, Default)]
pub struct ScorerStats {
    pub total_scored: u64,
    pub slow_scores: u64,
    pub failures: u64,
}

/// Holds the loaded model and turns feature vectors into scores
pub struct Scorer {
    state: ModelState,
    scored: AtomicU64,
    slow: AtomicU64,
    failures: AtomicU64,
}

impl Scorer {
    /// Wrap a loaded model, checking it against the feature layout
    pub fn new(model: Box<dyn AnomalyModel>, builder: &FeatureBuilder) -> Result<Self> {
        builder.check_model_shape(model.input_len())?;

        if let Some(names) = model.feature_names() {
            let expected = builder.layout().names();
            if names != expected.as_slice() {
                return Err(AgentError::LayoutMismatch(format!(
                    "model trained on [{}], layout produces [{}]",
                    names.join(", "),
                    expected.join(", ")
                )));
            }
        }

        Ok(Self::with_state(ModelState::Ready(model)))
    }

    /// Load a model artifact from its manifest
    pub fn load(manifest_path: &Path, builder: &FeatureBuilder) -> Result<Self> {
        let model = load_model(manifest_path)?;
        Self::new(model, builder)
    }

    /// A scorer with no model; detection reports the reason
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_state(ModelState::Unavailable(reason.into()))
    }

    fn with_state(state: ModelState) -> Self {
        Self {
            state,
            scored: AtomicU64::new(0),
            slow: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            ModelState::Ready(_) => None,
            ModelState::Unavailable(reason) => Some(reason),
        }
    }

    pub fn model_version(&self) -> Option<&str> {
        match &self.state {
            ModelState::Ready(model) => Some(model.model_version()),
            ModelState::Unavailable(_) => None,
        }
    }

    pub fn model_threshold(&self) -> Option<f32> {
        match &self.state {
            ModelState::Ready(model) => model.threshold(),
            ModelState::Unavailable(_) => None,
        }
    }

    /// Fail fast when detection cannot run
    pub fn ensure_available(&self) -> Result<()> {
        match &self.state {
            ModelState::Ready(_) => Ok(()),
            ModelState::Unavailable(reason) => Err(AgentError::ModelUnavailable(reason.clone())),
        }
    }

    /// Score one feature vector
    pub fn score(&self, features: &FeatureVector) -> Result<Score> {
        let model = match &self.state {
            ModelState::Ready(model) => model,
            ModelState::Unavailable(reason) => {
                return Err(AgentError::ModelUnavailable(reason.clone()));
            }
        };

        if features.len() != model.input_len() {
            return Err(AgentError::FeatureShape {
                expected: model.input_len(),
                actual: features.len(),
            });
        }

        let start = Instant::now();
        let score = model.score(&features.values).and_then(|score| {
            if score.value.is_nan() || score.per_feature.iter().any(|v| v.is_nan()) {
                Err(AgentError::InvalidScore(format!(
                    "model produced a NaN score for {}",
                    features.entity
                )))
            } else {
                Ok(saturate(score))
            }
        });
        let elapsed = start.elapsed();

        match &score {
            Ok(_) => {
                self.scored.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        if elapsed.as_millis() > MAX_SCORE_MS {
            self.slow.fetch_add(1, Ordering::Relaxed);
            warn!(
                entity = %features.entity,
                elapsed_ms = elapsed.as_millis(),
                "Scoring exceeded {}ms target",
                MAX_SCORE_MS
            );
        } else {
            debug!(entity = %features.entity, elapsed_us = elapsed.as_micros(), "Scored");
        }

        score
    }

    pub fn stats(&self) -> ScorerStats {
        ScorerStats {
            total_scored: self.scored.load(Ordering::Relaxed),
            slow_scores: self.slow.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Clamp infinite values to the largest finite `f32`, keeping the sign. An
/// overflowing score still ranks above every finite one.
fn saturate(mut score: Score) -> Score {
    let clamp = |v: f32| if v.is_infinite() { f32::MAX.copysign(v) } else { v };
    score.value = clamp(score.value);
    for v in &mut score.per_feature {
        *v = clamp(*v);
    }
    score
}
