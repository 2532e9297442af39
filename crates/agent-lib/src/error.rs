//! Error taxonomy for the pipeline
//!
//! Lower layers return these typed failures; the controller decides whether a
//! failure is shown to the user, retried on the next tick, or degrades
//! detection.

use crate::models::EntityId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The OS query itself failed. Recoverable: the cycle is skipped.
    #[error("metric collection failed: {0}")]
    Collection(String),

    /// Not enough samples yet. Recoverable: retry after more refresh cycles.
    #[error("insufficient data for {entity}: {available} samples, need {required}")]
    InsufficientData {
        entity: EntityId,
        available: usize,
        required: usize,
    },

    /// The model failed to load or to score. Detection stops, sampling goes on.
    #[error("anomaly model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model returned a NaN for one entity. Only that entity is dropped
    /// from the pass.
    #[error("invalid score: {0}")]
    InvalidScore(String),

    /// Feature layout and model input disagree. Fatal configuration error.
    #[error("feature shape mismatch: model expects {expected} features, layout produces {actual}")]
    FeatureShape { expected: usize, actual: usize },

    /// Model feature names disagree with the layout. Fatal configuration error.
    #[error("feature layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the failure only means "try again later"
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Collection(_) | AgentError::InsufficientData { .. }
        )
    }

    /// Whether the failure is a configuration error the agent cannot run with
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            AgentError::FeatureShape { .. } | AgentError::LayoutMismatch(_)
        )
    }
}
