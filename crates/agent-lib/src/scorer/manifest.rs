//! Model artifact manifest
//!
//! A JSON document describing a pretrained model: its kind, version, input
//! shape, optional training-time threshold and standardization, and the
//! parameters or weights file for that kind.

use super::{AnomalyModel, BaselineModel, OnnxAutoencoder};
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// Supported model kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Per-feature mean and standard deviation of normal behavior
    Baseline,
    /// ONNX autoencoder scored by reconstruction error
    OnnxAutoencoder,
}

/// Standardization fitted at training time: `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl Scaler {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn transform(&self, values: &[f32]) -> Vec<f32> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s.abs().max(1e-6))
            .collect()
    }
}

/// Parameters for [`ModelKind::Baseline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineParams {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

/// Model manifest as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub kind: ModelKind,
    pub version: String,
    pub input_len: usize,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub scaler: Option<Scaler>,
    #[serde(default)]
    pub baseline: Option<BaselineParams>,
    /// Weights file, relative to the manifest
    #[serde(default)]
    pub onnx_path: Option<PathBuf>,
    /// Expected SHA256 of the weights file, hex encoded
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ModelManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ModelUnavailable(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AgentError::ModelUnavailable(format!("invalid manifest {}: {}", path.display(), e))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.input_len == 0 {
            return Err(unavailable("input_len must be positive"));
        }
        if let Some(names) = &self.feature_names {
            if names.len() != self.input_len {
                return Err(unavailable(format!(
                    "{} feature names for input_len {}",
                    names.len(),
                    self.input_len
                )));
            }
        }
        if let Some(scaler) = &self.scaler {
            if self.kind == ModelKind::Baseline {
                return Err(unavailable(
                    "scaler is only applied to onnx_autoencoder models; baseline models standardize with their own mean and std",
                ));
            }
            if scaler.mean.len() != self.input_len || scaler.scale.len() != self.input_len {
                return Err(unavailable("scaler length does not match input_len"));
            }
        }
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() {
                return Err(unavailable("threshold must be finite"));
            }
        }
        Ok(())
    }
}

fn unavailable(reason: impl Into<String>) -> AgentError {
    AgentError::ModelUnavailable(reason.into())
}

/// Load the model described by a manifest file
pub fn load_model(manifest_path: &Path) -> Result<Box<dyn AnomalyModel>> {
    let manifest = ModelManifest::from_file(manifest_path)?;
    manifest.validate()?;

    let model: Box<dyn AnomalyModel> = match manifest.kind {
        ModelKind::Baseline => {
            let params = manifest
                .baseline
                .clone()
                .ok_or_else(|| unavailable("baseline model without baseline parameters"))?;
            Box::new(BaselineModel::new(&manifest, params)?)
        }
        ModelKind::OnnxAutoencoder => {
            let relative = manifest
                .onnx_path
                .clone()
                .ok_or_else(|| unavailable("onnx model without onnx_path"))?;
            let weights_path = manifest_path
                .parent()
                .map(|dir| dir.join(&relative))
                .unwrap_or(relative);
            let weights = std::fs::read(&weights_path).map_err(|e| {
                unavailable(format!("cannot read weights {}: {}", weights_path.display(), e))
            })?;

            if let Some(expected) = &manifest.sha256 {
                let actual = compute_checksum(&weights);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(unavailable(format!(
                        "checksum mismatch for {}: expected {}, got {}",
                        weights_path.display(),
                        expected,
                        actual
                    )));
                }
            }

            Box::new(OnnxAutoencoder::new(&manifest, &weights)?)
        }
    };

    info!(
        path = %manifest_path.display(),
        kind = ?manifest.kind,
        version = %manifest.version,
        input_len = manifest.input_len,
        "Anomaly model loaded"
    );

    Ok(model)
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
