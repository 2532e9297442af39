//! ONNX autoencoder inference using tract
//!
//! The model reconstructs its (standardized) input; the anomaly score is the
//! mean squared reconstruction error and each feature's squared error is kept
//! as evidence.

use super::manifest::{ModelManifest, Scaler};
use super::AnomalyModel;
use crate::error::{AgentError, Result};
use crate::models::Score;
use tract_onnx::prelude::*;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Autoencoder loaded from ONNX bytes
pub struct OnnxAutoencoder {
    model: TractModel,
    input_len: usize,
    version: String,
    threshold: Option<f32>,
    feature_names: Option<Vec<String>>,
    scaler: Option<Scaler>,
}

impl OnnxAutoencoder {
    pub fn new(manifest: &ModelManifest, model_bytes: &[u8]) -> Result<Self> {
        let model = Self::load_model(model_bytes, manifest.input_len)?;
        Ok(Self {
            model,
            input_len: manifest.input_len,
            version: manifest.version.clone(),
            threshold: manifest.threshold,
            feature_names: manifest.feature_names.clone(),
            scaler: manifest.scaler.clone(),
        })
    }

    /// Load and optimize an ONNX model from bytes
    fn load_model(model_bytes: &[u8], input_len: usize) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .and_then(|m| m.with_input_fact(0, f32::fact([1, input_len]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| AgentError::ModelUnavailable(format!("failed to load ONNX model: {:#}", e)))?;
        Ok(model)
    }

    fn run(&self, input: Vec<f32>) -> TractResult<Vec<f32>> {
        let tensor: Tensor = tract_ndarray::Array2::from_shape_vec((1, self.input_len), input)?.into();
        let result = self.model.run(tvec!(tensor.into()))?;
        let output = result
            .first()
            .ok_or_else(|| anyhow::anyhow!("no output from model"))?;
        Ok(output.to_array_view::<f32>()?.iter().copied().collect())
    }
}

impl AnomalyModel for OnnxAutoencoder {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn score(&self, features: &[f32]) -> Result<Score> {
        let input = match &self.scaler {
            Some(scaler) => scaler.transform(features),
            None => features.to_vec(),
        };

        let reconstructed = self
            .run(input.clone())
            .map_err(|e| AgentError::ModelUnavailable(format!("inference failed: {:#}", e)))?;

        if reconstructed.len() != self.input_len {
            return Err(AgentError::ModelUnavailable(format!(
                "model output has {} values, expected {}",
                reconstructed.len(),
                self.input_len
            )));
        }

        let per_feature: Vec<f32> = input
            .iter()
            .zip(&reconstructed)
            .map(|(x, r)| (x - r).powi(2))
            .collect();
        let value = per_feature.iter().sum::<f32>() / self.input_len as f32;

        Ok(Score { value, per_feature })
    }
}
