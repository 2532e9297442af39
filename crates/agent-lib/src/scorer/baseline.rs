//! Baseline model: distance from learned-normal feature statistics
//!
//! Each feature is standardized against the mean and standard deviation
//! observed on normal training data. The score is the mean squared z-score;
//! each feature contributes its own squared z-score.

use super::manifest::{BaselineParams, ModelManifest};
use super::AnomalyModel;
use crate::error::{AgentError, Result};
use crate::models::Score;

/// Lower bound on standard deviations to keep constant features finite
const MIN_STD: f32 = 1e-6;

pub struct BaselineModel {
    version: String,
    threshold: Option<f32>,
    feature_names: Option<Vec<String>>,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl BaselineModel {
    pub fn new(manifest: &ModelManifest, params: BaselineParams) -> Result<Self> {
        if params.mean.len() != manifest.input_len || params.std.len() != manifest.input_len {
            return Err(AgentError::ModelUnavailable(format!(
                "baseline parameters have {}/{} entries, expected {}",
                params.mean.len(),
                params.std.len(),
                manifest.input_len
            )));
        }

        Ok(Self {
            version: manifest.version.clone(),
            threshold: manifest.threshold,
            feature_names: manifest.feature_names.clone(),
            mean: params.mean,
            std: params.std.into_iter().map(|s| s.abs().max(MIN_STD)).collect(),
        })
    }
}

impl AnomalyModel for BaselineModel {
    fn input_len(&self) -> usize {
        self.mean.len()
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
        let per_feature: Vec<f32> = features
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| ((x - m) / s).powi(2))
            .collect();
        let value = per_feature.iter().sum::<f32>() / per_feature.len().max(1) as f32;

        Ok(Score { value, per_feature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ModelKind;

    fn model(mean: Vec<f32>, std: Vec<f32>) -> BaselineModel {
        let manifest = ModelManifest {
            kind: ModelKind::Baseline,
            version: "b1".to_string(),
            input_len: mean.len(),
            feature_names: None,
            threshold: Some(2.0),
            scaler: None,
            baseline: None,
            onnx_path: None,
            sha256: None,
        };
        BaselineModel::new(&manifest, BaselineParams { mean, std }).unwrap()
    }

    #[test]
    fn test_normal_input_scores_zero() {
        let m = model(vec![1.0, 2.0], vec![1.0, 1.0]);
        let score = m.score(&[1.0, 2.0]).unwrap();
        assert_eq!(score.value, 0.0);
        assert_eq!(score.per_feature, vec![0.0, 0.0]);
    }

    #[test]
    fn test_deviation_scores_squared_z() {
        let m = model(vec![0.0, 0.0], vec![1.0, 2.0]);
        let score = m.score(&[3.0, 2.0]).unwrap();
        assert_eq!(score.per_feature, vec![9.0, 1.0]);
        assert_eq!(score.value, 5.0);
    }

    #[test]
    fn test_zero_std_stays_finite() {
        let m = model(vec![0.0], vec![0.0]);
        let score = m.score(&[1.0]).unwrap();
        assert!(score.value.is_finite());
        assert!(score.value > 0.0);
    }

    #[test]
    fn test_parameter_length_mismatch() {
        let manifest = ModelManifest {
            kind: ModelKind::Baseline,
            version: "b1".to_string(),
            input_len: 3,
            feature_names: None,
            threshold: None,
            scaler: None,
            baseline: None,
            onnx_path: None,
            sha256: None,
        };
        let result = BaselineModel::new(
            &manifest,
            BaselineParams {
                mean: vec![0.0; 2],
                std: vec![1.0; 3],
            },
        );
        assert!(result.is_err());
    }
}
