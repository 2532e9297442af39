//! Feature extraction for anomaly scoring
//!
//! Reduces a window of raw samples to a fixed-length vector: for each metric
//! in the layout, each statistic in the layout (mean, variance, slope,
//! extrema). The layout is fixed when the builder is constructed and must
//! match the input shape of the loaded model.

use crate::error::{AgentError, Result};
use crate::models::{metric, FeatureVector, Window};
use serde::{Deserialize, Serialize};

/// Minimum number of samples any layout needs (variance and slope need two)
pub const MIN_SAMPLES: usize = 2;

/// Metrics summarized by the default layout
pub const DEFAULT_FEATURE_METRICS: &[&str] = &[
    metric::CPU_PERCENT,
    metric::MEMORY_PERCENT,
    metric::IO_READ_BYTES,
    metric::IO_WRITE_BYTES,
];

/// Statistics computed for each metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStat {
    Mean,
    Variance,
    Slope,
    Min,
    Max,
}

impl FeatureStat {
    pub const ALL: [FeatureStat; 5] = [
        FeatureStat::Mean,
        FeatureStat::Variance,
        FeatureStat::Slope,
        FeatureStat::Min,
        FeatureStat::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStat::Mean => "mean",
            FeatureStat::Variance => "variance",
            FeatureStat::Slope => "slope",
            FeatureStat::Min => "min",
            FeatureStat::Max => "max",
        }
    }

    fn compute(&self, values: &[f64]) -> f64 {
        match self {
            FeatureStat::Mean => mean(values),
            FeatureStat::Variance => variance(values),
            FeatureStat::Slope => linear_regression_slope(values),
            FeatureStat::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            FeatureStat::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Ordered metric × statistic layout, metric-major
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    metrics: Vec<String>,
    stats: Vec<FeatureStat>,
}

impl FeatureLayout {
    pub fn new<S: Into<String>>(metrics: impl IntoIterator<Item = S>, stats: &[FeatureStat]) -> Self {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            stats: stats.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len() * self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn stats(&self) -> &[FeatureStat] {
        &self.stats
    }

    /// Feature names in vector order, e.g. `cpu_percent.slope`
    pub fn names(&self) -> Vec<String> {
        self.metrics
            .iter()
            .flat_map(|m| self.stats.iter().map(move |s| format!("{}.{}", m, s.as_str())))
            .collect()
    }
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_METRICS.iter().copied(), &FeatureStat::ALL)
    }
}

/// Builds feature vectors from windows
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    layout: FeatureLayout,
    min_samples: usize,
}

impl FeatureBuilder {
    pub fn new(layout: FeatureLayout, min_samples: usize) -> Self {
        Self {
            layout,
            min_samples: min_samples.max(MIN_SAMPLES),
        }
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn has_sufficient_data(&self, window: &Window) -> bool {
        window.len() >= self.min_samples
    }

    /// Verify that a model taking `expected` inputs can consume this layout
    pub fn check_model_shape(&self, expected: usize) -> Result<()> {
        if expected != self.layout.len() {
            return Err(AgentError::FeatureShape {
                expected,
                actual: self.layout.len(),
            });
        }
        Ok(())
    }

    /// Reduce a window to its feature vector. Pure: the same window always
    /// yields the same vector.
    pub fn build(&self, window: &Window) -> Result<FeatureVector> {
        let window_end = match window.end_timestamp() {
            Some(end) if window.len() >= self.min_samples => end,
            _ => {
                return Err(AgentError::InsufficientData {
                    entity: window.entity,
                    available: window.len(),
                    required: self.min_samples,
                })
            }
        };

        let mut values = Vec::with_capacity(self.layout.len());
        for metric in &self.layout.metrics {
            let series = window.series(metric);
            for stat in &self.layout.stats {
                values.push(stat.compute(&series) as f32);
            }
        }

        Ok(FeatureVector {
            entity: window.entity,
            window_end,
            values,
        })
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(FeatureLayout::default(), MIN_SAMPLES)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

/// Calculate linear regression slope for trend detection
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}
