//! Agent configuration
//!
//! Loaded from an optional config file layered under `ANOMALY_*` environment
//! variables. Every field has a default, so an empty environment is a valid
//! configuration.

use crate::classifier::ThresholdPolicy;
use crate::features::{FeatureBuilder, FeatureLayout, MIN_SAMPLES};
use crate::window::WindowConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file when `--config` is not given
pub const CONFIG_PATH_ENV: &str = "ANOMALY_CONFIG";

/// How the decision threshold is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSetting {
    /// The model's training-time threshold, else `threshold`
    Model,
    /// Always `threshold`
    Fixed,
    /// `mean + adaptive_k * std` of the cycle, never below `threshold`
    Adaptive,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host label written into reports and logs
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Auto-refresh interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Detection interval in seconds (daemon)
    #[serde(default = "default_detect_interval")]
    pub detect_interval_secs: u64,

    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    #[serde(default = "default_window_span")]
    pub window_span_secs: u64,

    /// Samples an entity needs before it is scored
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_absent_cycles")]
    pub absent_cycles_before_eviction: u32,

    /// Path to the model manifest
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_threshold_policy")]
    pub threshold_policy: ThresholdSetting,

    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_adaptive_k")]
    pub adaptive_k: f32,

    /// Directory for anomaly reports
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_sample_interval() -> u64 {
    3
}

fn default_detect_interval() -> u64 {
    30
}

fn default_window_capacity() -> usize {
    50
}

fn default_window_span() -> u64 {
    300
}

fn default_min_samples() -> usize {
    3
}

fn default_absent_cycles() -> u32 {
    2
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model/manifest.json")
}

fn default_threshold_policy() -> ThresholdSetting {
    ThresholdSetting::Model
}

fn default_threshold() -> f32 {
    1.0
}

fn default_adaptive_k() -> f32 {
    3.0
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            sample_interval_secs: default_sample_interval(),
            detect_interval_secs: default_detect_interval(),
            window_capacity: default_window_capacity(),
            window_span_secs: default_window_span(),
            min_samples: default_min_samples(),
            absent_cycles_before_eviction: default_absent_cycles(),
            model_path: default_model_path(),
            threshold_policy: default_threshold_policy(),
            threshold: default_threshold(),
            adaptive_k: default_adaptive_k(),
            report_dir: default_report_dir(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// Without an explicit path, `ANOMALY_CONFIG` may name a file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("ANOMALY").try_parsing(true))
            .build()
            .with_context(|| match &file {
                Some(f) => format!("Failed to read configuration from {}", f.display()),
                None => "Failed to read configuration from environment".to_string(),
            })?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_secs == 0 {
            bail!("sample_interval_secs must be positive");
        }
        if self.detect_interval_secs == 0 {
            bail!("detect_interval_secs must be positive");
        }
        if self.window_capacity == 0 {
            bail!("window_capacity must be positive");
        }
        // the feature builder never asks for fewer than MIN_SAMPLES
        let min_samples = self.min_samples.max(MIN_SAMPLES);
        if min_samples > self.window_capacity {
            bail!(
                "window_capacity ({}) cannot hold the {} samples a detection needs",
                self.window_capacity,
                min_samples
            );
        }
        let needed_span = (min_samples as u64 - 1).saturating_mul(self.sample_interval_secs);
        if self.window_span_secs < needed_span {
            bail!(
                "window_span_secs ({}) is shorter than {} samples {}s apart ({}s)",
                self.window_span_secs,
                min_samples,
                self.sample_interval_secs,
                needed_span
            );
        }
        if !self.threshold.is_finite() || !self.adaptive_k.is_finite() {
            bail!("threshold and adaptive_k must be finite");
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_secs(self.detect_interval_secs)
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            capacity: self.window_capacity,
            max_span: Duration::from_secs(self.window_span_secs),
            absent_cycles_before_eviction: self.absent_cycles_before_eviction,
        }
    }

    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(FeatureLayout::default(), self.min_samples)
    }

    /// Resolve the threshold policy, given the loaded model's threshold
    pub fn threshold_policy(&self, model_threshold: Option<f32>) -> ThresholdPolicy {
        match self.threshold_policy {
            ThresholdSetting::Model => {
                ThresholdPolicy::Fixed(model_threshold.unwrap_or(self.threshold))
            }
            ThresholdSetting::Fixed => ThresholdPolicy::Fixed(self.threshold),
            ThresholdSetting::Adaptive => ThresholdPolicy::MeanPlusKStd {
                k: self.adaptive_k,
                floor: self.threshold,
            },
        }
    }
}
