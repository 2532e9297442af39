//! Agent library for host telemetry anomaly detection
//!
//! This crate provides the core pipeline:
//! - Telemetry sampling of the system and every process
//! - Bounded per-entity sample windows
//! - Feature extraction and pretrained-model scoring
//! - Threshold classification and anomaly reports
//! - Health checks and observability

pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod features;
pub mod health;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod scorer;
pub mod snapshot;
pub mod window;

pub use classifier::{Classifier, ThresholdPolicy};
pub use config::AgentConfig;
pub use controller::{Controller, ControllerBuilder, ControllerState, CycleSummary};
pub use error::{AgentError, Result};
pub use features::{FeatureBuilder, FeatureLayout};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthReport,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use sampler::{create_sampler, HostSampler, Sampler, ScriptedSampler};
pub use scorer::{AnomalyModel, Scorer};
pub use snapshot::{SnapshotDocument, SnapshotWriter};
pub use window::{WindowBuffer, WindowConfig};
