//! Anomaly Agent - host telemetry anomaly detection daemon
//!
//! Samples the host on a fixed interval, runs a detection pass every
//! `detect_interval_secs`, and writes an anomaly report for each pass.

use agent_lib::{
    config::AgentConfig,
    controller::{Controller, ControllerBuilder},
    features::FeatureBuilder,
    observability::StructuredLogger,
    sampler::create_sampler,
    scorer::Scorer,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "anomaly-agent")]
#[command(version, about = "Host telemetry anomaly detection daemon")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "ANOMALY_CONFIG")]
    config: Option<PathBuf>,

    /// Replay recorded telemetry instead of sampling the host
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!("Starting anomaly-agent");

    let config = AgentConfig::load(args.config.as_deref())?;
    info!(
        host = %config.host_name,
        sample_interval_secs = config.sample_interval_secs,
        detect_interval_secs = config.detect_interval_secs,
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.host_name);
    let features = config.feature_builder();
    let scorer = load_scorer(&config.model_path, &features, &logger)?;
    let sampler = create_sampler(args.replay.as_deref()).context("Failed to create sampler")?;

    let controller = ControllerBuilder::from_config(&config, sampler, Arc::new(scorer))
        .build()
        .await;
    logger.log_startup(
        AGENT_VERSION,
        controller.scorer().model_version().unwrap_or("unavailable"),
    );

    controller.start_auto_refresh(config.sample_interval()).await;

    let period = config.detect_interval();
    let mut detect_ticker = interval_at(Instant::now() + period, period);
    detect_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = detect_ticker.tick() => {
                if controller.scorer().is_available() {
                    run_detection(&controller).await;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    logger.log_shutdown("SIGINT received");
    controller.shutdown().await;
    info!("Shutting down");

    Ok(())
}

/// Load the model once. A shape or layout mismatch is a configuration error
/// and stops the agent; any other failure only disables detection.
fn load_scorer(path: &Path, features: &FeatureBuilder, logger: &StructuredLogger) -> Result<Scorer> {
    match Scorer::load(path, features) {
        Ok(scorer) => {
            logger.log_model_loaded(path, scorer.model_version().unwrap_or("unknown"));
            Ok(scorer)
        }
        Err(e) if e.is_fatal_config() => {
            Err(e).with_context(|| format!("Model {} does not fit the feature layout", path.display()))
        }
        Err(e) => {
            logger.log_model_unavailable(path, &e.to_string());
            Ok(Scorer::unavailable(e.to_string()))
        }
    }
}

/// One scheduled detection pass; saves a report when it succeeds
async fn run_detection(controller: &Controller) -> Option<PathBuf> {
    let result = match controller.detect_anomalies().await {
        Ok(result) => result,
        Err(e) if e.is_transient() => {
            debug!(error = %e, "Detection postponed");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "Detection failed");
            return None;
        }
    };

    match controller.save_snapshot(&result).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "Failed to write anomaly report");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_lib::models::{metric, EntityId, Sample, SampleBatch};
    use agent_lib::sampler::ScriptedSampler;
    use agent_lib::snapshot::SnapshotDocument;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn baseline_manifest(dir: &TempDir, threshold: f32) -> PathBuf {
        let path = dir.path().join("manifest.json");
        let json = format!(
            r#"{{"kind": "baseline", "version": "baseline-test", "input_len": 20,
                "threshold": {},
                "baseline": {{"mean": {:?}, "std": {:?}}}}}"#,
            threshold,
            vec![0.0f32; 20],
            vec![1.0f32; 20]
        );
        std::fs::write(&path, json).unwrap();
        path
    }

    fn script() -> Vec<SampleBatch> {
        (0..3i64)
            .map(|i| {
                let timestamp = Utc.timestamp_opt(1_700_000_000 + i * 3, 0).unwrap();
                SampleBatch {
                    timestamp,
                    system: Sample::new(timestamp, EntityId::System, "system")
                        .with_metric(metric::CPU_PERCENT, 1.0),
                    processes: vec![Sample::new(timestamp, EntityId::process(9, 9), "worker")
                        .with_metric(metric::CPU_PERCENT, 1.0 + i as f64 * 40.0)],
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_detection_tick_writes_report() {
        let dir = TempDir::new().unwrap();
        let manifest = baseline_manifest(&dir, 50.0);
        let mut config = AgentConfig::default();
        config.model_path = manifest.clone();
        config.report_dir = dir.path().join("reports");
        config.host_name = "daemon-test".to_string();

        let logger = StructuredLogger::new(&config.host_name);
        let scorer = load_scorer(&manifest, &config.feature_builder(), &logger).unwrap();
        assert!(scorer.is_available());

        let controller = ControllerBuilder::from_config(
            &config,
            Arc::new(ScriptedSampler::new(script())),
            Arc::new(scorer),
        )
        .build()
        .await;
        for _ in 0..3 {
            controller.refresh().await.unwrap();
        }

        let path = run_detection(&controller).await.unwrap();
        let doc = SnapshotDocument::load(&path).unwrap();
        assert_eq!(doc.host, "daemon-test");
        assert_eq!(doc.model_version, "baseline-test");
        assert_eq!(doc.threshold, 50.0);
        assert_eq!(doc.total_entities, 2);
        // worker cpu mean 41, squared z well above the threshold
        assert_eq!(doc.anomaly_count, 1);
        assert_eq!(doc.anomalies[0].name, "worker");
    }

    #[tokio::test]
    async fn test_missing_model_disables_detection_only() {
        let dir = TempDir::new().unwrap();
        let logger = StructuredLogger::new("h");
        let scorer = load_scorer(
            &dir.path().join("absent.json"),
            &FeatureBuilder::default(),
            &logger,
        )
        .unwrap();
        assert!(!scorer.is_available());
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(
            &path,
            r#"{"kind": "baseline", "version": "v", "input_len": 2,
                "baseline": {"mean": [0.0, 0.0], "std": [1.0, 1.0]}}"#,
        )
        .unwrap();

        let logger = StructuredLogger::new("h");
        assert!(load_scorer(&path, &FeatureBuilder::default(), &logger).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["anomaly-agent", "--config", "agent.toml", "--replay", "r.json"]);
        assert_eq!(args.config, Some(PathBuf::from("agent.toml")));
        assert_eq!(args.replay, Some(PathBuf::from("r.json")));
    }
}
