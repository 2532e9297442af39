//! Pipeline orchestration
//!
//! The [`Controller`] is the operation set a UI drives: manual refresh,
//! auto-refresh toggle, on-demand detection, snapshot saving and the process
//! table. It is the only layer that decides whether a failure is reported,
//! retried on the next tick, or disables detection.
//!
//! Sampling passes are serialized. A detection pass snapshots the windows
//! under the buffer's read lock, releases it, and scores on a blocking worker
//! so the auto-refresh tick is never held up by the model.

mod state;

#[cfg(test)]
mod tests;

pub use state::ControllerState;

use crate::classifier::{Classifier, Evidence, ThresholdPolicy};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::features::FeatureBuilder;
use crate::health::{Component, HealthRegistry, HealthReport};
use crate::models::{ClassificationResult, EntityId, Sample, Score, Window};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::sampler::Sampler;
use crate::scorer::Scorer;
use crate::snapshot::SnapshotWriter;
use crate::window::{WindowBuffer, WindowConfig};
use chrono::{DateTime, Utc};
use state::Activity;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What one sampling pass did
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub timestamp: DateTime<Utc>,
    /// Samples recorded, the system sample included
    pub recorded: usize,
    /// Entities garbage-collected in this pass
    pub evicted: Vec<EntityId>,
    pub tracked_entities: usize,
    pub total_samples: usize,
    pub elapsed: Duration,
}

struct AutoRefresh {
    interval: Duration,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Result of scoring every ready window
struct ScoredWindows {
    scores: HashMap<EntityId, Score>,
    evidence: HashMap<EntityId, Evidence>,
    skipped: usize,
    /// Entities whose score was NaN
    rejected: usize,
    best_available: (EntityId, usize),
}

pub struct Controller {
    sampler: Arc<dyn Sampler>,
    buffer: Arc<WindowBuffer>,
    features: FeatureBuilder,
    scorer: Arc<Scorer>,
    classifier: Classifier,
    writer: SnapshotWriter,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    activity: Activity,
    /// Single writer: one sampling pass at a time
    cycle_lock: Mutex<()>,
    detect_lock: Mutex<()>,
    auto_refresh: Mutex<Option<AutoRefresh>>,
    last_result: RwLock<Option<Arc<ClassificationResult>>>,
}

impl Controller {
    pub fn state(&self) -> ControllerState {
        self.activity.state()
    }

    pub fn buffer(&self) -> &Arc<WindowBuffer> {
        &self.buffer
    }

    pub fn scorer(&self) -> &Arc<Scorer> {
        &self.scorer
    }

    pub fn feature_builder(&self) -> &FeatureBuilder {
        &self.features
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        self.classifier.policy()
    }

    pub fn report_dir(&self) -> &Path {
        self.writer.report_dir()
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Run one sampling pass
    pub async fn refresh(&self) -> Result<CycleSummary> {
        let _cycle = self.cycle_lock.lock().await;
        let _sampling = self.activity.sampling();
        let start = Instant::now();

        let batch = match self.sampler.sample().await {
            Ok(batch) => batch,
            Err(e) => {
                self.metrics.inc_collection_errors();
                self.health
                    .mark_degraded(Component::Sampler, e.to_string())
                    .await;
                warn!(sampler = self.sampler.name(), error = %e, "Sampling cycle skipped");
                return Err(e);
            }
        };

        let outcome = self.buffer.ingest(&batch).await;
        let stats = self.buffer.stats().await;
        let elapsed = start.elapsed();

        self.metrics.observe_sampling_latency(elapsed.as_secs_f64());
        self.metrics
            .set_buffer_occupancy(stats.tracked_entities, stats.total_samples);
        self.metrics.inc_evicted(outcome.evicted.len());
        self.health.mark_healthy(Component::Sampler).await;

        debug!(
            recorded = outcome.recorded,
            evicted = outcome.evicted.len(),
            tracked = stats.tracked_entities,
            elapsed_ms = elapsed.as_millis(),
            "Sampling cycle complete"
        );

        Ok(CycleSummary {
            timestamp: batch.timestamp,
            recorded: outcome.recorded,
            evicted: outcome.evicted,
            tracked_entities: stats.tracked_entities,
            total_samples: stats.total_samples,
            elapsed,
        })
    }

    pub async fn is_auto_refreshing(&self) -> bool {
        self.auto_refresh.lock().await.is_some()
    }

    /// Interval of the running auto-refresh loop, if any
    pub async fn auto_refresh_interval(&self) -> Option<Duration> {
        self.auto_refresh.lock().await.as_ref().map(|a| a.interval)
    }

    /// Start auto-refresh if stopped, stop it if running. Returns whether it
    /// is running afterwards.
    pub async fn toggle_auto_refresh(self: &Arc<Self>, interval: Duration) -> bool {
        if self.is_auto_refreshing().await {
            self.stop_auto_refresh().await;
            false
        } else {
            self.start_auto_refresh(interval).await;
            true
        }
    }

    /// Start the auto-refresh loop; restarts it if the interval differs
    pub async fn start_auto_refresh(self: &Arc<Self>, every: Duration) {
        let mut slot = self.auto_refresh.lock().await;
        if let Some(running) = slot.as_ref() {
            if running.interval == every {
                return;
            }
        }
        if let Some(running) = slot.take() {
            Self::join_auto_refresh(running).await;
        }

        let every = every.max(Duration::from_millis(1));
        let (shutdown, rx) = broadcast::channel(1);
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(Self::auto_refresh_loop(weak, every, rx));

        self.activity.set_auto_refresh(true);
        info!(interval_ms = every.as_millis() as u64, "Auto-refresh started");
        *slot = Some(AutoRefresh {
            interval: every,
            shutdown,
            task,
        });
    }

    /// Stop the auto-refresh loop. A tick already in flight completes; no
    /// further tick starts. Returns once the loop has exited.
    pub async fn stop_auto_refresh(&self) {
        let running = self.auto_refresh.lock().await.take();
        if let Some(running) = running {
            Self::join_auto_refresh(running).await;
            self.activity.set_auto_refresh(false);
            info!("Auto-refresh stopped");
        }
    }

    async fn join_auto_refresh(running: AutoRefresh) {
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            warn!(error = %e, "Auto-refresh task ended abnormally");
        }
    }

    async fn auto_refresh_loop(
        controller: Weak<Controller>,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("Auto-refresh loop received shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(controller) = controller.upgrade() else {
                        break;
                    };
                    // Failures are already logged and counted; retry next tick
                    let _ = controller.refresh().await;
                }
            }
        }
    }

    /// Run the full pipeline over the current windows.
    ///
    /// Performs one sampling pass first if no entity has enough samples yet.
    /// Fails with `InsufficientData` if still no entity can be scored and
    /// with `ModelUnavailable` if detection is disabled.
    pub async fn detect_anomalies(&self) -> Result<ClassificationResult> {
        let _detect = self.detect_lock.lock().await;
        let _detecting = self.activity.detecting();

        if let Err(e) = self.scorer.ensure_available() {
            warn!(error = %e, "Detection requested but no model is loaded");
            return Err(e);
        }

        let min_samples = self.features.min_samples();
        if self.buffer.ready_count(min_samples).await == 0 {
            debug!("Buffer not yet populated, sampling before detection");
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "Implicit sampling pass failed");
            }
        }

        // Clone under the read lock, score without it
        let windows = self.buffer.windows().await;
        let features = self.features.clone();
        let scorer = Arc::clone(&self.scorer);
        let start = Instant::now();
        let scored = tokio::task::spawn_blocking(move || score_windows(&features, &scorer, windows))
            .await
            .map_err(|e| AgentError::ModelUnavailable(format!("scoring task failed: {}", e)))?;
        let elapsed = start.elapsed();

        let scored = match scored {
            Ok(scored) => scored,
            Err(e) => {
                if let AgentError::ModelUnavailable(reason) = &e {
                    self.health
                        .mark_unhealthy(Component::Scorer, format!("detection unavailable: {}", reason))
                        .await;
                }
                warn!(error = %e, "Detection pass failed");
                return Err(e);
            }
        };

        if scored.scores.is_empty() && scored.rejected == 0 {
            let (entity, available) = scored.best_available;
            let err = AgentError::InsufficientData {
                entity,
                available,
                required: min_samples,
            };
            self.health
                .mark_degraded(Component::WindowBuffer, err.to_string())
                .await;
            return Err(err);
        }

        self.metrics.observe_scoring_latency(elapsed.as_secs_f64());
        self.health.mark_healthy(Component::Scorer).await;
        self.health.mark_healthy(Component::WindowBuffer).await;
        if scored.rejected > 0 {
            warn!(rejected = scored.rejected, "Some entities had no usable score");
        }

        let mut result = self.classifier.classify(&scored.scores, &scored.evidence);
        result.skipped_insufficient = scored.skipped;

        self.metrics.record_detection(result.anomaly_count());
        self.logger.log_detection(&result);
        for record in &result.records {
            self.logger.log_anomaly(record);
        }

        *self.last_result.write().await = Some(Arc::new(result.clone()));
        Ok(result)
    }

    /// Persist a classification result as a report file
    pub async fn save_snapshot(&self, result: &ClassificationResult) -> Result<PathBuf> {
        let path = self.writer.write(result)?;
        self.logger.log_snapshot_saved(&path, result.anomaly_count());
        Ok(path)
    }

    /// Latest raw sample of every tracked process, ordered by entity
    pub async fn get_process_table(&self) -> Vec<Sample> {
        self.buffer.latest_process_samples().await
    }

    /// Latest system-wide sample
    pub async fn system_overview(&self) -> Option<Sample> {
        self.buffer.latest(&EntityId::System).await
    }

    /// Result of the most recent successful detection pass
    pub async fn last_result(&self) -> Option<Arc<ClassificationResult>> {
        self.last_result.read().await.clone()
    }

    pub async fn health(&self) -> HealthReport {
        self.health.report().await
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        self.stop_auto_refresh().await;
    }
}

/// Build and score every window with enough samples. Runs on a blocking
/// worker. A NaN score drops only its entity; any other model failure aborts
/// the whole pass.
fn score_windows(
    features: &FeatureBuilder,
    scorer: &Scorer,
    windows: Vec<Window>,
) -> Result<ScoredWindows> {
    let mut scored = ScoredWindows {
        scores: HashMap::new(),
        evidence: HashMap::new(),
        skipped: 0,
        rejected: 0,
        best_available: (EntityId::System, 0),
    };

    for window in windows {
        if window.len() > scored.best_available.1 {
            scored.best_available = (window.entity, window.len());
        }

        let vector = match features.build(&window) {
            Ok(vector) => vector,
            Err(AgentError::InsufficientData { .. }) => {
                scored.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(latest) = window.latest().cloned() else {
            scored.skipped += 1;
            continue;
        };

        let score = match scorer.score(&vector) {
            Ok(score) => score,
            Err(AgentError::InvalidScore(reason)) => {
                warn!(entity = %window.entity, reason = %reason, "Entity left out of detection pass");
                scored.rejected += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        scored.scores.insert(window.entity, score);
        scored.evidence.insert(
            window.entity,
            Evidence {
                features: vector,
                latest,
            },
        );
    }

    Ok(scored)
}

/// Builder for a [`Controller`]
pub struct ControllerBuilder {
    sampler: Arc<dyn Sampler>,
    scorer: Arc<Scorer>,
    window_config: WindowConfig,
    features: FeatureBuilder,
    policy: Option<ThresholdPolicy>,
    report_dir: PathBuf,
    host: String,
    health: HealthRegistry,
}

impl ControllerBuilder {
    pub fn new(sampler: Arc<dyn Sampler>, scorer: Arc<Scorer>) -> Self {
        Self {
            sampler,
            scorer,
            window_config: WindowConfig::default(),
            features: FeatureBuilder::default(),
            policy: None,
            report_dir: PathBuf::from("."),
            host: String::from("localhost"),
            health: HealthRegistry::new(),
        }
    }

    /// Start from the agent configuration
    pub fn from_config(config: &AgentConfig, sampler: Arc<dyn Sampler>, scorer: Arc<Scorer>) -> Self {
        let policy = config.threshold_policy(scorer.model_threshold());
        Self::new(sampler, scorer)
            .window_config(config.window_config())
            .feature_builder(config.feature_builder())
            .threshold_policy(policy)
            .report_dir(config.report_dir.clone())
            .host(config.host_name.clone())
    }

    pub fn window_config(mut self, config: WindowConfig) -> Self {
        self.window_config = config;
        self
    }

    pub fn feature_builder(mut self, features: FeatureBuilder) -> Self {
        self.features = features;
        self
    }

    /// Defaults to the model's threshold, else 1.0
    pub fn threshold_policy(mut self, policy: ThresholdPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub async fn build(self) -> Arc<Controller> {
        let metrics = AgentMetrics::new();
        let policy = self.policy.unwrap_or_else(|| {
            ThresholdPolicy::Fixed(self.scorer.model_threshold().unwrap_or(1.0))
        });
        let model_version = self.scorer.model_version().unwrap_or("unavailable").to_string();
        let classifier =
            Classifier::new(policy, self.features.layout()).with_model_version(model_version.clone());
        let writer = SnapshotWriter::new(
            self.report_dir,
            self.host.clone(),
            self.features.layout().names(),
        );

        match self.scorer.unavailable_reason() {
            Some(reason) => {
                self.health
                    .mark_unhealthy(Component::Scorer, format!("detection unavailable: {}", reason))
                    .await;
                metrics.set_model_info("none", "unavailable");
            }
            None => metrics.set_model_info(&model_version, "ready"),
        }

        info!(
            sampler = self.sampler.name(),
            policy = %policy.name(),
            min_samples = self.features.min_samples(),
            capacity = self.window_config.capacity,
            "Controller ready"
        );

        Arc::new(Controller {
            sampler: self.sampler,
            buffer: Arc::new(WindowBuffer::new(self.window_config)),
            features: self.features,
            scorer: self.scorer,
            classifier,
            writer,
            health: self.health,
            metrics,
            logger: StructuredLogger::new(self.host),
            activity: Activity::default(),
            cycle_lock: Mutex::new(()),
            detect_lock: Mutex::new(()),
            auto_refresh: Mutex::new(None),
            last_result: RwLock::new(None),
        })
    }
}
