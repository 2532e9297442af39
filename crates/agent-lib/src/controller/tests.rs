//! End-to-end controller tests
//!
//! Scripted telemetry and stub models drive the whole pipeline
//! deterministically.

#[cfg(test)]
mod pipeline_tests {
    use crate::classifier::ThresholdPolicy;
    use crate::controller::{Controller, ControllerBuilder, ControllerState};
    use crate::error::{AgentError, Result};
    use crate::features::{FeatureBuilder, FeatureLayout};
    use crate::health::{Component, ComponentStatus};
    use crate::models::{metric, EntityId, Sample, SampleBatch, Score};
    use crate::sampler::ScriptedSampler;
    use crate::scorer::{AnomalyModel, Scorer};
    use crate::snapshot::SnapshotDocument;
    use crate::window::WindowConfig;
    use chrono::{DateTime, TimeZone, Utc};
    use crate::models::Severity;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const CPU_SLOPE: usize = 2;

    /// Scores by the CPU rate of change
    struct SlopeModel;

    impl AnomalyModel for SlopeModel {
        fn input_len(&self) -> usize {
            20
        }

        fn model_version(&self) -> &str {
            "slope-stub"
        }

        fn score(&self, features: &[f32]) -> Result<Score> {
            let mut per_feature = vec![0.0; features.len()];
            per_feature[CPU_SLOPE] = features[CPU_SLOPE].abs();
            Ok(Score {
                value: features[CPU_SLOPE].abs(),
                per_feature,
            })
        }
    }

    /// Scores every entity the same
    struct ConstModel(f32);

    impl AnomalyModel for ConstModel {
        fn input_len(&self) -> usize {
            20
        }

        fn model_version(&self) -> &str {
            "const-stub"
        }

        fn threshold(&self) -> Option<f32> {
            Some(0.5)
        }

        fn score(&self, _features: &[f32]) -> Result<Score> {
            Ok(Score::scalar(self.0))
        }
    }

    /// Returns `extreme` for entities whose CPU slope exceeds 15, else a low score
    struct ExtremeModel(f32);

    impl AnomalyModel for ExtremeModel {
        fn input_len(&self) -> usize {
            20
        }

        fn model_version(&self) -> &str {
            "extreme-stub"
        }

        fn score(&self, features: &[f32]) -> Result<Score> {
            if features[CPU_SLOPE] > 15.0 {
                Ok(Score::scalar(self.0))
            } else {
                Ok(Score::scalar(0.1))
            }
        }
    }

    /// Fails its first scoring call, then behaves like `SlopeModel`
    struct FlakyModel(AtomicBool);

    impl AnomalyModel for FlakyModel {
        fn input_len(&self) -> usize {
            20
        }

        fn model_version(&self) -> &str {
            "flaky-stub"
        }

        fn score(&self, features: &[f32]) -> Result<Score> {
            if !self.0.swap(true, Ordering::SeqCst) {
                return Err(AgentError::ModelUnavailable("inference failed".into()));
            }
            SlopeModel.score(features)
        }
    }

    fn ts(i: usize) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + i as i64 * 3, 0).unwrap()
    }

    fn system(i: usize) -> Sample {
        Sample::new(ts(i), EntityId::System, "system")
            .with_metric(metric::CPU_PERCENT, 25.0)
            .with_metric(metric::MEMORY_PERCENT, 40.0)
    }

    fn process(i: usize, pid: u32, name: &str, cpu: f64) -> Sample {
        Sample::new(ts(i), EntityId::process(pid, 1000 + pid as u64), name)
            .with_metric(metric::CPU_PERCENT, cpu)
            .with_metric(metric::MEMORY_PERCENT, 2.0)
    }

    fn batch(i: usize, processes: Vec<Sample>) -> SampleBatch {
        SampleBatch {
            timestamp: ts(i),
            system: system(i),
            processes,
        }
    }

    fn rising_cpu_script() -> Vec<SampleBatch> {
        [10.0, 20.0, 30.0, 40.0, 90.0]
            .iter()
            .enumerate()
            .map(|(i, cpu)| {
                batch(
                    i,
                    vec![
                        process(i, 100, "steady", 5.0),
                        process(i, 200, "runaway", *cpu),
                    ],
                )
            })
            .collect()
    }

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(FeatureLayout::default(), 3)
    }

    async fn controller(
        sampler: ScriptedSampler,
        model: Option<Box<dyn AnomalyModel>>,
        policy: ThresholdPolicy,
        report_dir: &TempDir,
    ) -> Arc<Controller> {
        let scorer = match model {
            Some(model) => Scorer::new(model, &builder()).unwrap(),
            None => Scorer::unavailable("manifest not found"),
        };
        ControllerBuilder::new(Arc::new(sampler), Arc::new(scorer))
            .window_config(WindowConfig::default())
            .feature_builder(builder())
            .threshold_policy(policy)
            .report_dir(report_dir.path())
            .host("test-host")
            .build()
            .await
    }

    #[tokio::test]
    async fn test_rising_cpu_process_is_flagged() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(SlopeModel)),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        for _ in 0..5 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();

        assert_eq!(result.entities_considered, 3);
        assert_eq!(result.anomaly_count(), 1);
        let record = &result.records[0];
        assert_eq!(record.entity, EntityId::process(200, 1200));
        assert_eq!(record.name, "runaway");
        assert_eq!(record.score.value, 18.0);
        assert_eq!(record.latest.metric(metric::CPU_PERCENT), 90.0);
        assert_eq!(record.top_features, vec!["cpu_percent.slope".to_string()]);
        assert_eq!(result.model_version, "slope-stub");
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_vanished_process_is_forgotten() {
        let dir = TempDir::new().unwrap();
        let script = (0..4)
            .map(|i| {
                let mut procs = vec![process(i, 20, "long-lived", 3.0)];
                if i == 0 {
                    procs.push(process(i, 10, "short-lived", 3.0));
                }
                batch(i, procs)
            })
            .collect();
        let ctl = controller(
            ScriptedSampler::new(script),
            Some(Box::new(ConstModel(1.0))),
            ThresholdPolicy::Fixed(0.0),
            &dir,
        )
        .await;
        let gone = EntityId::process(10, 1010);

        ctl.refresh().await.unwrap();
        ctl.refresh().await.unwrap();
        assert!(ctl.get_process_table().await.iter().any(|s| s.entity == gone));

        let summary = ctl.refresh().await.unwrap();
        assert_eq!(summary.evicted, vec![gone]);
        let table = ctl.get_process_table().await;
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].name, "long-lived");

        ctl.refresh().await.unwrap();
        let result = ctl.detect_anomalies().await.unwrap();
        assert!(result.records.iter().all(|r| r.entity != gone));
        assert_eq!(result.anomaly_count(), 2);
    }

    #[tokio::test]
    async fn test_detect_too_early_reports_insufficient_data() {
        let dir = TempDir::new().unwrap();
        let script = rising_cpu_script().into_iter().take(2).collect();
        let ctl = controller(
            ScriptedSampler::new(script),
            Some(Box::new(SlopeModel)),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        ctl.refresh().await.unwrap();
        match ctl.detect_anomalies().await {
            Err(AgentError::InsufficientData {
                available,
                required,
                ..
            }) => {
                // the implicit sampling pass added a second sample
                assert_eq!(available, 2);
                assert_eq!(required, 3);
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }

        // script exhausted: the implicit pass fails but detection still answers
        assert!(matches!(
            ctl.detect_anomalies().await,
            Err(AgentError::InsufficientData { .. })
        ));
        assert!(ctl.last_result().await.is_none());
        assert_eq!(ctl.state(), ControllerState::Idle);

        let health = ctl.health().await;
        let buffer = &health.components[&Component::WindowBuffer];
        assert_eq!(buffer.status, ComponentStatus::Degraded);
        assert_eq!(buffer.consecutive_failures, 2);
        assert!(health.detection_blocker().is_none());
    }

    #[tokio::test]
    async fn test_detect_samples_first_when_buffer_is_short() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(ConstModel(1.0))),
            ThresholdPolicy::Fixed(2.0),
            &dir,
        )
        .await;

        ctl.refresh().await.unwrap();
        ctl.refresh().await.unwrap();
        let result = ctl.detect_anomalies().await.unwrap();
        assert!(result.is_clean());
        assert_eq!(result.entities_considered, 3);
        assert_eq!(ctl.buffer().stats().await.total_samples, 9);
    }

    #[tokio::test]
    async fn test_skipped_entities_are_counted() {
        let dir = TempDir::new().unwrap();
        let script = (0..3)
            .map(|i| {
                let mut procs = vec![process(i, 1, "init", 0.5)];
                if i == 2 {
                    procs.push(process(i, 77, "newcomer", 50.0));
                }
                batch(i, procs)
            })
            .collect();
        let ctl = controller(
            ScriptedSampler::new(script),
            Some(Box::new(ConstModel(1.0))),
            ThresholdPolicy::Fixed(0.5),
            &dir,
        )
        .await;

        for _ in 0..3 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();
        assert_eq!(result.entities_considered, 2);
        assert_eq!(result.skipped_insufficient, 1);
        assert_eq!(result.anomaly_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_snapshot_is_valid() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(ConstModel(0.1))),
            ThresholdPolicy::Fixed(5.0),
            &dir,
        )
        .await;

        for _ in 0..3 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();
        assert!(result.is_clean());

        let path = ctl.save_snapshot(&result).await.unwrap();
        assert!(path.starts_with(dir.path()));
        let doc = SnapshotDocument::load(&path).unwrap();
        assert!(doc.anomalies.is_empty());
        assert_eq!(doc.timestamp, result.timestamp);
        assert_eq!(doc.host, "test-host");
        assert_eq!(doc.total_entities, 3);
    }

    #[tokio::test]
    async fn test_model_unavailable_keeps_sampling() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            None,
            ThresholdPolicy::Fixed(1.0),
            &dir,
        )
        .await;

        for _ in 0..4 {
            ctl.refresh().await.unwrap();
        }
        assert_eq!(ctl.get_process_table().await.len(), 2);
        assert!(ctl.system_overview().await.is_some());

        assert!(matches!(
            ctl.detect_anomalies().await,
            Err(AgentError::ModelUnavailable(_))
        ));

        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Scorer].status, ComponentStatus::Unhealthy);
        assert_eq!(health.components[&Component::Sampler].status, ComponentStatus::Healthy);
        assert!(health
            .detection_blocker()
            .unwrap()
            .contains("manifest not found"));
    }

    #[tokio::test]
    async fn test_collection_failure_degrades_sampler() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script().into_iter().take(1).collect()),
            Some(Box::new(SlopeModel)),
            ThresholdPolicy::Fixed(1.0),
            &dir,
        )
        .await;

        ctl.refresh().await.unwrap();
        assert!(matches!(ctl.refresh().await, Err(AgentError::Collection(_))));

        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Sampler].status, ComponentStatus::Degraded);
        // the failed cycle is skipped, nothing is lost
        assert_eq!(ctl.buffer().stats().await.total_samples, 3);
    }

    #[tokio::test]
    async fn test_model_threshold_used_by_default() {
        let dir = TempDir::new().unwrap();
        let scorer = Scorer::new(Box::new(ConstModel(0.7)), &builder()).unwrap();
        let ctl = ControllerBuilder::new(
            Arc::new(ScriptedSampler::new(rising_cpu_script())),
            Arc::new(scorer),
        )
        .feature_builder(builder())
        .report_dir(dir.path())
        .build()
        .await;

        assert_eq!(ctl.threshold_policy(), ThresholdPolicy::Fixed(0.5));
        for _ in 0..3 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();
        assert_eq!(result.anomaly_count(), 3);
        assert_eq!(result.threshold, 0.5);

        let last = ctl.last_result().await.unwrap();
        assert_eq!(last.timestamp, result.timestamp);
    }

    #[tokio::test]
    async fn test_auto_refresh_toggle() {
        let dir = TempDir::new().unwrap();
        let sampler = Arc::new(ScriptedSampler::new(rising_cpu_script()).repeat_last());
        let scorer = Scorer::new(Box::new(SlopeModel), &builder()).unwrap();
        let ctl = ControllerBuilder::new(sampler.clone(), Arc::new(scorer))
            .feature_builder(builder())
            .report_dir(dir.path())
            .build()
            .await;

        assert!(ctl.toggle_auto_refresh(Duration::from_millis(10)).await);
        assert_eq!(ctl.state(), ControllerState::AutoRefreshing);
        assert_eq!(ctl.auto_refresh_interval().await, Some(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!ctl.toggle_auto_refresh(Duration::from_millis(10)).await);
        assert_eq!(ctl.state(), ControllerState::Idle);
        let calls = sampler.calls();
        assert!(calls >= 2, "only {} ticks ran", calls);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sampler.calls(), calls);
    }

    #[tokio::test]
    async fn test_detect_while_auto_refreshing() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()).repeat_last(),
            Some(Box::new(SlopeModel)),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        for _ in 0..3 {
            ctl.refresh().await.unwrap();
        }
        ctl.start_auto_refresh(Duration::from_millis(5)).await;

        let detections: Vec<_> = (0..4)
            .map(|_| {
                let ctl = Arc::clone(&ctl);
                tokio::spawn(async move { ctl.detect_anomalies().await })
            })
            .collect();
        for handle in detections {
            let result = handle.await.unwrap().unwrap();
            for pair in result.records.windows(2) {
                assert!(pair[0].score.value >= pair[1].score.value);
            }
        }

        ctl.shutdown().await;
        assert!(!ctl.is_auto_refreshing().await);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_overflowing_score_is_flagged() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(ExtremeModel(f32::INFINITY))),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        for _ in 0..5 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();

        assert_eq!(result.entities_considered, 3);
        assert_eq!(result.anomaly_count(), 1);
        assert_eq!(result.records[0].name, "runaway");
        assert_eq!(result.records[0].score.value, f32::MAX);
        assert_eq!(result.records[0].severity, Severity::Critical);

        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Scorer].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_nan_score_drops_only_that_entity() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(ExtremeModel(f32::NAN))),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        for _ in 0..5 {
            ctl.refresh().await.unwrap();
        }
        let result = ctl.detect_anomalies().await.unwrap();

        // system and "steady" are still scored
        assert_eq!(result.entities_considered, 2);
        assert!(result.is_clean());
        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Scorer].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_scorer_health_recovers_after_failed_pass() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(
            ScriptedSampler::new(rising_cpu_script()),
            Some(Box::new(FlakyModel(AtomicBool::new(false)))),
            ThresholdPolicy::Fixed(10.0),
            &dir,
        )
        .await;

        for _ in 0..5 {
            ctl.refresh().await.unwrap();
        }
        assert!(matches!(
            ctl.detect_anomalies().await,
            Err(AgentError::ModelUnavailable(_))
        ));
        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Scorer].status, ComponentStatus::Unhealthy);

        let result = ctl.detect_anomalies().await.unwrap();
        assert_eq!(result.anomaly_count(), 1);
        let health = ctl.health().await;
        assert_eq!(health.components[&Component::Scorer].status, ComponentStatus::Healthy);
    }
}
