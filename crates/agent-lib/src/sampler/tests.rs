//! Sampler tests
//!
//! The host sampler is exercised against the machine running the tests; the
//! scripted sampler against fixed batches.

#[cfg(test)]
mod host_sampler_tests {
    use crate::models::{metric, EntityId};
    use crate::sampler::{HostSampler, Sampler};

    #[tokio::test]
    async fn test_host_sample_has_system_metrics() {
        let sampler = HostSampler::new().unwrap();
        let batch = sampler.sample().await.unwrap();

        assert_eq!(batch.system.entity, EntityId::System);
        assert_eq!(batch.system.name, "system");
        let mem = batch.system.metric(metric::MEMORY_PERCENT);
        assert!(mem > 0.0 && mem <= 100.0, "memory percent was {}", mem);
        assert_eq!(
            batch.system.metric(metric::PROCESS_COUNT) as usize,
            batch.processes.len()
        );
    }

    #[tokio::test]
    async fn test_host_sample_sees_current_process() {
        let sampler = HostSampler::new().unwrap();
        let batch = sampler.sample().await.unwrap();
        let me = std::process::id();

        assert!(
            batch.processes.iter().any(|s| s.entity.pid() == Some(me)),
            "own pid {} missing from batch",
            me
        );
        assert!(batch.processes.iter().all(|s| s.entity.is_process()));
        assert!(batch.processes.iter().all(|s| !s.name.is_empty()));
    }

    #[tokio::test]
    async fn test_host_processes_sorted_and_unique() {
        let sampler = HostSampler::new().unwrap();
        let batch = sampler.sample().await.unwrap();

        let ids: Vec<_> = batch.processes.iter().map(|s| s.entity).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    /// `Tgid` from `/proc/<pid>/status`, if the task still exists
    #[cfg(target_os = "linux")]
    fn thread_group_id(pid: u32) -> Option<u32> {
        let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        status
            .lines()
            .find_map(|line| line.strip_prefix("Tgid:"))
            .and_then(|v| v.trim().parse().ok())
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_host_sample_excludes_threads() {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let stop_rx = std::sync::Arc::new(std::sync::Mutex::new(stop_rx));
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let rx = std::sync::Arc::clone(&stop_rx);
                std::thread::spawn(move || {
                    let _ = rx.lock().unwrap().recv_timeout(std::time::Duration::from_secs(5));
                })
            })
            .collect();

        let sampler = HostSampler::new().unwrap();
        let batch = sampler.sample().await.unwrap();
        drop(stop_tx);
        for worker in workers {
            worker.join().unwrap();
        }

        let me = std::process::id();
        let own = batch
            .processes
            .iter()
            .filter(|s| thread_group_id(s.entity.pid().unwrap()) == Some(me))
            .count();
        assert_eq!(own, 1, "test process reported {} times", own);

        for sample in &batch.processes {
            let pid = sample.entity.pid().unwrap();
            if let Some(tgid) = thread_group_id(pid) {
                assert_eq!(tgid, pid, "{} (pid {}) is a thread of {}", sample.name, pid, tgid);
            }
        }
    }
}

#[cfg(test)]
mod scripted_sampler_tests {
    use crate::error::AgentError;
    use crate::models::{metric, EntityId, Sample, SampleBatch};
    use crate::sampler::{Sampler, ScriptedSampler};
    use chrono::{TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn batch(secs: i64, cpu: f64) -> SampleBatch {
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        SampleBatch {
            timestamp: ts,
            system: Sample::new(ts, EntityId::System, "system").with_metric(metric::CPU_PERCENT, cpu),
            processes: vec![Sample::new(ts, EntityId::process(10, 1), "worker")
                .with_metric(metric::CPU_PERCENT, cpu)],
        }
    }

    #[tokio::test]
    async fn test_plays_batches_in_order_then_fails() {
        let sampler = ScriptedSampler::new(vec![batch(0, 1.0), batch(3, 2.0)]);

        assert_eq!(sampler.sample().await.unwrap().system.metric(metric::CPU_PERCENT), 1.0);
        assert_eq!(sampler.sample().await.unwrap().system.metric(metric::CPU_PERCENT), 2.0);
        assert!(matches!(
            sampler.sample().await,
            Err(AgentError::Collection(_))
        ));
        assert_eq!(sampler.calls(), 3);
        assert_eq!(sampler.remaining(), 0);
    }

    #[tokio::test]
    async fn test_repeat_last_advances_timestamps() {
        let sampler = ScriptedSampler::new(vec![batch(0, 5.0)]).repeat_last();

        let first = sampler.sample().await.unwrap();
        let again = sampler.sample().await.unwrap();
        let third = sampler.sample().await.unwrap();

        assert_eq!(again.system.metric(metric::CPU_PERCENT), 5.0);
        assert!(again.timestamp > first.timestamp);
        assert!(third.timestamp > again.timestamp);
        assert_eq!(again.processes[0].timestamp, again.timestamp);
    }

    #[tokio::test]
    async fn test_repeat_uses_script_interval() {
        let sampler = ScriptedSampler::new(vec![batch(0, 1.0), batch(3, 2.0)]).repeat_last();

        sampler.sample().await.unwrap();
        let last = sampler.sample().await.unwrap();
        let repeated = sampler.sample().await.unwrap();

        assert_eq!(repeated.timestamp - last.timestamp, chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_empty_repeating_script_fails() {
        let sampler = ScriptedSampler::new(vec![]).repeat_last();
        assert!(sampler.sample().await.is_err());
    }

    #[tokio::test]
    async fn test_load_script_from_json() {
        let file = NamedTempFile::new().unwrap();
        let batches = vec![batch(0, 1.0), batch(3, 4.0)];
        std::fs::write(file.path(), serde_json::to_string(&batches).unwrap()).unwrap();

        let sampler = ScriptedSampler::from_json_file(file.path()).unwrap();
        assert_eq!(sampler.remaining(), 2);

        let first = sampler.sample().await.unwrap();
        assert_eq!(first.processes[0].entity, EntityId::process(10, 1));
        assert_eq!(first.processes[0].name, "worker");
    }

    #[test]
    fn test_load_malformed_script_fails() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{not json").unwrap();

        assert!(matches!(
            ScriptedSampler::from_json_file(file.path()),
            Err(AgentError::Serialization(_))
        ));
    }
}
