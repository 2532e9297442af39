//! Live host sampler backed by `sysinfo`
//!
//! One `System` is kept across cycles so CPU percentages and per-process I/O
//! are measured as deltas between consecutive refreshes. The first cycle after
//! start therefore reports 0% CPU for every process.
//!
//! On Linux `sysinfo` also lists every thread as a task of its own; those
//! entries are dropped so each entity is a thread-group leader.

use super::{async_trait, Sampler};
use crate::error::{AgentError, Result};
use crate::models::{metric, EntityId, Sample, SampleBatch};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use sysinfo::{Process, ProcessStatus, System};
use tracing::{debug, trace};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples the local host through `sysinfo`
pub struct HostSampler {
    system: Arc<Mutex<System>>,
}

impl HostSampler {
    pub fn new() -> Result<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(AgentError::Collection(
                "process telemetry is not supported on this platform".to_string(),
            ));
        }

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();

        Ok(Self {
            system: Arc::new(Mutex::new(system)),
        })
    }
}

#[async_trait]
impl Sampler for HostSampler {
    async fn sample(&self) -> Result<SampleBatch> {
        let system = Arc::clone(&self.system);

        // sysinfo reads procfs synchronously
        tokio::task::spawn_blocking(move || {
            let mut guard = system
                .lock()
                .map_err(|e| AgentError::Collection(format!("sampler lock poisoned: {}", e)))?;
            read_cycle(&mut guard)
        })
        .await
        .map_err(|e| AgentError::Collection(format!("sampling task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "host"
    }
}

fn read_cycle(system: &mut System) -> Result<SampleBatch> {
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_processes();

    let total_memory = system.total_memory();
    if total_memory == 0 {
        return Err(AgentError::Collection(
            "could not read total memory".to_string(),
        ));
    }

    let timestamp = Utc::now();
    let mut processes = Vec::with_capacity(system.processes().len());
    let mut skipped = 0usize;
    let mut threads = 0usize;

    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            threads += 1;
            continue;
        }
        match process_sample(pid.as_u32(), process, total_memory, timestamp) {
            Some(sample) => processes.push(sample),
            None => skipped += 1,
        }
    }
    processes.sort_by_key(|s| s.entity);

    let io_read: f64 = processes.iter().map(|s| s.metric(metric::IO_READ_BYTES)).sum();
    let io_write: f64 = processes.iter().map(|s| s.metric(metric::IO_WRITE_BYTES)).sum();
    let cpu = system.global_cpu_info();
    let load = System::load_average();

    let system_sample = Sample::new(timestamp, EntityId::System, "system")
        .with_metric(metric::CPU_PERCENT, cpu.cpu_usage() as f64)
        .with_metric(
            metric::MEMORY_PERCENT,
            system.used_memory() as f64 / total_memory as f64 * 100.0,
        )
        .with_metric(metric::IO_READ_BYTES, io_read)
        .with_metric(metric::IO_WRITE_BYTES, io_write)
        .with_metric(metric::LOAD_AVG_1, load.one)
        .with_metric(metric::CPU_FREQ_MHZ, cpu.frequency() as f64)
        .with_metric(metric::PROCESS_COUNT, processes.len() as f64);

    debug!(
        processes = processes.len(),
        skipped = skipped,
        threads = threads,
        "Host sample collected"
    );

    Ok(SampleBatch {
        timestamp,
        system: system_sample,
        processes,
    })
}

/// Build a process sample, or `None` if the process is exiting or unreadable
fn process_sample(
    pid: u32,
    process: &Process,
    total_memory: u64,
    timestamp: chrono::DateTime<Utc>,
) -> Option<Sample> {
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        trace!(pid = pid, "Skipping exiting process");
        return None;
    }

    let name = process.name();
    if name.is_empty() {
        trace!(pid = pid, "Skipping process without a readable name");
        return None;
    }

    let memory = process.memory();
    let disk = process.disk_usage();

    Some(
        Sample::new(timestamp, EntityId::process(pid, process.start_time()), name)
            .with_metric(metric::CPU_PERCENT, process.cpu_usage() as f64)
            .with_metric(
                metric::MEMORY_PERCENT,
                memory as f64 / total_memory as f64 * 100.0,
            )
            .with_metric(metric::MEMORY_MB, memory as f64 / BYTES_PER_MB)
            .with_metric(metric::IO_READ_BYTES, disk.read_bytes as f64)
            .with_metric(metric::IO_WRITE_BYTES, disk.written_bytes as f64)
            .with_metric(metric::RUN_TIME_SECS, process.run_time() as f64),
    )
}
