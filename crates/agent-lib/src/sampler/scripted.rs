//! Replay sampler
//!
//! Yields a fixed sequence of batches, one per call. Used to replay recorded
//! telemetry through the pipeline and to drive deterministic scenarios.

use super::{async_trait, Sampler};
use crate::error::{AgentError, Result};
use crate::models::SampleBatch;
use chrono::Duration;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Sampler that plays back a scripted list of batches
pub struct ScriptedSampler {
    pending: Mutex<VecDeque<SampleBatch>>,
    last: Mutex<Option<SampleBatch>>,
    repeat_last: bool,
    /// Spacing of repeated batches: the script's final interval
    step: Duration,
    calls: AtomicUsize,
}

impl ScriptedSampler {
    pub fn new(batches: Vec<SampleBatch>) -> Self {
        let step = match batches.as_slice() {
            [.., prev, last] if last.timestamp > prev.timestamp => last.timestamp - prev.timestamp,
            _ => Duration::seconds(1),
        };
        Self {
            pending: Mutex::new(batches.into()),
            last: Mutex::new(None),
            repeat_last: false,
            step,
            calls: AtomicUsize::new(0),
        }
    }

    /// Keep replaying the final batch once the script runs out, each repeat
    /// one script interval after the previous
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Load a script from a JSON array of batches
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let batches: Vec<SampleBatch> = serde_json::from_str(&content)?;
        Ok(Self::new(batches).repeat_last())
    }

    /// Number of `sample` calls served so far, failures included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batches not yet played
    pub fn remaining(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn sample(&self) -> Result<SampleBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self
            .pending
            .lock()
            .map_err(|e| AgentError::Collection(format!("script lock poisoned: {}", e)))?
            .pop_front();

        let mut last = self
            .last
            .lock()
            .map_err(|e| AgentError::Collection(format!("script lock poisoned: {}", e)))?;

        match next {
            Some(batch) => {
                *last = Some(batch.clone());
                Ok(batch)
            }
            None if self.repeat_last => match last.as_mut() {
                Some(batch) => {
                    let repeated = advance(batch.clone(), self.step);
                    *batch = repeated.clone();
                    Ok(repeated)
                }
                None => Err(AgentError::Collection("replay script is empty".to_string())),
            },
            None => Err(AgentError::Collection(
                "replay script exhausted".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn advance(mut batch: SampleBatch, step: Duration) -> SampleBatch {
    let ts = batch.timestamp + step;
    batch.timestamp = ts;
    batch.system.timestamp = ts;
    for sample in &mut batch.processes {
        sample.timestamp = ts;
    }
    batch
}
