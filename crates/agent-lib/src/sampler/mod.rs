//! Telemetry sampling
//!
//! A sampler produces one [`SampleBatch`] per cycle: a system-wide sample and
//! one sample per live process. Process enumeration races against process
//! exit, so a process that cannot be read is left out of the batch instead of
//! failing the cycle. Only a failure of the OS query itself is an error.

mod host;
mod scripted;

#[cfg(test)]
mod tests;

pub use host::HostSampler;
pub use scripted::ScriptedSampler;

use crate::error::Result;
use crate::models::SampleBatch;
use std::path::Path;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Trait for telemetry sources
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Take one sample of the system and every readable process
    async fn sample(&self) -> Result<SampleBatch>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Create the live host sampler, or a replay sampler when a script is given
pub fn create_sampler(replay: Option<&Path>) -> Result<Arc<dyn Sampler>> {
    match replay {
        Some(path) => {
            tracing::info!(path = %path.display(), "Replaying recorded telemetry");
            Ok(Arc::new(ScriptedSampler::from_json_file(path)?))
        }
        None => {
            tracing::info!("Sampling live host telemetry");
            Ok(Arc::new(HostSampler::new()?))
        }
    }
}
