//! Local pipeline session
//!
//! The CLI runs the whole pipeline in-process: configuration, sampler, model
//! and controller are set up once per invocation.

use agent_lib::{
    config::AgentConfig,
    controller::{Controller, ControllerBuilder},
    sampler::create_sampler,
    scorer::Scorer,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::output::{print_warning, OutputFormat};

pub struct Session {
    pub config: AgentConfig,
    pub controller: Arc<Controller>,
}

impl Session {
    pub async fn start(
        config_path: Option<&Path>,
        replay: Option<&Path>,
        format: OutputFormat,
    ) -> Result<Self> {
        let config = AgentConfig::load(config_path)?;
        let features = config.feature_builder();

        let scorer = match Scorer::load(&config.model_path, &features) {
            Ok(scorer) => scorer,
            Err(e) if e.is_fatal_config() => {
                return Err(e).with_context(|| {
                    format!(
                        "Model {} does not fit the feature layout",
                        config.model_path.display()
                    )
                });
            }
            Err(e) => {
                warn!(path = %config.model_path.display(), error = %e, "Model not loaded");
                if format == OutputFormat::Table {
                    print_warning(&format!("Detection unavailable: {}", e));
                }
                Scorer::unavailable(e.to_string())
            }
        };

        let sampler = create_sampler(replay).context("Failed to create sampler")?;
        let controller = ControllerBuilder::from_config(&config, sampler, Arc::new(scorer))
            .build()
            .await;

        Ok(Self { config, controller })
    }

    /// Run `count` sampling passes one interval apart. Failed passes are
    /// reported and skipped.
    pub async fn warm_up(&self, count: usize, format: OutputFormat) -> usize {
        let mut ok = 0;
        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(self.config.sample_interval()).await;
            }
            match self.controller.refresh().await {
                Ok(_) => ok += 1,
                Err(e) => {
                    if format == OutputFormat::Table {
                        print_warning(&format!("Sampling pass skipped: {}", e));
                    }
                }
            }
        }
        ok
    }
}
