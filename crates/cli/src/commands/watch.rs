//! Continuous sampling with periodic detection

use agent_lib::error::AgentError;
use anyhow::Result;
use colored::Colorize;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

use super::detect::print_result;
use crate::output::{print_error, print_info, OutputFormat};
use crate::session::Session;

/// Detection period for a watch session
pub fn detect_period(sample_interval: Duration, detect_every: u32) -> Duration {
    sample_interval * detect_every.max(1)
}

/// Keep sampling in the background and run a detection pass every
/// `detect_every` sampling intervals until interrupted.
pub async fn run_watch(session: &Session, detect_every: u32, save: bool, format: OutputFormat) -> Result<()> {
    let controller = &session.controller;
    let sample_interval = session.config.sample_interval();
    let period = detect_period(sample_interval, detect_every);

    if format == OutputFormat::Table {
        print_info(&format!(
            "Sampling every {:?}, detecting every {:?}. Press Ctrl+C to stop.",
            sample_interval, period
        ));
    }

    controller.start_auto_refresh(sample_interval).await;

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match controller.detect_anomalies().await {
                    Ok(result) => {
                        let report = if save {
                            match controller.save_snapshot(&result).await {
                                Ok(path) => Some(path),
                                Err(e) => {
                                    print_error(&format!("Failed to save report: {}", e));
                                    None
                                }
                            }
                        } else {
                            None
                        };
                        if format == OutputFormat::Table {
                            println!();
                        }
                        print_result(&result, report.as_ref(), format)?;
                    }
                    Err(e @ AgentError::InsufficientData { .. }) => {
                        if format == OutputFormat::Table {
                            print_info(&format!("Waiting for data: {}", e));
                        }
                    }
                    Err(e @ AgentError::ModelUnavailable(_)) => {
                        controller.stop_auto_refresh().await;
                        return Err(e.into());
                    }
                    Err(e) => {
                        warn!(error = %e, "Detection failed");
                        print_error(&format!("Detection failed: {}", e));
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for interrupt");
                }
                break;
            }
        }
    }

    controller.stop_auto_refresh().await;
    if format == OutputFormat::Table {
        println!("\n{}", "Stopped.".dimmed());
    }
    Ok(())
}
