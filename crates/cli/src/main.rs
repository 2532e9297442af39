//! Host usage anomaly detector CLI
//!
//! Runs the sampling and detection pipeline in-process: show the process
//! table, run one-off or continuous anomaly detection, and inspect pipeline
//! health.

mod commands;
mod output;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, status, table, watch};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::output::print_error;
use crate::session::Session;

/// Host usage anomaly detector CLI
#[derive(Parser)]
#[command(name = "anomctl")]
#[command(author, version, about = "CLI for the Host Usage Anomaly Detector", long_about = None)]
pub struct Cli {
    /// Configuration file (can also be set via ANOMALY_CONFIG env var)
    #[arg(long, short, env = "ANOMALY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Replay recorded telemetry (JSON array of sample batches) instead of
    /// sampling the host
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the process table sorted by CPU usage
    Table {
        /// Maximum number of processes to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Sample the host and run one anomaly detection pass
    Detect {
        /// Sampling passes to take before detecting
        #[arg(long, short, default_value_t = 3)]
        samples: usize,

        /// Write an anomaly report to the report directory
        #[arg(long)]
        save: bool,
    },

    /// Sample continuously and detect periodically until interrupted
    Watch {
        /// Run detection every N sampling intervals
        #[arg(long, default_value_t = 10)]
        detect_every: u32,

        /// Write an anomaly report for every detection pass
        #[arg(long)]
        save: bool,
    },

    /// Show model, buffer and component health
    Status {
        /// Also print Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::start(cli.config.as_deref(), cli.replay.as_deref(), cli.format).await?;

    let result = match cli.command {
        Commands::Table { limit } => table::show_table(&session, limit, cli.format).await,
        Commands::Detect { samples, save } => {
            detect::run_detect(&session, samples, save, cli.format).await
        }
        Commands::Watch { detect_every, save } => {
            watch::run_watch(&session, detect_every, save, cli.format).await
        }
        Commands::Status { metrics } => status::show_status(&session, metrics, cli.format).await,
    };

    session.controller.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detect() {
        let cli = Cli::parse_from(["anomctl", "-f", "json", "detect", "--samples", "5", "--save"]);
        assert_eq!(cli.format, output::OutputFormat::Json);
        match cli.command {
            Commands::Detect { samples, save } => {
                assert_eq!(samples, 5);
                assert!(save);
            }
            _ => panic!("expected detect"),
        }
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["anomctl", "watch"]);
        assert_eq!(cli.format, output::OutputFormat::Table);
        assert!(cli.replay.is_none());
        match cli.command {
            Commands::Watch { detect_every, save } => {
                assert_eq!(detect_every, 10);
                assert!(!save);
            }
            _ => panic!("expected watch"),
        }
    }
}
