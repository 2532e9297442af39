//! Anomaly detection command

use agent_lib::error::AgentError;
use agent_lib::models::ClassificationResult;
use agent_lib::snapshot::reason;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{
    color_severity, print_info, print_json, print_success, print_warning, render_table,
    OutputFormat,
};
use crate::session::Session;

/// Row for the anomaly table
#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn rows(result: &ClassificationResult) -> Vec<AnomalyRow> {
    result
        .records
        .iter()
        .enumerate()
        .map(|(i, r)| AnomalyRow {
            rank: i + 1,
            pid: r
                .entity
                .pid()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            name: r.name.clone(),
            score: format!("{:.4}", r.score.value),
            severity: color_severity(r.severity),
            reason: if r.top_features.is_empty() {
                reason(r, result.threshold)
            } else {
                r.top_features.join(", ")
            },
        })
        .collect()
}

/// Print a classification result
pub fn print_result(result: &ClassificationResult, report: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "result": result,
            "report": report,
        })),
        OutputFormat::Table => {
            println!("{}", "Anomaly Detection".bold());
            println!("{}", "=".repeat(60));
            println!("Timestamp:   {}", result.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("Model:       {}", result.model_version.cyan());
            println!(
                "Threshold:   {:.4} ({})",
                result.threshold, result.threshold_policy
            );
            println!(
                "Entities:    {} scored, {} awaiting data",
                result.entities_considered, result.skipped_insufficient
            );
            println!();

            if result.is_clean() {
                print_success("No anomalies detected");
            } else {
                println!("{}", render_table(rows(result)));
                println!("\nTotal: {} anomalies", result.anomaly_count());
            }
            if let Some(path) = report {
                print_success(&format!("Report saved to {}", path.display()));
            }
            Ok(())
        }
    }
}

/// Sample, run one detection pass and optionally save a report
pub async fn run_detect(session: &Session, samples: usize, save: bool, format: OutputFormat) -> Result<()> {
    let taken = session.warm_up(samples, format).await;
    if format == OutputFormat::Table {
        print_info(&format!("Collected {} of {} sampling passes", taken, samples));
    }

    let controller = &session.controller;
    let result = match controller.detect_anomalies().await {
        Ok(result) => result,
        Err(e @ AgentError::InsufficientData { .. }) => {
            print_warning(&format!(
                "{}. Run more refresh cycles (e.g. --samples {}).",
                e,
                controller.feature_builder().min_samples()
            ));
            return Ok(());
        }
        Err(e) => return Err(e).context("Detection failed"),
    };

    let report = if save {
        Some(controller.save_snapshot(&result).await?)
    } else {
        None
    };

    print_result(&result, report.as_ref(), format)
}
