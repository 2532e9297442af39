//! Pipeline status command

use agent_lib::controller::Controller;
use agent_lib::health::{Component, ComponentHealth};
use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::output::{color_status, print_json, print_warning, render_table, OutputFormat};
use crate::session::Session;

/// Snapshot of the local pipeline
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: String,
    pub status: String,
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_unavailable_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_blocked: Option<String>,
    pub threshold_policy: String,
    pub min_samples: usize,
    pub tracked_entities: usize,
    pub tracked_processes: usize,
    pub buffered_samples: usize,
    pub report_dir: String,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl StatusReport {
    pub async fn collect(controller: &Controller) -> Self {
        let health = controller.health().await;
        let stats = controller.buffer().stats().await;
        let scorer = controller.scorer();

        Self {
            state: controller.state().to_string(),
            status: health.status.as_str().to_string(),
            detection_blocked: health.detection_blocker().map(str::to_string),
            model_version: scorer.model_version().map(str::to_string),
            model_unavailable_reason: scorer.unavailable_reason().map(str::to_string),
            threshold_policy: controller.threshold_policy().name(),
            min_samples: controller.feature_builder().min_samples(),
            tracked_entities: stats.tracked_entities,
            tracked_processes: stats.tracked_processes,
            buffered_samples: stats.total_samples,
            report_dir: controller.report_dir().display().to_string(),
            components: health.components,
        }
    }
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Message")]
    message: String,
}

/// Take one sample and report pipeline health
pub async fn show_status(session: &Session, metrics: bool, format: OutputFormat) -> Result<()> {
    let controller = &session.controller;
    if let Err(e) = controller.refresh().await {
        if format == OutputFormat::Table {
            print_warning(&format!("Sampling failed: {}", e));
        }
    }

    let report = StatusReport::collect(controller).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Pipeline Status".bold());
            println!("{}", "=".repeat(60));
            println!("Status:             {}", color_status(&report.status));
            println!("State:              {}", report.state);
            match &report.model_version {
                Some(version) => println!("Model:              {}", version.cyan()),
                None => println!(
                    "Model:              {} ({})",
                    color_status("unavailable"),
                    report.model_unavailable_reason.as_deref().unwrap_or("unknown")
                ),
            }
            if let Some(reason) = &report.detection_blocked {
                println!("Detection:          {}", reason.red());
            }
            println!("Threshold Policy:   {}", report.threshold_policy);
            println!("Min Samples:        {}", report.min_samples);
            println!(
                "Tracked:            {} entities ({} processes), {} samples",
                report.tracked_entities, report.tracked_processes, report.buffered_samples
            );
            println!("Report Dir:         {}", report.report_dir);
            println!();

            let rows: Vec<ComponentRow> = report
                .components
                .iter()
                .map(|(component, c)| ComponentRow {
                    name: component.to_string(),
                    status: color_status(c.status.as_str()),
                    since: c.since.format("%H:%M:%S").to_string(),
                    failures: c.consecutive_failures,
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            println!("{}", render_table(rows));
        }
    }

    if metrics {
        println!();
        print!("{}", controller.metrics().render());
    }

    Ok(())
}
