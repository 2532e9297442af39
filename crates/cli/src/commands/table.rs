//! Process table command

use agent_lib::models::{metric, Sample};
use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::output::{
    color_cpu, format_bytes, format_percent, format_uptime, print_json, print_warning,
    render_table, OutputFormat,
};
use crate::session::Session;

/// Row for the process table
#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Mem")]
    memory_percent: String,
    #[tabled(rename = "RSS")]
    memory: String,
    #[tabled(rename = "Read")]
    read: String,
    #[tabled(rename = "Write")]
    write: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
}

impl From<&Sample> for ProcessRow {
    fn from(s: &Sample) -> Self {
        Self {
            pid: s.entity.pid().map(|p| p.to_string()).unwrap_or_default(),
            name: s.name.clone(),
            cpu: color_cpu(s.metric(metric::CPU_PERCENT)),
            memory_percent: format_percent(s.metric(metric::MEMORY_PERCENT)),
            memory: format_bytes((s.metric(metric::MEMORY_MB) * 1024.0 * 1024.0) as u64),
            read: format_bytes(s.metric(metric::IO_READ_BYTES) as u64),
            write: format_bytes(s.metric(metric::IO_WRITE_BYTES) as u64),
            uptime: format_uptime(s.metric(metric::RUN_TIME_SECS) as u64),
        }
    }
}

/// Sort by CPU, busiest first, ties by entity
pub fn sort_by_cpu(samples: &mut [Sample]) {
    samples.sort_by(|a, b| {
        b.metric(metric::CPU_PERCENT)
            .total_cmp(&a.metric(metric::CPU_PERCENT))
            .then_with(|| a.entity.cmp(&b.entity))
    });
}

/// Print the system overview line
pub fn print_overview(system: Option<&Sample>) {
    match system {
        Some(s) => println!(
            "{}  CPU {}  Mem {}  Load {:.2}  Freq {:.0} MHz  Processes {}",
            "System".bold(),
            color_cpu(s.metric(metric::CPU_PERCENT)),
            format_percent(s.metric(metric::MEMORY_PERCENT)),
            s.metric(metric::LOAD_AVG_1),
            s.metric(metric::CPU_FREQ_MHZ),
            s.metric(metric::PROCESS_COUNT) as u64,
        ),
        None => print_warning("No system sample yet"),
    }
}

/// Show the current process table
pub async fn show_table(session: &Session, limit: usize, format: OutputFormat) -> Result<()> {
    // CPU percentages are deltas, so take two passes one interval apart
    session.warm_up(2, format).await;

    let controller = &session.controller;
    let mut processes = controller.get_process_table().await;
    sort_by_cpu(&mut processes);
    let total = processes.len();
    processes.truncate(limit);

    match format {
        OutputFormat::Json => {
            let system = controller.system_overview().await;
            print_json(&serde_json::json!({
                "system": system,
                "processes": processes,
                "total_processes": total,
            }))?;
        }
        OutputFormat::Table => {
            print_overview(controller.system_overview().await.as_ref());
            println!();
            if processes.is_empty() {
                print_warning("No processes sampled");
                return Ok(());
            }
            let rows: Vec<ProcessRow> = processes.iter().map(ProcessRow::from).collect();
            println!("{}", render_table(rows));
            println!("\nShowing {} of {} processes", processes.len(), total);
        }
    }

    Ok(())
}
