//! Workload listing and detail commands.

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, WorkloadDetail, WorkloadSummary};
use crate::output::{color_confidence, format_cpu, format_timestamp, print_warning, OutputFormat};

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "HPA")]
    hpa_name: String,
    #[tabled(rename = "Priority")]
    priority: String,
}

/// List currently watched workloads.
pub async fn list(client: &ApiClient, namespace: Option<String>, format: OutputFormat) -> Result<()> {
    let result: Vec<WorkloadSummary> = client.get("api/v1/workloads").await?;

    let filtered: Vec<_> = result
        .into_iter()
        .filter(|w| namespace.as_ref().map(|ns| &w.namespace == ns).unwrap_or(true))
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        OutputFormat::Table => {
            if filtered.is_empty() {
                print_warning("No workloads found");
                return Ok(());
            }

            let count = filtered.len();
            let rows: Vec<WorkloadRow> = filtered
                .into_iter()
                .map(|w| WorkloadRow {
                    namespace: w.namespace,
                    name: w.name,
                    hpa_name: w.hpa_name,
                    priority: w.priority,
                })
                .collect();

            let table = tabled::Table::new(rows).with(tabled::settings::Style::rounded()).to_string();
            println!("{}", table);
            println!("\nTotal: {} workloads", count);
        }
    }

    Ok(())
}

/// Show a single workload's latest sample, prescale profile, and autopilot state.
pub async fn get(client: &ApiClient, namespace: &str, name: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/workloads/{}/{}", namespace, name);
    let detail: WorkloadDetail = client.get(&path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        OutputFormat::Table => {
            println!("{}", format!("Workload {}/{}", namespace, name).bold());
            println!("{}", "=".repeat(60));

            match &detail.latest_sample {
                Some(sample) => {
                    println!("Latest sample ({}):", format_timestamp(sample.timestamp));
                    println!("  CPU:      {}", format_cpu(sample.cpu_millicores as u32));
                    println!("  Replicas: {}", sample.replica_count);
                    println!("  HPA target: {}%", sample.hpa_target_percent);
                }
                None => println!("No samples recorded yet"),
            }

            println!();
            if let Some(profile) = &detail.prescale_profile {
                println!("Pre-scale: {:?}, min={}", profile.state, profile.current_min_replicas);
            } else {
                println!("Pre-scale: not tracked");
            }

            if let Some(autopilot) = &detail.autopilot_state {
                println!(
                    "Autopilot: {:?}, confidence={}",
                    autopilot.learning_state,
                    color_confidence(autopilot.confidence)
                );
            } else {
                println!("Autopilot: not tracked");
            }
        }
    }

    Ok(())
}
