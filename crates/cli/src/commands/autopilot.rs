//! Autopilot status and rollback commands.

use anyhow::Result;
use autoscaler_core::types::AutopilotState;
use tabled::Tabled;

use crate::client::{ApiClient, RollbackOutcome};
use crate::output::{color_confidence, color_status, format_cpu, format_mib, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct AutopilotRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Learning state")]
    learning_state: String,
    #[tabled(rename = "Samples")]
    sample_count: u64,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Applied CPU")]
    applied_cpu: String,
    #[tabled(rename = "Applied Mem")]
    applied_memory: String,
}

/// List every workload's autopilot learning state.
pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let states: Vec<AutopilotState> = client.get("api/v1/autopilot-status").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        OutputFormat::Table => {
            if states.is_empty() {
                print_warning("No autopilot states tracked");
                return Ok(());
            }

            let rows: Vec<AutopilotRow> = states
                .into_iter()
                .map(|s| AutopilotRow {
                    namespace: s.workload.namespace,
                    name: s.workload.name,
                    learning_state: color_status(&format!("{:?}", s.learning_state).to_lowercase()),
                    sample_count: s.sample_count,
                    confidence: color_confidence(s.confidence),
                    applied_cpu: s.last_applied_cpu_millicores.map(format_cpu).unwrap_or_else(|| "-".to_string()),
                    applied_memory: s.last_applied_memory_mib.map(format_mib).unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            let table = tabled::Table::new(rows).with(tabled::settings::Style::rounded()).to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Manually roll back a workload's autopilot-applied resource requests.
pub async fn rollback(client: &ApiClient, namespace: &str, name: &str) -> Result<()> {
    let path = format!("api/v1/workloads/{}/{}/rollback/autopilot", namespace, name);
    match client.post_rollback(&path).await? {
        RollbackOutcome::Accepted => {
            print_success(&format!("autopilot rollback requested for {}/{}", namespace, name));
        }
        RollbackOutcome::NothingToRollBack => {
            print_warning(&format!("{}/{} has no pending autopilot change", namespace, name));
        }
        RollbackOutcome::WorkloadNotFound => {
            print_warning(&format!("{}/{} is not currently watched", namespace, name));
        }
    }
    Ok(())
}
