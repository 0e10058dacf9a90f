//! Pre-scale status and rollback commands.

use anyhow::Result;
use autoscaler_core::types::PreScaleProfile;
use tabled::Tabled;

use crate::client::{ApiClient, RollbackOutcome};
use crate::output::{color_status, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct PreScaleRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Min (current)")]
    current_min: u32,
    #[tabled(rename = "Min (original)")]
    original_min: u32,
    #[tabled(rename = "Activations")]
    pre_scale_count: u64,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// List every workload's pre-scale profile.
pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let profiles: Vec<PreScaleProfile> = client.get("api/v1/prescale-status").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }
        OutputFormat::Table => {
            if profiles.is_empty() {
                print_warning("No pre-scale profiles tracked");
                return Ok(());
            }

            let rows: Vec<PreScaleRow> = profiles
                .into_iter()
                .map(|p| PreScaleRow {
                    namespace: p.workload.namespace,
                    name: p.workload.name,
                    state: color_status(&format!("{:?}", p.state).to_lowercase()),
                    current_min: p.current_min_replicas,
                    original_min: p.original_min_replicas,
                    pre_scale_count: p.pre_scale_count,
                    reason: p.reason,
                })
                .collect();

            let table = tabled::Table::new(rows).with(tabled::settings::Style::rounded()).to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Manually roll back a workload's pre-scale override.
pub async fn rollback(client: &ApiClient, namespace: &str, name: &str) -> Result<()> {
    let path = format!("api/v1/workloads/{}/{}/rollback/prescale", namespace, name);
    match client.post_rollback(&path).await? {
        RollbackOutcome::Accepted => {
            print_success(&format!("pre-scale rollback requested for {}/{}", namespace, name));
        }
        RollbackOutcome::NothingToRollBack => {
            print_warning(&format!("{}/{} has no active pre-scale override", namespace, name));
        }
        RollbackOutcome::WorkloadNotFound => {
            print_warning(&format!("{}/{} is not currently watched", namespace, name));
        }
    }
    Ok(())
}
