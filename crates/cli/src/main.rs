//! smart-autoscaler CLI
//!
//! A command-line tool for inspecting watched workloads and their pre-scale/autopilot state,
//! and for triggering manual rollbacks, against a running controller's debug API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{autopilot, predictions, prescale, workloads};

/// smart-autoscaler CLI
#[derive(Parser)]
#[command(name = "actl")]
#[command(author, version, about = "CLI for the smart-autoscaler controller", long_about = None)]
pub struct Cli {
    /// Controller API endpoint URL (can also be set via ACTL_API_URL env var)
    #[arg(long, env = "ACTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

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
    /// Get workloads, prediction history, or status
    #[command(subcommand)]
    Get(GetCommands),

    /// Manually roll back a pre-scale or autopilot change
    #[command(subcommand)]
    Rollback(RollbackCommands),
}

fn split_namespaced(arg: &str) -> (Option<&str>, &str) {
    match arg.split_once('/') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, arg),
    }
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// List currently watched workloads
    Workloads {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show a single workload's latest sample, pre-scale profile, and autopilot state
    Workload {
        /// Workload, as `namespace/name` or just `name`
        workload: String,

        /// Namespace, if not given as part of `workload`
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Show prediction history for a workload
    Predictions {
        /// Workload, as `namespace/name` or just `name`
        workload: String,

        /// Namespace, if not given as part of `workload`
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Show pre-scale status across all watched workloads
    PrescaleStatus,

    /// Show autopilot status across all watched workloads
    AutopilotStatus,
}

#[derive(Subcommand)]
pub enum RollbackCommands {
    /// Roll back an active pre-scale minReplicas override
    Prescale {
        /// Workload, as `namespace/name` or just `name`
        workload: String,

        /// Namespace, if not given as part of `workload`
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Roll back a pending autopilot resource-request change
    Autopilot {
        /// Workload, as `namespace/name` or just `name`
        workload: String,

        /// Namespace, if not given as part of `workload`
        #[arg(long)]
        namespace: Option<String>,
    },
}

fn resolve(workload: &str, namespace: Option<String>) -> Result<(String, String)> {
    let (embedded_namespace, name) = split_namespaced(workload);
    let namespace = namespace
        .or_else(|| embedded_namespace.map(str::to_string))
        .ok_or_else(|| anyhow::anyhow!("namespace required: pass --namespace or use namespace/name"))?;
    Ok((namespace, name.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Get(get_cmd) => match get_cmd {
            GetCommands::Workloads { namespace } => {
                workloads::list(&client, namespace, cli.format).await?;
            }
            GetCommands::Workload { workload, namespace } => {
                let (namespace, name) = resolve(&workload, namespace)?;
                workloads::get(&client, &namespace, &name, cli.format).await?;
            }
            GetCommands::Predictions { workload, namespace } => {
                let (namespace, name) = resolve(&workload, namespace)?;
                predictions::show(&client, &namespace, &name, cli.format).await?;
            }
            GetCommands::PrescaleStatus => {
                prescale::status(&client, cli.format).await?;
            }
            GetCommands::AutopilotStatus => {
                autopilot::status(&client, cli.format).await?;
            }
        },
        Commands::Rollback(rollback_cmd) => match rollback_cmd {
            RollbackCommands::Prescale { workload, namespace } => {
                let (namespace, name) = resolve(&workload, namespace)?;
                prescale::rollback(&client, &namespace, &name).await?;
            }
            RollbackCommands::Autopilot { workload, namespace } => {
                let (namespace, name) = resolve(&workload, namespace)?;
                autopilot::rollback(&client, &namespace, &name).await?;
            }
        },
    }

    Ok(())
}
