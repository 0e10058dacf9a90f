//! Binary-level bootstrap configuration: the knobs needed before
//! [`autoscaler_core::Config`] can even be loaded (API port, node identity, where the TSS
//! journal and config file live). The control-loop/pre-scale/autopilot knobs themselves are
//! `autoscaler_core::Config`'s responsibility.

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerBootstrap {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_tss_path")]
    pub tss_path: String,

    #[serde(default)]
    pub config_file: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_tss_path() -> String {
    "/var/lib/smart-autoscaler/tss.journal".to_string()
}

impl ControllerBootstrap {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CONTROLLER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ControllerBootstrap {
            node_name: default_node_name(),
            api_port: default_api_port(),
            tss_path: default_tss_path(),
            config_file: None,
        }))
    }
}
