//! Loads the controller's configuration from environment variables (prefix `AUTOSCALER_`)
//! and an optional file, validates it, and supports atomic hot-reload.
//!
//! Grounded on `agent/src/config.rs`'s `AgentConfig::load`, generalized from a single
//! `config::Environment` source with serde defaults into a validated, reloadable snapshot:
//! `load()` fails fast, `reload()` only swaps in a new snapshot if it validates, otherwise the
//! previous one stays active, per the hot-reload rule.

use crate::error::{ControllerError, Result};
use crate::types::{AutopilotLevel, Priority};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

fn default_check_interval_secs() -> u64 {
    60
}
fn default_target_node_utilization_percent() -> u32 {
    70
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_autopilot_level() -> AutopilotLevelConfig {
    AutopilotLevelConfig::Disabled
}
fn default_prescale_threshold() -> f32 {
    0.75
}
fn default_prescale_min_confidence() -> f32 {
    0.65
}
fn default_prescale_rollback_minutes() -> u32 {
    60
}
fn default_prescale_cooldown_minutes() -> u32 {
    30
}
fn default_prediction_min_accuracy() -> f32 {
    0.85
}
fn default_prediction_min_samples() -> u64 {
    20
}
fn default_metrics_endpoint() -> String {
    "http://prometheus:9090".to_string()
}
fn default_startup_filter_minutes() -> u32 {
    2
}
fn default_priority() -> String {
    "medium".to_string()
}

/// Mirrors [`AutopilotLevel`] with a serde-friendly, lowercase wire form distinct from the
/// internal enum so config parsing stays decoupled from the runtime type's derive attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotLevelConfig {
    Disabled,
    Observe,
    Recommend,
    Autopilot,
}

impl From<AutopilotLevelConfig> for AutopilotLevel {
    fn from(v: AutopilotLevelConfig) -> Self {
        match v {
            AutopilotLevelConfig::Disabled => AutopilotLevel::Disabled,
            AutopilotLevelConfig::Observe => AutopilotLevel::Observe,
            AutopilotLevelConfig::Recommend => AutopilotLevel::Recommend,
            AutopilotLevelConfig::Autopilot => AutopilotLevel::Autopilot,
        }
    }
}

/// Auth scheme for talking to the metrics store, as it appears in config sources. Converts
/// into [`crate::metrics_client::MetricsAuth`] for the client itself; kept as a separate,
/// serde-friendly type so the wire config shape doesn't have to track the client's internal
/// `Bearer`/`Headers` representations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MetricsAuthConfig {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    Header { name: String, value: String },
}

impl Default for MetricsAuthConfig {
    fn default() -> Self {
        MetricsAuthConfig::None
    }
}

impl From<MetricsAuthConfig> for crate::metrics_client::MetricsAuth {
    fn from(v: MetricsAuthConfig) -> Self {
        use crate::metrics_client::MetricsAuth;
        match v {
            MetricsAuthConfig::None => MetricsAuth::None,
            MetricsAuthConfig::Basic { username, password } => MetricsAuth::Basic { username, password },
            MetricsAuthConfig::Bearer { token } => MetricsAuth::Bearer(token),
            MetricsAuthConfig::Header { name, value } => MetricsAuth::Headers(vec![(name, value)]),
        }
    }
}

/// One statically configured workload, as named in the per-workload knob list.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    pub namespace: String,
    pub name: String,
    pub hpa_name: String,
    #[serde(default = "default_startup_filter_minutes")]
    pub startup_filter_minutes: u32,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub autopilot_enabled: Option<bool>,
}

/// Full, validated configuration snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_target_node_utilization_percent")]
    pub target_node_utilization_percent: u32,

    #[serde(default = "default_true")]
    pub enable_predictive: bool,
    #[serde(default = "default_true")]
    pub enable_prescale: bool,
    #[serde(default = "default_false")]
    pub enable_autopilot: bool,
    #[serde(default = "default_true")]
    pub enable_auto_discovery: bool,

    #[serde(default = "default_autopilot_level")]
    pub autopilot_level: AutopilotLevelConfig,

    #[serde(default = "default_prescale_threshold")]
    pub prescale_threshold: f32,
    #[serde(default = "default_prescale_min_confidence")]
    pub prescale_min_confidence: f32,
    #[serde(default = "default_prescale_rollback_minutes")]
    pub prescale_rollback_minutes: u32,
    #[serde(default = "default_prescale_cooldown_minutes")]
    pub prescale_cooldown_minutes: u32,

    #[serde(default = "default_prediction_min_accuracy")]
    pub prediction_min_accuracy: f32,
    #[serde(default = "default_prediction_min_samples")]
    pub prediction_min_samples: u64,

    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,
    #[serde(default)]
    pub metrics_tenant_id: Option<String>,
    #[serde(default)]
    pub metrics_auth: MetricsAuthConfig,

    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

impl Config {
    /// Loads from `AUTOSCALER_*` env vars layered over an optional file, then validates.
    /// Fails fast: any source or validation error is returned as `InvalidConfig`.
    pub fn load(file_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file_path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUTOSCALER")
                .separator("_")
                .try_parsing(true)
                .list_separator(","),
        );

        let built = builder
            .build()
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        let config: Config = built
            .try_deserialize()
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Re-reads configuration and validates it. Returns the new snapshot without installing
    /// it anywhere; callers swap it into an `ArcSwap`/`RwLock` only on `Ok`, keeping the
    /// previous snapshot active on `Err`.
    pub fn reload(file_path: Option<&Path>) -> Result<Self> {
        Self::load(file_path)
    }

    fn validate(&self) -> Result<()> {
        if !(10..=3600).contains(&self.check_interval_secs) {
            return Err(ControllerError::InvalidConfig(format!(
                "check_interval_secs must be in 10..=3600, got {}",
                self.check_interval_secs
            )));
        }
        if !(10..=95).contains(&self.target_node_utilization_percent) {
            return Err(ControllerError::InvalidConfig(format!(
                "target_node_utilization_percent must be in 10..=95, got {}",
                self.target_node_utilization_percent
            )));
        }
        if !(0.0..=1.0).contains(&self.prescale_min_confidence) {
            return Err(ControllerError::InvalidConfig(
                "prescale_min_confidence must be in 0.0..=1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prediction_min_accuracy) {
            return Err(ControllerError::InvalidConfig(
                "prediction_min_accuracy must be in 0.0..=1.0".into(),
            ));
        }
        for w in &self.workloads {
            if w.startup_filter_minutes > 60 {
                return Err(ControllerError::InvalidConfig(format!(
                    "startup_filter_minutes must be in 0..=60 for {}/{}, got {}",
                    w.namespace, w.name, w.startup_filter_minutes
                )));
            }
            if Priority::parse(&w.priority).is_none() {
                return Err(ControllerError::InvalidConfig(format!(
                    "unknown priority '{}' for {}/{}",
                    w.priority, w.namespace, w.name
                )));
            }
        }
        if url::Url::parse(&self.metrics_endpoint).is_err() {
            return Err(ControllerError::InvalidConfig(format!(
                "metrics_endpoint is not a valid URL: {}",
                self.metrics_endpoint
            )));
        }
        Ok(())
    }
}

/// Watches the config file for changes and calls `reload()` on every event, handing the
/// validated snapshot to `on_reload`. A failed reload is logged and the watcher keeps running
/// with the previous snapshot untouched.
///
/// A `RecommendedWatcher` forwarding raw filesystem events into a channel, drained by a spawned
/// task.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn start<F>(file_path: PathBuf, on_reload: F) -> Result<Self>
    where
        F: Fn(Arc<Config>) + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to create config watcher: {e}")))?;

        watcher
            .watch(&file_path, RecursiveMode::NonRecursive)
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to watch {}: {e}", file_path.display())))?;

        std::thread::spawn(move || {
            while rx.recv().is_ok() {
                match Config::reload(Some(&file_path)) {
                    Ok(config) => {
                        info!(path = %file_path.display(), "config reloaded");
                        on_reload(Arc::new(config));
                    }
                    Err(e) => warn!(error = %e, "config reload rejected, keeping previous snapshot"),
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("AUTOSCALER_") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn loads_defaults_with_no_sources() {
        clear_env();
        let config = Config::load(None).expect("defaults alone must validate");
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.target_node_utilization_percent, 70);
        assert!(config.enable_predictive);
        assert!(!config.enable_autopilot);
    }

    #[test]
    fn env_override_takes_effect() {
        clear_env();
        std::env::set_var("AUTOSCALER_CHECK_INTERVAL_SECS", "120");
        std::env::set_var("AUTOSCALER_ENABLE_AUTOPILOT", "true");
        let config = Config::load(None).expect("valid override");
        assert_eq!(config.check_interval_secs, 120);
        assert!(config.enable_autopilot);
        clear_env();
    }

    #[test]
    fn rejects_out_of_range_check_interval() {
        clear_env();
        std::env::set_var("AUTOSCALER_CHECK_INTERVAL_SECS", "5");
        let err = Config::load(None).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        clear_env();
    }

    #[test]
    fn rejects_invalid_metrics_endpoint() {
        clear_env();
        std::env::set_var("AUTOSCALER_METRICS_ENDPOINT", "not a url");
        let err = Config::load(None).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        clear_env();
    }

    #[test]
    fn reload_is_independent_of_previous_snapshot() {
        clear_env();
        let first = Config::load(None).unwrap();
        std::env::set_var("AUTOSCALER_TARGET_NODE_UTILIZATION_PERCENT", "80");
        let second = Config::reload(None).unwrap();
        assert_eq!(first.target_node_utilization_percent, 70);
        assert_eq!(second.target_node_utilization_percent, 80);
        clear_env();
    }
}
