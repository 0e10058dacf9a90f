//! smart-autoscaler controller: runs the control loop against a Kubernetes cluster, serving
//! health/metrics/debug HTTP on the side.
//!
//! Grounded on `agent/src/main.rs`'s startup shape (tracing init, health registry, metrics,
//! structured logger, spawn the API server, wait on ctrl_c) generalized from a single
//! collection loop to: bootstrap config, core config (with optional hot-reload watcher),
//! Kubernetes client, metrics client, TSS, and the five control-loop collaborators, wiring them
//! into both the control loop's `run()`/`run_ancillary_sweep()` tasks and the debug API.

use anyhow::Result;
use autoscaler_core::arbiter::PriorityArbiter;
use autoscaler_core::autopilot::AutopilotManager;
use autoscaler_core::config::MetricsAuthConfig;
use autoscaler_core::control_loop::{ControlLoop, ControlLoopConfig};
use autoscaler_core::discovery::{Discovery, DiscoveryConfig, StaticWorkloadSpec};
use autoscaler_core::health::{components, HealthRegistry};
use autoscaler_core::metrics_client::{DefaultMetricsClient, KubernetesBackend, MetricsClient, MetricsClientConfig};
use autoscaler_core::notifier::{NotificationSink, Notifier, NullSink};
use autoscaler_core::observability::{AgentMetrics, StructuredLogger};
use autoscaler_core::prescale::{PreScaleConfig, PreScaleManager};
use autoscaler_core::tss::TimeSeriesStore;
use autoscaler_core::types::Priority;
use autoscaler_core::validator::{Validator, ValidatorConfig};
use autoscaler_core::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::ControllerBootstrap;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn discovery_config(cfg: &Config) -> DiscoveryConfig {
    let static_workloads = cfg
        .workloads
        .iter()
        .map(|w| StaticWorkloadSpec {
            namespace: w.namespace.clone(),
            name: w.name.clone(),
            hpa_name: w.hpa_name.clone(),
            priority: Priority::parse(&w.priority).unwrap_or(Priority::Medium),
            startup_filter_minutes: w.startup_filter_minutes,
            autopilot_enabled: w.autopilot_enabled,
        })
        .collect();

    DiscoveryConfig {
        static_workloads,
        auto_discovery_enabled: cfg.enable_auto_discovery,
        default_priority: Priority::Medium,
        default_startup_filter_minutes: 2,
    }
}

fn control_loop_config(cfg: &Config) -> ControlLoopConfig {
    ControlLoopConfig {
        check_interval: Duration::from_secs(cfg.check_interval_secs),
        jitter: Duration::from_millis(500),
        target_node_utilization_percent: cfg.target_node_utilization_percent,
        enable_predictive: cfg.enable_predictive,
        enable_prescale: cfg.enable_prescale,
        enable_autopilot: cfg.enable_autopilot,
        autopilot_level: cfg.autopilot_level.into(),
        default_startup_filter_minutes: 2,
    }
}

fn prescale_config(cfg: &Config) -> PreScaleConfig {
    PreScaleConfig {
        threshold_fraction: cfg.prescale_threshold as f64,
        min_confidence: cfg.prescale_min_confidence,
        rollback_minutes: cfg.prescale_rollback_minutes as i64,
        cooldown_minutes: cfg.prescale_cooldown_minutes,
    }
}

fn validator_config(cfg: &Config) -> ValidatorConfig {
    ValidatorConfig {
        min_accuracy: cfg.prediction_min_accuracy as f64,
        min_samples: cfg.prediction_min_samples as usize,
    }
}

fn metrics_client_config(cfg: &Config) -> MetricsClientConfig {
    let auth: MetricsAuthConfig = cfg.metrics_auth.clone();
    MetricsClientConfig {
        metrics_endpoint: cfg.metrics_endpoint.clone(),
        tenant_id: cfg.metrics_tenant_id.clone(),
        auth: auth.into(),
        metrics_qps: 10.0,
        kubernetes_qps: 20.0,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("starting smart-autoscaler controller");

    let bootstrap = ControllerBootstrap::load()?;
    let core_config = Config::load(bootstrap.config_file.as_deref().map(Path::new))?;
    info!(node_name = %bootstrap.node_name, api_port = bootstrap.api_port, "controller configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_CLIENT).await;
    health_registry.register(components::TSS).await;
    health_registry.register(components::DISCOVERY).await;
    health_registry.register(components::CONTROL_LOOP).await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&bootstrap.node_name);
    logger.log_startup(CONTROLLER_VERSION);

    let kube_client = kube::Client::try_default().await?;
    let kube_backend = KubernetesBackend::new(kube_client);
    let metrics_client: Arc<dyn MetricsClient> =
        Arc::new(DefaultMetricsClient::new(metrics_client_config(&core_config), kube_backend)?);

    let tss = Arc::new(TimeSeriesStore::open(Path::new(&bootstrap.tss_path)));
    let discovery = Arc::new(Discovery::new());
    let validator = Arc::new(Validator::with_config(tss.clone(), validator_config(&core_config)));
    let arbiter = Arc::new(PriorityArbiter::new());
    let prescale = Arc::new(PreScaleManager::new(prescale_config(&core_config)));
    let autopilot = Arc::new(AutopilotManager::new());
    let notifier = Arc::new(Notifier::new(Box::new(NullSink) as Box<dyn NotificationSink>));

    let control_loop = Arc::new(ControlLoop::new(
        metrics_client.clone(),
        tss.clone(),
        discovery.clone(),
        validator,
        arbiter,
        prescale.clone(),
        autopilot.clone(),
        notifier.clone(),
        control_loop_config(&core_config),
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let loop_handle = {
        let control_loop = control_loop.clone();
        let disc_cfg = discovery_config(&core_config);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { control_loop.run(disc_cfg, shutdown_rx).await })
    };

    let sweep_handle = {
        let control_loop = control_loop.clone();
        let discovery = discovery.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        let workloads: Vec<_> = discovery.list().into_iter().map(|w| w.id).collect();
                        control_loop.run_ancillary_sweep(now, &workloads).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    };

    let _config_watcher = match bootstrap.config_file.clone() {
        Some(path) => {
            let reload_notifier = notifier.clone();
            let path_buf = std::path::PathBuf::from(path);
            match autoscaler_core::ConfigWatcher::start(path_buf, move |_new_config| {
                warn!("config file changed; restart the controller to pick up new control-loop knobs");
                let reload_notifier = reload_notifier.clone();
                tokio::spawn(async move {
                    let now = chrono::Utc::now().timestamp();
                    reload_notifier
                        .notify(Notifier::config_reloaded(now, "restart required to apply new control-loop knobs".to_string()))
                        .await;
                });
            }) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "failed to start config watcher, continuing without hot-reload");
                    None
                }
            }
        }
        None => None,
    };

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        discovery,
        tss,
        prescale,
        autopilot,
        notifier,
        client: metrics_client,
    });

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(bootstrap.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("shutting down");

    let _ = shutdown_tx.send(());
    loop_handle.abort();
    sweep_handle.abort();
    api_handle.abort();

    Ok(())
}
