//! HTTP surface for health checks, Prometheus metrics, and the debug/operator API the CLI
//! talks to: the debug/operator HTTP surface.
//!
//! Grounded on `agent/src/api.rs`'s `AppState`/`create_router`/`serve` shape, kept for
//! `/healthz`, `/readyz`, `/metrics`, with a read-only workload/prediction/pre-scale/autopilot
//! surface and manual-rollback endpoints added underneath `/api/v1`.

use autoscaler_core::health::{ComponentStatus, HealthRegistry};
use autoscaler_core::metrics_client::MetricsClient;
use autoscaler_core::notifier::Notifier;
use autoscaler_core::observability::AgentMetrics;
use autoscaler_core::{AutopilotManager, Discovery, PreScaleManager, TimeSeriesStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub discovery: Arc<Discovery>,
    pub tss: Arc<TimeSeriesStore>,
    pub prescale: Arc<PreScaleManager>,
    pub autopilot: Arc<AutopilotManager>,
    pub notifier: Arc<Notifier>,
    pub client: Arc<dyn MetricsClient>,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    (StatusCode::OK, [("content-type", "text/plain; charset=utf-8")], buffer)
}

#[derive(Serialize)]
struct WorkloadSummary {
    namespace: String,
    name: String,
    hpa_name: String,
    priority: String,
}

async fn list_workloads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workloads: Vec<WorkloadSummary> = state
        .discovery
        .list()
        .into_iter()
        .map(|w| WorkloadSummary {
            namespace: w.id.namespace,
            name: w.id.name,
            hpa_name: w.id.hpa_name,
            priority: format!("{:?}", w.priority).to_lowercase(),
        })
        .collect();
    Json(workloads)
}

#[derive(Serialize)]
struct WorkloadDetail {
    latest_sample: Option<autoscaler_core::types::Sample>,
    recent_predictions: Vec<autoscaler_core::types::PredictionRecord>,
    prescale_profile: Option<autoscaler_core::types::PreScaleProfile>,
    autopilot_state: Option<autoscaler_core::types::AutopilotState>,
}

async fn get_workload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(workload) = state.discovery.list().into_iter().find(|w| w.id.namespace == namespace && w.id.name == name) else {
        return (StatusCode::NOT_FOUND, Json(None::<WorkloadDetail>));
    };
    let now = chrono::Utc::now().timestamp();
    let latest_sample = state.tss.read_samples(&workload.id, now - 3600, now).into_iter().last();
    let recent_predictions = state.tss.read_recent_predictions(&workload.id, 10);
    let prescale_profile = state.prescale.profile(&workload.id);
    let autopilot_state = state.autopilot.state(&workload.id);

    (
        StatusCode::OK,
        Json(Some(WorkloadDetail { latest_sample, recent_predictions, prescale_profile, autopilot_state })),
    )
}

async fn get_predictions(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(workload) = state.discovery.list().into_iter().find(|w| w.id.namespace == namespace && w.id.name == name) else {
        return (StatusCode::NOT_FOUND, Json(Vec::new()));
    };
    let predictions = state.tss.read_recent_predictions(&workload.id, 50);
    (StatusCode::OK, Json(predictions))
}

async fn list_prescale_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let profiles: Vec<_> = state.discovery.list().into_iter().filter_map(|w| state.prescale.profile(&w.id)).collect();
    Json(profiles)
}

async fn list_autopilot_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let states: Vec<_> = state.discovery.list().into_iter().filter_map(|w| state.autopilot.state(&w.id)).collect();
    Json(states)
}

async fn rollback_prescale(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(workload) = state.discovery.list().into_iter().find(|w| w.id.namespace == namespace && w.id.name == name) else {
        return StatusCode::NOT_FOUND;
    };
    let now = chrono::Utc::now().timestamp();
    match state.prescale.manual_rollback(&workload.id) {
        Some(action) => {
            if let Err(e) = state.client.patch_hpa_min(&workload.id, action.new_min).await {
                warn!(namespace = %namespace, name = %name, error = %e, "manual pre-scale rollback patch failed");
            }
            state.notifier.notify(Notifier::prescale_rolled_back(workload.id.clone(), now, action.new_min)).await;
            info!(namespace = %namespace, name = %name, "manual pre-scale rollback requested");
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

async fn rollback_autopilot(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(workload) = state.discovery.list().into_iter().find(|w| w.id.namespace == namespace && w.id.name == name) else {
        return StatusCode::NOT_FOUND;
    };
    let now = chrono::Utc::now().timestamp();
    match state.autopilot.manual_rollback(&workload.id, now) {
        Some(snapshot) => {
            if let Err(e) = state
                .client
                .patch_deployment_requests(&workload.id, snapshot.cpu_request_millicores, snapshot.memory_request_mib)
                .await
            {
                warn!(namespace = %namespace, name = %name, error = %e, "manual autopilot rollback patch failed");
            }
            state
                .notifier
                .notify(Notifier::autopilot_rolled_back(workload.id.clone(), now, "manual rollback".to_string()))
                .await;
            info!(namespace = %namespace, name = %name, "manual autopilot rollback requested");
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/workloads", get(list_workloads))
        .route("/api/v1/workloads/:namespace/:name", get(get_workload))
        .route("/api/v1/workloads/:namespace/:name/predictions", get(get_predictions))
        .route("/api/v1/prescale-status", get(list_prescale_status))
        .route("/api/v1/autopilot-status", get(list_autopilot_status))
        .route("/api/v1/workloads/:namespace/:name/rollback/prescale", post(rollback_prescale))
        .route("/api/v1/workloads/:namespace/:name/rollback/autopilot", post(rollback_autopilot))
        .with_state(state)
}

/// Start the API server.
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
