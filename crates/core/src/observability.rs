//! Observability infrastructure for the controller.
//!
//! Provides:
//! - Prometheus metrics (tick duration, patches issued, circuit-breaker state, prediction accuracy)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for tick-duration measurements (in seconds)
const TICK_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    tick_duration_seconds: Histogram,
    ticks_skipped_total: IntCounter,
    workloads_watched: IntGauge,
    hpa_patches_total: IntCounter,
    prescale_activations_in_flight: IntGauge,
    prescale_rollbacks_total: IntCounter,
    autopilot_applies_in_flight: IntGauge,
    autopilot_rollbacks_total: IntCounter,
    circuit_breaker_state: IntGaugeVec,
    prediction_accuracy: GaugeVec,
    predictions_generated_total: IntCounterVec,
    anomalies_detected_total: IntCounter,
    collection_errors_total: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "smart_autoscaler_tick_duration_seconds",
                "Time spent running one control loop tick",
                TICK_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            ticks_skipped_total: register_int_counter!(
                "smart_autoscaler_ticks_skipped_total",
                "Total number of ticks skipped because the previous tick was still running"
            )
            .expect("Failed to register ticks_skipped_total"),

            workloads_watched: register_int_gauge!(
                "smart_autoscaler_workloads_watched",
                "Number of workloads currently discovered"
            )
            .expect("Failed to register workloads_watched"),

            hpa_patches_total: register_int_counter!(
                "smart_autoscaler_hpa_patches_total",
                "Total number of HPA target patches issued"
            )
            .expect("Failed to register hpa_patches_total"),

            prescale_activations_in_flight: register_int_gauge!(
                "smart_autoscaler_prescale_activations_in_flight",
                "Number of workloads currently under an active pre-scale override"
            )
            .expect("Failed to register prescale_activations_in_flight"),

            prescale_rollbacks_total: register_int_counter!(
                "smart_autoscaler_prescale_rollbacks_total",
                "Total number of pre-scale overrides rolled back"
            )
            .expect("Failed to register prescale_rollbacks_total"),

            autopilot_applies_in_flight: register_int_gauge!(
                "smart_autoscaler_autopilot_applies_in_flight",
                "Number of workloads currently under an active autopilot monitor"
            )
            .expect("Failed to register autopilot_applies_in_flight"),

            autopilot_rollbacks_total: register_int_counter!(
                "smart_autoscaler_autopilot_rollbacks_total",
                "Total number of autopilot resource changes rolled back"
            )
            .expect("Failed to register autopilot_rollbacks_total"),

            circuit_breaker_state: register_int_gauge_vec!(
                "smart_autoscaler_circuit_breaker_state",
                "Circuit breaker state per outbound target (0=closed, 1=half_open, 2=open)",
                &["target"]
            )
            .expect("Failed to register circuit_breaker_state"),

            prediction_accuracy: register_gauge_vec!(
                "smart_autoscaler_prediction_accuracy",
                "Rolling prediction accuracy rate per forecaster model",
                &["model"]
            )
            .expect("Failed to register prediction_accuracy"),

            predictions_generated_total: register_int_counter_vec!(
                "smart_autoscaler_predictions_generated_total",
                "Total number of predictions generated, per forecaster model",
                &["model"]
            )
            .expect("Failed to register predictions_generated_total"),

            anomalies_detected_total: register_int_counter!(
                "smart_autoscaler_anomalies_detected_total",
                "Total number of anomalies detected"
            )
            .expect("Failed to register anomalies_detected_total"),

            collection_errors_total: register_int_counter!(
                "smart_autoscaler_collection_errors_total",
                "Total number of metrics/Kubernetes collection errors"
            )
            .expect("Failed to register collection_errors_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition.
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn inc_ticks_skipped(&self) {
        self.inner().ticks_skipped_total.inc();
    }

    pub fn set_workloads_watched(&self, count: i64) {
        self.inner().workloads_watched.set(count);
    }

    pub fn inc_hpa_patches(&self) {
        self.inner().hpa_patches_total.inc();
    }

    pub fn set_prescale_activations_in_flight(&self, count: i64) {
        self.inner().prescale_activations_in_flight.set(count);
    }

    pub fn inc_prescale_rollbacks(&self) {
        self.inner().prescale_rollbacks_total.inc();
    }

    pub fn set_autopilot_applies_in_flight(&self, count: i64) {
        self.inner().autopilot_applies_in_flight.set(count);
    }

    pub fn inc_autopilot_rollbacks(&self) {
        self.inner().autopilot_rollbacks_total.inc();
    }

    /// `state` is one of `closed`, `half_open`, `open`.
    pub fn set_circuit_breaker_state(&self, target: &str, state: &str) {
        let value = match state {
            "closed" => 0,
            "half_open" => 1,
            "open" => 2,
            _ => -1,
        };
        self.inner().circuit_breaker_state.with_label_values(&[target]).set(value);
    }

    pub fn set_prediction_accuracy(&self, model: &str, accuracy: f64) {
        self.inner().prediction_accuracy.with_label_values(&[model]).set(accuracy);
    }

    pub fn inc_predictions_generated(&self, model: &str) {
        self.inner().predictions_generated_total.with_label_values(&[model]).inc();
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected_total.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors_total.inc();
    }
}

/// Structured logger for controller events.
///
/// Provides consistent JSON-formatted logging for tick lifecycle, decisions,
/// patches, degraded transitions, rollbacks, and error classification.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self { node_name: node_name.into() }
    }

    pub fn log_tick_start(&self, tick_id: i64, workloads_watched: usize) {
        info!(
            event = "tick_start",
            node = %self.node_name,
            tick_id = tick_id,
            workloads_watched = workloads_watched,
            "Control loop tick started"
        );
    }

    pub fn log_tick_end(&self, tick_id: i64, duration_ms: u128, skipped: bool) {
        info!(
            event = "tick_end",
            node = %self.node_name,
            tick_id = tick_id,
            duration_ms = duration_ms as u64,
            skipped = skipped,
            "Control loop tick finished"
        );
    }

    pub fn log_decision(&self, namespace: &str, name: &str, decision: &str, detail: &str) {
        info!(
            event = "decision",
            node = %self.node_name,
            namespace = %namespace,
            name = %name,
            decision = %decision,
            detail = %detail,
            "Control loop decision recorded"
        );
    }

    pub fn log_hpa_patch(&self, namespace: &str, name: &str, field: &str, old_value: u32, new_value: u32) {
        info!(
            event = "hpa_patch",
            node = %self.node_name,
            namespace = %namespace,
            name = %name,
            field = %field,
            old_value = old_value,
            new_value = new_value,
            "HPA field patched"
        );
    }

    pub fn log_degraded_transition(&self, target: &str, entering: bool, reason: &str) {
        warn!(
            event = "degraded_transition",
            node = %self.node_name,
            target = %target,
            entering_degraded = entering,
            reason = %reason,
            "Degraded mode transition"
        );
    }

    pub fn log_rollback(&self, namespace: &str, name: &str, subsystem: &str, reason: &str) {
        warn!(
            event = "rollback",
            node = %self.node_name,
            namespace = %namespace,
            name = %name,
            subsystem = %subsystem,
            reason = %reason,
            "Override rolled back"
        );
    }

    pub fn log_anomaly(&self, namespace: &str, name: &str, kind: &str, severity: &str, details: &str) {
        match severity {
            "critical" => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    namespace = %namespace,
                    name = %name,
                    kind = %kind,
                    severity = %severity,
                    details = %details,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    namespace = %namespace,
                    name = %name,
                    kind = %kind,
                    severity = %severity,
                    details = %details,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Logs an error already classified into a `ControllerError` kind, per the rule that no
    /// raw library error is allowed to escape unclassified.
    pub fn log_error_classification(&self, target: &str, kind: &str, message: &str) {
        warn!(
            event = "error_classified",
            node = %self.node_name,
            target = %target,
            kind = %kind,
            message = %message,
            "Classified error"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            controller_version = %version,
            "Smart autoscaler controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Smart autoscaler controller shutting down"
        );
    }

    pub fn log_config_reload(&self, success: bool, detail: &str) {
        if success {
            info!(
                event = "config_reloaded",
                node = %self.node_name,
                detail = %detail,
                "Configuration reloaded"
            );
        } else {
            warn!(
                event = "config_reload_failed",
                node = %self.node_name,
                detail = %detail,
                "Configuration reload rejected, keeping previous snapshot"
            );
        }
    }
}
