//! Builds the structured outbound events: pre-scale activation/rollback,
//! autopilot apply/rollback, anomalies, and config reloads. Each event is rendered as both a
//! Kubernetes `Event` shape and an Alertmanager-webhook-shaped payload, then handed to an
//! injectable [`NotificationSink`] so the delivery transport can be swapped without touching
//! event construction.
//!
//! Grounded on `anomaly/alerter.rs`'s `Alerter`: the same dedup-window-keyed-by-identity
//! pattern, the same `KubernetesEvent`/`AlertmanagerAlert` shapes, generalized from
//! pod-scoped memory-leak/CPU-spike alerts to workload-scoped controller events.

use crate::types::WorkloadId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Event severity, mirroring Kubernetes `Event.type` (`Normal`/`Warning`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Normal => write!(f, "Normal"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// The kinds of event the controller emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PrescaleActivated,
    PrescaleRolledBack,
    AutopilotApplied,
    AutopilotRolledBack,
    Anomaly,
    ConfigReloaded,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::PrescaleActivated => "PrescaleActivated",
            EventKind::PrescaleRolledBack => "PrescaleRolledBack",
            EventKind::AutopilotApplied => "AutopilotApplied",
            EventKind::AutopilotRolledBack => "AutopilotRolledBack",
            EventKind::Anomaly => "Anomaly",
            EventKind::ConfigReloaded => "ConfigReloaded",
        };
        write!(f, "{s}")
    }
}

impl EventKind {
    fn default_severity(self) -> Severity {
        match self {
            EventKind::PrescaleActivated | EventKind::AutopilotApplied | EventKind::ConfigReloaded => Severity::Normal,
            EventKind::PrescaleRolledBack | EventKind::AutopilotRolledBack | EventKind::Anomaly => Severity::Warning,
        }
    }
}

/// A controller-level event, carrying the identity and detail needed to render either wire shape.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub workload: Option<WorkloadId>,
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesEvent {
    pub api_version: String,
    pub kind: String,
    pub metadata: EventMetadata,
    pub involved_object: ObjectReference,
    pub reason: String,
    pub message: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub count: u32,
    pub source: EventSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSource {
    pub component: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

impl NotificationEvent {
    pub fn to_kubernetes_event(&self, timestamp_rfc3339: &str) -> KubernetesEvent {
        let (namespace, name) = self
            .workload
            .as_ref()
            .map(|w| (w.namespace.clone(), w.name.clone()))
            .unwrap_or_else(|| ("default".to_string(), "controller".to_string()));

        KubernetesEvent {
            api_version: "v1".to_string(),
            kind: "Event".to_string(),
            metadata: EventMetadata {
                name: format!("{}.{}.{}", name, self.kind, self.timestamp),
                namespace: namespace.clone(),
            },
            involved_object: ObjectReference {
                api_version: "autoscaling/v2".to_string(),
                kind: "HorizontalPodAutoscaler".to_string(),
                name,
                namespace,
            },
            reason: self.kind.to_string(),
            message: self.summary.clone(),
            event_type: self.severity.to_string(),
            first_timestamp: timestamp_rfc3339.to_string(),
            last_timestamp: timestamp_rfc3339.to_string(),
            count: 1,
            source: EventSource { component: "smart-autoscaler".to_string() },
        }
    }

    pub fn to_alertmanager_alert(&self, timestamp_rfc3339: &str) -> AlertmanagerAlert {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), self.kind.to_string());
        labels.insert(
            "severity".to_string(),
            match self.severity {
                Severity::Warning => "warning".to_string(),
                Severity::Normal => "info".to_string(),
            },
        );
        if let Some(w) = &self.workload {
            labels.insert("namespace".to_string(), w.namespace.clone());
            labels.insert("workload".to_string(), w.name.clone());
            labels.insert("hpa".to_string(), w.hpa_name.clone());
        }

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), self.summary.clone());
        annotations.insert("description".to_string(), self.detail.clone());

        AlertmanagerAlert {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: timestamp_rfc3339.to_string(),
            ends_at: None,
        }
    }
}

/// Transport seam: delivery (webhook POST, chat integration, `kubectl get events` sink) is
/// out of scope; implementors just receive the finished wire shapes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_kubernetes_event(&self, event: &KubernetesEvent);
    async fn send_alertmanager_alert(&self, alert: &AlertmanagerAlert);
}

/// No-op sink, useful as a default before an operator wires in a real transport.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send_kubernetes_event(&self, _event: &KubernetesEvent) {}
    async fn send_alertmanager_alert(&self, _alert: &AlertmanagerAlert) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    kind: EventKind,
    workload: Option<WorkloadId>,
}

/// Constructs and dispatches notification events with deduplication.
pub struct Notifier {
    dedup_window: Duration,
    recent: RwLock<HashMap<DedupKey, Instant>>,
    sink: Box<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent: RwLock::new(HashMap::new()),
            sink,
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    fn should_suppress(&self, kind: EventKind, workload: &Option<WorkloadId>) -> bool {
        let key = DedupKey { kind, workload: workload.clone() };
        let recent = self.recent.read().expect("notifier lock poisoned");
        recent.get(&key).map(|t| t.elapsed() < self.dedup_window).unwrap_or(false)
    }

    fn record(&self, kind: EventKind, workload: &Option<WorkloadId>) {
        let key = DedupKey { kind, workload: workload.clone() };
        let mut recent = self.recent.write().expect("notifier lock poisoned");
        recent.insert(key, Instant::now());
        recent.retain(|_, t| t.elapsed() < self.dedup_window);
    }

    /// Builds both wire shapes for `event` and hands them to the sink, unless an identical
    /// `(kind, workload)` pair fired within the dedup window.
    pub async fn notify(&self, event: NotificationEvent) -> bool {
        if self.should_suppress(event.kind, &event.workload) {
            return false;
        }
        let timestamp = chrono::DateTime::from_timestamp(event.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let k8s_event = event.to_kubernetes_event(&timestamp);
        let alert = event.to_alertmanager_alert(&timestamp);
        self.sink.send_kubernetes_event(&k8s_event).await;
        self.sink.send_alertmanager_alert(&alert).await;
        self.record(event.kind, &event.workload);
        true
    }

    pub fn prescale_activated(workload: WorkloadId, now: i64, new_min: u32, reason: String) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::PrescaleActivated,
            workload: Some(workload),
            severity: EventKind::PrescaleActivated.default_severity(),
            summary: format!("pre-scale activated: minReplicas -> {new_min}"),
            detail: reason,
            timestamp: now,
        }
    }

    pub fn prescale_rolled_back(workload: WorkloadId, now: i64, original_min: u32) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::PrescaleRolledBack,
            workload: Some(workload),
            severity: EventKind::PrescaleRolledBack.default_severity(),
            summary: format!("pre-scale rolled back: minReplicas -> {original_min}"),
            detail: "rollback deadline reached".to_string(),
            timestamp: now,
        }
    }

    pub fn autopilot_applied(workload: WorkloadId, now: i64, cpu_millicores: u32, memory_mib: u32) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::AutopilotApplied,
            workload: Some(workload),
            severity: EventKind::AutopilotApplied.default_severity(),
            summary: format!("autopilot applied cpu={cpu_millicores}m mem={memory_mib}Mi"),
            detail: "resource requests right-sized from learned baseline".to_string(),
            timestamp: now,
        }
    }

    pub fn autopilot_rolled_back(workload: WorkloadId, now: i64, reason: String) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::AutopilotRolledBack,
            workload: Some(workload),
            severity: EventKind::AutopilotRolledBack.default_severity(),
            summary: "autopilot change rolled back".to_string(),
            detail: reason,
            timestamp: now,
        }
    }

    pub fn anomaly(workload: WorkloadId, now: i64, kind_detail: &str, detail: String) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::Anomaly,
            workload: Some(workload),
            severity: EventKind::Anomaly.default_severity(),
            summary: format!("anomaly detected: {kind_detail}"),
            detail,
            timestamp: now,
        }
    }

    pub fn config_reloaded(now: i64, detail: String) -> NotificationEvent {
        NotificationEvent {
            kind: EventKind::ConfigReloaded,
            workload: None,
            severity: EventKind::ConfigReloaded.default_severity(),
            summary: "configuration reloaded".to_string(),
            detail,
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        k8s_events: AtomicUsize,
        alerts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn send_kubernetes_event(&self, _event: &KubernetesEvent) {
            self.k8s_events.fetch_add(1, Ordering::SeqCst);
        }
        async fn send_alertmanager_alert(&self, _alert: &AlertmanagerAlert) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn workload() -> WorkloadId {
        WorkloadId::new("ns", "svc", "svc-hpa")
    }

    #[tokio::test]
    async fn dedups_identical_event_within_window() {
        let notifier = Notifier::new(Box::new(CountingSink { k8s_events: AtomicUsize::new(0), alerts: AtomicUsize::new(0) }))
            .with_dedup_window(Duration::from_secs(300));

        let sent1 = notifier.notify(Notifier::prescale_activated(workload(), 1000, 4, "predicted spike".into())).await;
        let sent2 = notifier.notify(Notifier::prescale_activated(workload(), 1010, 4, "predicted spike".into())).await;

        assert!(sent1);
        assert!(!sent2);
    }

    #[tokio::test]
    async fn distinct_event_kinds_are_not_deduplicated() {
        let notifier = Notifier::new(Box::new(NullSink));
        let sent1 = notifier.notify(Notifier::prescale_activated(workload(), 1000, 4, "spike".into())).await;
        let sent2 = notifier.notify(Notifier::autopilot_applied(workload(), 1000, 300, 400)).await;
        assert!(sent1);
        assert!(sent2);
    }

    #[tokio::test]
    async fn reaches_sink_when_not_suppressed() {
        let sink_counts = Arc::new(CountingSink { k8s_events: AtomicUsize::new(0), alerts: AtomicUsize::new(0) });

        struct ForwardingSink(Arc<CountingSink>);
        #[async_trait]
        impl NotificationSink for ForwardingSink {
            async fn send_kubernetes_event(&self, e: &KubernetesEvent) {
                self.0.send_kubernetes_event(e).await;
            }
            async fn send_alertmanager_alert(&self, a: &AlertmanagerAlert) {
                self.0.send_alertmanager_alert(a).await;
            }
        }

        let notifier = Notifier::new(Box::new(ForwardingSink(sink_counts.clone())));
        notifier.notify(Notifier::config_reloaded(1000, "applied new check_interval".into())).await;

        assert_eq!(sink_counts.k8s_events.load(Ordering::SeqCst), 1);
        assert_eq!(sink_counts.alerts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kubernetes_event_shape_uses_workload_identity() {
        let event = Notifier::autopilot_rolled_back(workload(), 1_700_000_000, "OOM increase".into());
        let k8s = event.to_kubernetes_event("2023-11-14T00:00:00Z");
        assert_eq!(k8s.involved_object.name, "svc");
        assert_eq!(k8s.involved_object.namespace, "ns");
        assert_eq!(k8s.reason, "AutopilotRolledBack");
    }
}
