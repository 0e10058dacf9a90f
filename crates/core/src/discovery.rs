//! Resolves the set of watched workloads each tick by merging a static configuration list
//! with a dynamic scan of HPAs carrying the `smart-autoscaler.io/enabled=true` annotation
//! Maintains a registry of the previously seen set so the Control Loop can tell a
//! gone workload from one simply absent this tick's scan result, mirroring the container
//! registry pattern used for node-local container lifecycle tracking.

use crate::metrics_client::MetricsClient;
use crate::types::{Priority, SourceTag, Workload, WorkloadId};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A workload named directly in configuration, never subject to annotation discovery.
#[derive(Debug, Clone)]
pub struct StaticWorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub hpa_name: String,
    pub priority: Priority,
    pub startup_filter_minutes: u32,
    pub autopilot_enabled: Option<bool>,
}

/// Inputs to one tick's resolution pass.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub static_workloads: Vec<StaticWorkloadSpec>,
    pub auto_discovery_enabled: bool,
    pub default_priority: Priority,
    pub default_startup_filter_minutes: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            static_workloads: Vec::new(),
            auto_discovery_enabled: true,
            default_priority: Priority::Medium,
            default_startup_filter_minutes: 2,
        }
    }
}

/// The result of one resolution pass: the currently active workload set, and any workload
/// present in the previous pass but absent from this one.
pub struct DiscoveryResult {
    pub active: Vec<Workload>,
    pub gone: Vec<WorkloadId>,
}

/// Tracks the watched-workload set across ticks. Re-resolved once per tick, before step 1
/// of the Control Loop.
pub struct Discovery {
    registry: DashMap<WorkloadId, Workload>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    pub fn new() -> Self {
        Self { registry: DashMap::new() }
    }

    pub fn get(&self, id: &WorkloadId) -> Option<Workload> {
        self.registry.get(id).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<Workload> {
        self.registry.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Merges `config.static_workloads` with a live annotation scan (when enabled),
    /// replaces the registry, and reports workloads that dropped out since the previous call.
    ///
    /// A scan failure degrades to static-only for this tick rather than failing the whole
    /// resolution; the previously discovered (non-static) workloads are then reported gone.
    pub async fn resolve(&self, client: &dyn MetricsClient, config: &DiscoveryConfig) -> DiscoveryResult {
        let mut resolved: Vec<Workload> = config
            .static_workloads
            .iter()
            .map(|s| Workload {
                id: WorkloadId::new(s.namespace.clone(), s.name.clone(), s.hpa_name.clone()),
                priority: s.priority,
                startup_filter_minutes: s.startup_filter_minutes,
                source: SourceTag::Config,
                node_selector: None,
                autopilot_enabled: s.autopilot_enabled,
            })
            .collect();

        if config.auto_discovery_enabled {
            match client.list_annotated_hpas().await {
                Ok(hpas) => {
                    for hpa in hpas {
                        let id = WorkloadId::new(hpa.namespace, hpa.name, hpa.hpa_name);
                        if resolved.iter().any(|w| w.id == id) {
                            continue;
                        }
                        let priority = hpa
                            .priority
                            .as_deref()
                            .and_then(Priority::parse)
                            .unwrap_or(config.default_priority);
                        resolved.push(Workload {
                            id,
                            priority,
                            startup_filter_minutes: hpa.startup_filter_minutes.unwrap_or(config.default_startup_filter_minutes),
                            source: SourceTag::Annotation,
                            node_selector: None,
                            autopilot_enabled: hpa.autopilot,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "annotation scan failed, using static workload list only this tick"),
            }
        }

        let previous: Vec<WorkloadId> = self.registry.iter().map(|r| r.key().clone()).collect();
        let resolved_ids: std::collections::HashSet<&WorkloadId> = resolved.iter().map(|w| &w.id).collect();
        let gone: Vec<WorkloadId> = previous.into_iter().filter(|id| !resolved_ids.contains(id)).collect();

        self.registry.clear();
        for workload in &resolved {
            self.registry.insert(workload.id.clone(), workload.clone());
        }
        for id in &gone {
            debug!(workload = %id, "workload no longer discovered");
        }

        DiscoveryResult { active: resolved, gone }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CResult;
    use crate::metrics_client::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeClient {
        hpas: Mutex<Vec<AnnotatedHpa>>,
        fail: bool,
    }

    #[async_trait]
    impl MetricsClient for FakeClient {
        async fn query_instant(&self, _: &str) -> CResult<Freshness<InstantValue>> {
            unimplemented!()
        }
        async fn query_range(&self, _: &str, _: i64, _: i64, _: i64) -> CResult<Freshness<Vec<RangeSeries>>> {
            unimplemented!()
        }
        async fn read_hpa(&self, _: &WorkloadId) -> CResult<HpaInfo> {
            unimplemented!()
        }
        async fn patch_hpa_target(&self, _: &WorkloadId, _: u32) -> CResult<()> {
            unimplemented!()
        }
        async fn patch_hpa_min(&self, _: &WorkloadId, _: u32) -> CResult<()> {
            unimplemented!()
        }
        async fn read_deployment(&self, _: &WorkloadId) -> CResult<DeploymentInfo> {
            unimplemented!()
        }
        async fn patch_deployment_requests(&self, _: &WorkloadId, _: u32, _: u32) -> CResult<()> {
            unimplemented!()
        }
        async fn list_pods(&self, _: &WorkloadId) -> CResult<Vec<PodInfo>> {
            unimplemented!()
        }
        async fn list_nodes(&self) -> CResult<Vec<NodeInfo>> {
            unimplemented!()
        }
        async fn list_annotated_hpas(&self) -> CResult<Vec<AnnotatedHpa>> {
            if self.fail {
                return Err(crate::error::ControllerError::TransientExternal {
                    target: crate::error::Target::Kubernetes,
                    message: "boom".into(),
                });
            }
            Ok(self.hpas.lock().unwrap().clone())
        }
        fn metrics_circuit_state(&self) -> CircuitState {
            CircuitState::Closed
        }
        fn kubernetes_circuit_state(&self) -> CircuitState {
            CircuitState::Closed
        }
    }

    fn annotated(ns: &str, name: &str) -> AnnotatedHpa {
        AnnotatedHpa {
            namespace: ns.into(),
            name: name.into(),
            hpa_name: format!("{name}-hpa"),
            priority: Some("high".into()),
            startup_filter_minutes: Some(10),
            autopilot: Some(true),
        }
    }

    #[tokio::test]
    async fn merges_static_and_annotated_without_duplicates() {
        let discovery = Discovery::new();
        let client = FakeClient { hpas: Mutex::new(vec![annotated("ns", "svc-a")]), fail: false };
        let config = DiscoveryConfig {
            static_workloads: vec![StaticWorkloadSpec {
                namespace: "ns".into(),
                name: "svc-b".into(),
                hpa_name: "svc-b-hpa".into(),
                priority: Priority::Critical,
                startup_filter_minutes: 0,
                autopilot_enabled: None,
            }],
            ..Default::default()
        };

        let result = discovery.resolve(&client, &config).await;
        assert_eq!(result.active.len(), 2);
        assert!(result.gone.is_empty());
        assert_eq!(discovery.len(), 2);
    }

    #[tokio::test]
    async fn static_entry_takes_precedence_over_annotation_duplicate() {
        let discovery = Discovery::new();
        let client = FakeClient { hpas: Mutex::new(vec![annotated("ns", "svc-a")]), fail: false };
        let config = DiscoveryConfig {
            static_workloads: vec![StaticWorkloadSpec {
                namespace: "ns".into(),
                name: "svc-a".into(),
                hpa_name: "svc-a-hpa".into(),
                priority: Priority::Critical,
                startup_filter_minutes: 0,
                autopilot_enabled: None,
            }],
            ..Default::default()
        };

        let result = discovery.resolve(&client, &config).await;
        assert_eq!(result.active.len(), 1);
        assert_eq!(result.active[0].priority, Priority::Critical);
        assert_eq!(result.active[0].source, SourceTag::Config);
    }

    #[tokio::test]
    async fn reports_workload_gone_once_it_drops_out_of_the_scan() {
        let discovery = Discovery::new();
        let client = FakeClient { hpas: Mutex::new(vec![annotated("ns", "svc-a")]), fail: false };
        let config = DiscoveryConfig::default();

        discovery.resolve(&client, &config).await;
        client.hpas.lock().unwrap().clear();
        let result = discovery.resolve(&client, &config).await;

        assert!(result.active.is_empty());
        assert_eq!(result.gone, vec![WorkloadId::new("ns", "svc-a", "svc-a-hpa")]);
        assert!(discovery.is_empty());
    }

    #[tokio::test]
    async fn scan_failure_degrades_to_static_only_without_panicking() {
        let discovery = Discovery::new();
        let client = FakeClient { hpas: Mutex::new(vec![annotated("ns", "svc-a")]), fail: true };
        let config = DiscoveryConfig {
            static_workloads: vec![StaticWorkloadSpec {
                namespace: "ns".into(),
                name: "svc-b".into(),
                hpa_name: "svc-b-hpa".into(),
                priority: Priority::Medium,
                startup_filter_minutes: 0,
                autopilot_enabled: None,
            }],
            ..Default::default()
        };

        let result = discovery.resolve(&client, &config).await;
        assert_eq!(result.active.len(), 1);
        assert_eq!(result.active[0].source, SourceTag::Config);
    }

    #[tokio::test]
    async fn auto_discovery_disabled_ignores_annotation_scan() {
        let discovery = Discovery::new();
        let client = FakeClient { hpas: Mutex::new(vec![annotated("ns", "svc-a")]), fail: false };
        let config = DiscoveryConfig { auto_discovery_enabled: false, ..Default::default() };

        let result = discovery.resolve(&client, &config).await;
        assert!(result.active.is_empty());
    }
}
