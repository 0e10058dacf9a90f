//! Kubernetes API backend: reads HPAs/Deployments/Pods/Nodes and patches HPA targets,
//! HPA minReplicas, and Deployment container resource requests.

use super::{AnnotatedHpa, ContainerResources, ContainerStatusInfo, DeploymentInfo, HpaInfo, NodeInfo, PodInfo};
use crate::error::{ControllerError, Result, Target};
use crate::types::WorkloadId;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;

const FIELD_MANAGER: &str = "smart-autoscaler";
pub const ENABLED_ANNOTATION: &str = "smart-autoscaler.io/enabled";
pub const PRIORITY_ANNOTATION: &str = "smart-autoscaler.io/priority";
pub const STARTUP_FILTER_ANNOTATION: &str = "smart-autoscaler.io/startup-filter";
pub const AUTOPILOT_ANNOTATION: &str = "smart-autoscaler.io/autopilot";

pub struct KubernetesBackend {
    client: Option<Client>,
}

impl KubernetesBackend {
    pub fn new(client: Client) -> Self {
        Self { client: Some(client) }
    }

    /// A client with no underlying connection, used only so unit tests can construct a
    /// [`super::DefaultMetricsClient`] without a cluster. Any call against it fails fast.
    pub fn fake_for_tests() -> Self {
        Self { client: None }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| ControllerError::TransientExternal {
            target: Target::Kubernetes,
            message: "no kubernetes client configured".to_string(),
        })
    }

    fn classify(target_kind: &str, id: &str, e: kube::Error) -> ControllerError {
        match &e {
            kube::Error::Api(resp) if resp.code == 403 => ControllerError::PermissionDenied {
                verb: "unknown".to_string(),
                resource: target_kind.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 404 => ControllerError::NotFound {
                resource: target_kind.to_string(),
                id: id.to_string(),
            },
            _ => ControllerError::TransientExternal {
                target: Target::Kubernetes,
                message: format!("{target_kind} {id}: {e}"),
            },
        }
    }

    pub async fn read_hpa(&self, workload: &WorkloadId) -> Result<HpaInfo> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let hpa = api
            .get(&workload.hpa_name)
            .await
            .map_err(|e| Self::classify("hpa", &workload.to_string(), e))?;

        let spec = hpa.spec.ok_or_else(|| ControllerError::IntegrityViolation(format!("hpa {} has no spec", workload.hpa_name)))?;
        let target_percent = spec
            .metrics
            .iter()
            .flatten()
            .find_map(|m| m.resource.as_ref().and_then(|r| r.target.average_utilization))
            .unwrap_or(70) as u32;

        Ok(HpaInfo {
            min_replicas: spec.min_replicas.unwrap_or(1) as u32,
            max_replicas: spec.max_replicas as u32,
            target_percent,
        })
    }

    pub async fn patch_hpa_target(&self, workload: &WorkloadId, percent: u32) -> Result<()> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let hpa = api
            .get(&workload.hpa_name)
            .await
            .map_err(|e| Self::classify("hpa", &workload.to_string(), e))?;
        let spec = hpa.spec.ok_or_else(|| ControllerError::IntegrityViolation(format!("hpa {} has no spec", workload.hpa_name)))?;

        let metric_index = spec
            .metrics
            .iter()
            .flatten()
            .position(|m| m.resource.is_some())
            .unwrap_or(0);

        let patch = json!({
            "spec": {
                "metrics": [{
                    "type": "Resource",
                    "resource": {
                        "name": "cpu",
                        "target": { "type": "Utilization", "averageUtilization": percent }
                    }
                }]
            }
        });
        let _ = metric_index;
        api.patch(&workload.hpa_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
            .await
            .map_err(|e| Self::classify("hpa", &workload.to_string(), e))?;
        Ok(())
    }

    pub async fn patch_hpa_min(&self, workload: &WorkloadId, min_replicas: u32) -> Result<()> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let patch = json!({ "spec": { "minReplicas": min_replicas } });
        api.patch(&workload.hpa_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
            .await
            .map_err(|e| Self::classify("hpa", &workload.to_string(), e))?;
        Ok(())
    }

    pub async fn read_deployment(&self, workload: &WorkloadId) -> Result<DeploymentInfo> {
        let api: Api<Deployment> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let deployment = api
            .get(&workload.name)
            .await
            .map_err(|e| Self::classify("deployment", &workload.to_string(), e))?;

        let spec = deployment
            .spec
            .ok_or_else(|| ControllerError::IntegrityViolation(format!("deployment {} has no spec", workload.name)))?;
        let pod_spec = spec
            .template
            .spec
            .ok_or_else(|| ControllerError::IntegrityViolation(format!("deployment {} has no pod template spec", workload.name)))?;

        let node_selector = pod_spec.node_selector.unwrap_or_default().into_iter().collect();
        let containers = pod_spec
            .containers
            .iter()
            .map(|c| {
                let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
                let cpu = requests
                    .and_then(|r| r.get("cpu"))
                    .map(|q| parse_millicores(&q.0))
                    .unwrap_or(0);
                let mem = requests
                    .and_then(|r| r.get("memory"))
                    .map(|q| parse_mib(&q.0))
                    .unwrap_or(0);
                ContainerResources {
                    cpu_request_millicores: cpu,
                    memory_request_mib: mem,
                }
            })
            .collect();

        let replica_set_hash = deployment
            .status
            .and_then(|s| s.observed_generation)
            .map(|g| g.to_string())
            .unwrap_or_default();

        Ok(DeploymentInfo {
            node_selector,
            containers,
            replica_set_hash,
        })
    }

    pub async fn patch_deployment_requests(&self, workload: &WorkloadId, cpu_request_millicores: u32, memory_request_mib: u32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let patch = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": workload.name,
                            "resources": {
                                "requests": {
                                    "cpu": format!("{cpu_request_millicores}m"),
                                    "memory": format!("{memory_request_mib}Mi"),
                                }
                            }
                        }]
                    }
                }
            }
        });
        api.patch(&workload.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
            .await
            .map_err(|e| Self::classify("deployment", &workload.to_string(), e))?;
        Ok(())
    }

    pub async fn list_pods(&self, workload: &WorkloadId) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client()?.clone(), &workload.namespace);
        let list_params = kube::api::ListParams::default().labels(&format!("app={}", workload.name));
        let pods = api
            .list(&list_params)
            .await
            .map_err(|e| Self::classify("pod", &workload.to_string(), e))?;

        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let status = pod.status.unwrap_or_default();
                let start_time = status.start_time.map(|t| t.0.timestamp());
                let ready = status
                    .conditions
                    .iter()
                    .flatten()
                    .any(|c| c.type_ == "Ready" && c.status == "True");
                let container_statuses: Vec<ContainerStatusInfo> = status
                    .container_statuses
                    .unwrap_or_default()
                    .into_iter()
                    .map(|cs| ContainerStatusInfo {
                        name: cs.name,
                        restart_count: cs.restart_count as u32,
                        ready: cs.ready,
                        last_oom_killed: cs
                            .last_state
                            .and_then(|ls| ls.terminated)
                            .map(|t| t.reason.as_deref() == Some("OOMKilled"))
                            .unwrap_or(false),
                    })
                    .collect();
                let restart_count = container_statuses.iter().map(|c| c.restart_count).max().unwrap_or(0);
                PodInfo {
                    name: pod.metadata.name.unwrap_or_default(),
                    start_time,
                    ready,
                    restart_count,
                    container_statuses,
                }
            })
            .collect())
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client()?.clone());
        let nodes = api
            .list(&kube::api::ListParams::default())
            .await
            .map_err(|e| Self::classify("node", "cluster", e))?;

        Ok(nodes
            .items
            .into_iter()
            .map(|node| {
                let status = node.status.unwrap_or_default();
                let capacity = status.capacity.unwrap_or_default();
                let allocatable = status.allocatable.unwrap_or_default();
                NodeInfo {
                    name: node.metadata.name.unwrap_or_default(),
                    labels: node.metadata.labels.unwrap_or_default().into_iter().collect(),
                    cpu_capacity_millicores: capacity.get("cpu").map(|q| parse_millicores(&q.0) as u64).unwrap_or(0),
                    cpu_allocatable_millicores: allocatable.get("cpu").map(|q| parse_millicores(&q.0) as u64).unwrap_or(0),
                    memory_capacity_mib: capacity.get("memory").map(|q| parse_mib(&q.0) as u64).unwrap_or(0),
                    memory_allocatable_mib: allocatable.get("memory").map(|q| parse_mib(&q.0) as u64).unwrap_or(0),
                }
            })
            .collect())
    }

    /// Scans every HPA in the cluster for `smart-autoscaler.io/enabled=true`, returning the
    /// annotations Discovery needs to fold into a watched workload.
    pub async fn list_annotated_hpas(&self) -> Result<Vec<AnnotatedHpa>> {
        let api: Api<HorizontalPodAutoscaler> = Api::all(self.client()?.clone());
        let hpas = api
            .list(&kube::api::ListParams::default())
            .await
            .map_err(|e| Self::classify("hpa", "cluster", e))?;

        Ok(hpas
            .items
            .into_iter()
            .filter_map(|hpa| {
                let meta = hpa.metadata;
                let annotations = meta.annotations.unwrap_or_default();
                if annotations.get(ENABLED_ANNOTATION).map(String::as_str) != Some("true") {
                    return None;
                }
                let namespace = meta.namespace?;
                let hpa_name = meta.name?;
                let target_name = hpa.spec.map(|s| s.scale_target_ref.name).unwrap_or_else(|| hpa_name.clone());
                Some(AnnotatedHpa {
                    namespace,
                    name: target_name,
                    hpa_name,
                    priority: annotations.get(PRIORITY_ANNOTATION).cloned(),
                    startup_filter_minutes: annotations.get(STARTUP_FILTER_ANNOTATION).and_then(|v| v.parse().ok()),
                    autopilot: annotations.get(AUTOPILOT_ANNOTATION).map(|v| v == "true"),
                })
            })
            .collect())
    }
}

/// Parses a Kubernetes CPU quantity (`"500m"`, `"2"`) into millicores.
fn parse_millicores(quantity: &str) -> u32 {
    if let Some(stripped) = quantity.strip_suffix('m') {
        stripped.parse().unwrap_or(0)
    } else {
        quantity.parse::<f64>().map(|cores| (cores * 1000.0) as u32).unwrap_or(0)
    }
}

/// Parses a Kubernetes memory quantity (`"256Mi"`, `"1Gi"`, `"512000000"`) into MiB.
fn parse_mib(quantity: &str) -> u32 {
    const MIB: f64 = 1024.0 * 1024.0;
    if let Some(stripped) = quantity.strip_suffix("Mi") {
        stripped.parse().unwrap_or(0)
    } else if let Some(stripped) = quantity.strip_suffix("Gi") {
        stripped.parse::<f64>().map(|gi| (gi * 1024.0) as u32).unwrap_or(0)
    } else if let Some(stripped) = quantity.strip_suffix("Ki") {
        stripped.parse::<f64>().map(|ki| (ki / 1024.0) as u32).unwrap_or(0)
    } else {
        quantity.parse::<f64>().map(|bytes| (bytes / MIB) as u32).unwrap_or(0)
    }
}
