//! The only component that speaks to the external metrics store and the Kubernetes API.
//!
//! Responsibility: a token-bucket limiter per outbound target, an
//! exponential-backoff retry on transient failure, a circuit breaker per target, and a
//! degraded-mode last-known-value cache so downstream components can keep running on stale
//! data when a target is unavailable.

mod cache;
mod circuit;
mod kube_client;
mod prom_client;
mod ratelimit;

pub use cache::{LastKnownCache, StaleValue};
pub use circuit::{CircuitBreaker, CircuitState};
pub use kube_client::KubernetesBackend;
pub use prom_client::PrometheusBackend;
pub use ratelimit::TokenBucket;

use crate::error::{ControllerError, Result, Target};
use crate::types::WorkloadId;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// A single resolved PromQL scalar/vector instant-query result.
#[derive(Debug, Clone, PartialEq)]
pub enum InstantValue {
    Scalar(f64),
    Vector(Vec<VectorSample>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub labels: std::collections::BTreeMap<String, String>,
    pub value: f64,
}

/// A range-query result: one or more labeled series of (timestamp, value) points.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    pub labels: std::collections::BTreeMap<String, String>,
    pub points: Vec<(i64, f64)>,
}

/// A value read through the degraded-mode cache carries whether it is fresh or stale.
#[derive(Debug, Clone)]
pub struct Freshness<T> {
    pub value: T,
    pub stale_age_seconds: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HpaInfo {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_percent: u32,
}

/// An HPA found during the auto-discovery scan, carrying whatever `smart-autoscaler.io/*`
/// annotations it had. Unparsed priority/startup-filter values are left for Discovery to
/// validate against its own defaults.
#[derive(Debug, Clone)]
pub struct AnnotatedHpa {
    pub namespace: String,
    pub name: String,
    pub hpa_name: String,
    pub priority: Option<String>,
    pub startup_filter_minutes: Option<u32>,
    pub autopilot: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ContainerResources {
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
}

#[derive(Debug, Clone)]
pub struct DeploymentInfo {
    pub node_selector: std::collections::BTreeMap<String, String>,
    pub containers: Vec<ContainerResources>,
    pub replica_set_hash: String,
}

#[derive(Debug, Clone)]
pub struct ContainerStatusInfo {
    pub name: String,
    pub restart_count: u32,
    pub ready: bool,
    pub last_oom_killed: bool,
}

#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    pub start_time: Option<i64>,
    pub ready: bool,
    pub restart_count: u32,
    pub container_statuses: Vec<ContainerStatusInfo>,
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub cpu_capacity_millicores: u64,
    pub cpu_allocatable_millicores: u64,
    pub memory_capacity_mib: u64,
    pub memory_allocatable_mib: u64,
}

/// Authentication against the metrics store.
#[derive(Debug, Clone)]
pub enum MetricsAuth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
    Headers(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct MetricsClientConfig {
    pub metrics_endpoint: String,
    pub tenant_id: Option<String>,
    pub auth: MetricsAuth,
    pub metrics_qps: f64,
    pub kubernetes_qps: f64,
}

impl Default for MetricsClientConfig {
    fn default() -> Self {
        Self {
            metrics_endpoint: "http://prometheus:9090".to_string(),
            tenant_id: None,
            auth: MetricsAuth::None,
            metrics_qps: 10.0,
            kubernetes_qps: 20.0,
        }
    }
}

/// The trait the rest of the crate depends on. A `dyn MetricsClient` lets the Control Loop
/// and every downstream component be tested against fakes without touching a real cluster.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn query_instant(&self, promql: &str) -> Result<Freshness<InstantValue>>;
    async fn query_range(&self, promql: &str, start: i64, end: i64, step_secs: i64) -> Result<Freshness<Vec<RangeSeries>>>;

    async fn read_hpa(&self, workload: &WorkloadId) -> Result<HpaInfo>;
    async fn patch_hpa_target(&self, workload: &WorkloadId, percent: u32) -> Result<()>;
    async fn patch_hpa_min(&self, workload: &WorkloadId, min_replicas: u32) -> Result<()>;

    async fn read_deployment(&self, workload: &WorkloadId) -> Result<DeploymentInfo>;
    async fn patch_deployment_requests(&self, workload: &WorkloadId, cpu_request_millicores: u32, memory_request_mib: u32) -> Result<()>;

    async fn list_pods(&self, workload: &WorkloadId) -> Result<Vec<PodInfo>>;
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn list_annotated_hpas(&self) -> Result<Vec<AnnotatedHpa>>;

    /// Current circuit-breaker state for the metrics target, used by the Control Loop to
    /// decide whether to skip forecasting this tick under memory pressure or backpressure.
    fn metrics_circuit_state(&self) -> CircuitState;
    fn kubernetes_circuit_state(&self) -> CircuitState;
}

/// Default production implementation: wraps [`PrometheusBackend`] and [`KubernetesBackend`]
/// with rate limiting, retries, a circuit breaker per target, and the degraded-mode cache.
pub struct DefaultMetricsClient {
    config: MetricsClientConfig,
    prom: PrometheusBackend,
    kube: KubernetesBackend,
    metrics_limiter: TokenBucket,
    kube_limiter: TokenBucket,
    metrics_breaker: CircuitBreaker,
    kube_breaker: CircuitBreaker,
    instant_cache: LastKnownCache<InstantValue>,
    range_cache: LastKnownCache<Vec<RangeSeries>>,
}

const RETRY_DELAYS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=200);
    base + Duration::from_millis(jitter_ms)
}

impl DefaultMetricsClient {
    pub fn new(config: MetricsClientConfig, kube: KubernetesBackend) -> Result<Self> {
        let prom = PrometheusBackend::new(&config)?;
        Ok(Self {
            metrics_limiter: TokenBucket::new(config.metrics_qps, config.metrics_qps.max(1.0)),
            kube_limiter: TokenBucket::new(config.kubernetes_qps, config.kubernetes_qps.max(1.0)),
            metrics_breaker: CircuitBreaker::new(),
            kube_breaker: CircuitBreaker::new(),
            instant_cache: LastKnownCache::new(),
            range_cache: LastKnownCache::new(),
            config,
            prom,
            kube,
        })
    }

    /// Runs `op` with the target's rate limiter, circuit breaker, and exponential-backoff
    /// retry applied. `PermissionDenied` and `NotFound` are never retried.
    async fn guarded<T, F, Fut>(&self, target: Target, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let (limiter, breaker) = match target {
            Target::Metrics => (&self.metrics_limiter, &self.metrics_breaker),
            Target::Kubernetes => (&self.kube_limiter, &self.kube_breaker),
        };

        if breaker.state() == CircuitState::Open {
            return Err(ControllerError::CircuitOpen(target));
        }

        limiter.acquire().await;

        let mut last_err = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(RETRY_DELAYS).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(jittered(delay)).await;
            }
            match op().await {
                Ok(v) => {
                    breaker.record_success();
                    return Ok(v);
                }
                Err(e) if matches!(e, ControllerError::PermissionDenied { .. } | ControllerError::NotFound { .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        if breaker.record_failure() == CircuitState::Open {
            warn!(target = %target, "circuit breaker opened after consecutive failures");
        }
        Err(last_err.unwrap_or(ControllerError::TransientExternal {
            target,
            message: "exhausted retries".to_string(),
        }))
    }
}

#[async_trait]
impl MetricsClient for DefaultMetricsClient {
    async fn query_instant(&self, promql: &str) -> Result<Freshness<InstantValue>> {
        match self.guarded(Target::Metrics, || self.prom.query_instant(promql)).await {
            Ok(value) => {
                self.instant_cache.put(promql, value.clone());
                Ok(Freshness { value, stale_age_seconds: None })
            }
            Err(e) if e.is_degraded() => {
                if let Some(stale) = self.instant_cache.get(promql) {
                    let age = stale.age_seconds(chrono::Utc::now().timestamp());
                    return Ok(Freshness { value: stale.value, stale_age_seconds: Some(age) });
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn query_range(&self, promql: &str, start: i64, end: i64, step_secs: i64) -> Result<Freshness<Vec<RangeSeries>>> {
        let key = format!("{promql}|{start}|{end}|{step_secs}");
        match self
            .guarded(Target::Metrics, || self.prom.query_range(promql, start, end, step_secs))
            .await
        {
            Ok(series) => {
                self.range_cache.put(&key, series.clone());
                Ok(Freshness { value: series, stale_age_seconds: None })
            }
            Err(e) if e.is_degraded() => {
                if let Some(stale) = self.range_cache.get(&key) {
                    let age = stale.age_seconds(chrono::Utc::now().timestamp());
                    return Ok(Freshness { value: stale.value, stale_age_seconds: Some(age) });
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_hpa(&self, workload: &WorkloadId) -> Result<HpaInfo> {
        self.guarded(Target::Kubernetes, || self.kube.read_hpa(workload)).await
    }

    async fn patch_hpa_target(&self, workload: &WorkloadId, percent: u32) -> Result<()> {
        self.guarded(Target::Kubernetes, || self.kube.patch_hpa_target(workload, percent)).await
    }

    async fn patch_hpa_min(&self, workload: &WorkloadId, min_replicas: u32) -> Result<()> {
        self.guarded(Target::Kubernetes, || self.kube.patch_hpa_min(workload, min_replicas)).await
    }

    async fn read_deployment(&self, workload: &WorkloadId) -> Result<DeploymentInfo> {
        self.guarded(Target::Kubernetes, || self.kube.read_deployment(workload)).await
    }

    async fn patch_deployment_requests(&self, workload: &WorkloadId, cpu_request_millicores: u32, memory_request_mib: u32) -> Result<()> {
        self.guarded(Target::Kubernetes, || {
            self.kube.patch_deployment_requests(workload, cpu_request_millicores, memory_request_mib)
        })
        .await
    }

    async fn list_pods(&self, workload: &WorkloadId) -> Result<Vec<PodInfo>> {
        self.guarded(Target::Kubernetes, || self.kube.list_pods(workload)).await
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.guarded(Target::Kubernetes, || self.kube.list_nodes()).await
    }

    async fn list_annotated_hpas(&self) -> Result<Vec<AnnotatedHpa>> {
        self.guarded(Target::Kubernetes, || self.kube.list_annotated_hpas()).await
    }

    fn metrics_circuit_state(&self) -> CircuitState {
        self.metrics_breaker.state()
    }

    fn kubernetes_circuit_state(&self) -> CircuitState {
        self.kube_breaker.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyOp {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    impl FlakyOp {
        async fn call(&self) -> Result<u32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first_n {
                Err(ControllerError::TransientExternal {
                    target: Target::Metrics,
                    message: "boom".to_string(),
                })
            } else {
                Ok(n)
            }
        }
    }

    #[tokio::test]
    async fn guarded_retries_transient_failures_then_succeeds() {
        let client = DefaultMetricsClient::new(MetricsClientConfig::default(), KubernetesBackend::fake_for_tests())
            .unwrap();
        let flaky = FlakyOp {
            calls: Arc::new(AtomicU32::new(0)),
            fail_first_n: 2,
        };
        let result = client.guarded(Target::Metrics, || flaky.call()).await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn guarded_does_not_retry_not_found() {
        let client = DefaultMetricsClient::new(MetricsClientConfig::default(), KubernetesBackend::fake_for_tests())
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<()> = client
            .guarded(Target::Kubernetes, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ControllerError::NotFound {
                        resource: "hpa".into(),
                        id: "ns/name".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
