//! Control Loop: one tick, one logical thread of decision-making per watched workload,
//! concurrent I/O allowed. Orchestrates Discovery, the Metrics Client, the TSS, the
//! Pattern Classifier, the Forecasters, the Validator, the Priority Arbiter, the Pre-Scale
//! Manager, and Autopilot.
//!
//! A `tokio::time::interval` ticker, jittered interval, and an overrun rule generalized from
//! "enter degraded mode when a cycle runs long" to "skip the next tick outright, never let two
//! ticks overlap".

use crate::arbiter::{self, PriorityArbiter};
use crate::autopilot::{self, AutopilotManager, GateInput, MonitorOutcome};
use crate::classifier;
use crate::discovery::{Discovery, DiscoveryConfig};
use crate::forecast;
use crate::metrics_client::{MetricsClient, PodInfo};
use crate::notifier::Notifier;
use crate::prescale::{EvaluationInput, PreScaleManager};
use crate::stats::mean;
use crate::tss::TimeSeriesStore;
use crate::types::{AutopilotLevel, Horizon, PredictionRecord, PreScaleState, Sample, Workload, WorkloadId};
use crate::validator::Validator;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-tick tunables; the rest of the knobs live on [`crate::discovery::DiscoveryConfig`] and
/// per-component constants.
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    pub check_interval: Duration,
    pub jitter: Duration,
    pub target_node_utilization_percent: u32,
    pub enable_predictive: bool,
    pub enable_prescale: bool,
    pub enable_autopilot: bool,
    pub autopilot_level: AutopilotLevel,
    pub default_startup_filter_minutes: u32,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
            target_node_utilization_percent: 70,
            enable_predictive: true,
            enable_prescale: true,
            enable_autopilot: false,
            autopilot_level: AutopilotLevel::Disabled,
            default_startup_filter_minutes: 2,
        }
    }
}

const TARGET_PATCH_MIN_DELTA_POINTS: i64 = 3;
const TARGET_PATCH_COOLDOWN_SECONDS: i64 = 5 * 60;
const TARGET_PATCH_MIN_CONFIDENCE: f32 = 0.6;
const OPTIMAL_TARGET_MIN_CONFIDENCE: f32 = 0.8;
const MATURE_POD_FALLBACK_CONFIDENCE_PENALTY: f32 = 0.5;
const MAX_PRESCALE_HORIZON: Horizon = Horizon::OneHour;
/// Matches the TSS's 30-day retention: both the classifier and Autopilot read whatever history
/// the store still has, rather than an arbitrary shorter slice.
const HISTORY_WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;
const PRESSURE_HIGH_CORRECTION: i64 = -5;
const PRESSURE_LOW_CORRECTION: i64 = 5;

/// Outcome recorded for one workload's pass through steps (a)-(h), kept for the debug HTTP
/// surface and for tests.
#[derive(Debug, Clone, Default)]
pub struct WorkloadOutcome {
    pub workload: Option<WorkloadId>,
    pub sample_recorded: bool,
    pub pattern_tag: Option<&'static str>,
    pub predictions_issued: usize,
    pub recommended_target: Option<u32>,
    pub target_patched: bool,
    pub prescale_action: Option<String>,
    pub autopilot_action: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub skipped: bool,
    pub cluster_pressure_percent: Option<f64>,
    pub outcomes: Vec<WorkloadOutcome>,
    pub validator_closed: usize,
    pub workloads_gone: usize,
}

/// Ticks per day implied by `check_interval`, used as the "7 days of samples" gate on
/// Validator-trusted optimal targets.
fn ticks_per_day(interval: Duration) -> u64 {
    let secs = interval.as_secs().max(1);
    (86_400 / secs).max(1)
}

pub struct ControlLoop {
    client: Arc<dyn MetricsClient>,
    tss: Arc<TimeSeriesStore>,
    discovery: Arc<Discovery>,
    validator: Arc<Validator>,
    arbiter: Arc<PriorityArbiter>,
    prescale: Arc<PreScaleManager>,
    autopilot: Arc<AutopilotManager>,
    notifier: Arc<Notifier>,
    config: ControlLoopConfig,
    last_patch_time: Mutex<HashMap<WorkloadId, i64>>,
    degraded: Mutex<bool>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn MetricsClient>,
        tss: Arc<TimeSeriesStore>,
        discovery: Arc<Discovery>,
        validator: Arc<Validator>,
        arbiter: Arc<PriorityArbiter>,
        prescale: Arc<PreScaleManager>,
        autopilot: Arc<AutopilotManager>,
        notifier: Arc<Notifier>,
        config: ControlLoopConfig,
    ) -> Self {
        Self {
            client,
            tss,
            discovery,
            validator,
            arbiter,
            prescale,
            autopilot,
            notifier,
            config,
            last_patch_time: Mutex::new(HashMap::new()),
            degraded: Mutex::new(false),
        }
    }

    /// Runs ticks on `config.check_interval` (jittered) until `shutdown` fires. Skips a tick
    /// outright if the previous one is still running when the next would start; never lets two
    /// ticks overlap.
    pub async fn run(self: Arc<Self>, discovery_config: DiscoveryConfig, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(interval_secs = self.config.check_interval.as_secs(), "starting control loop");
        let mut ticker = tokio::time::interval(self.jittered_interval());
        let running = Arc::new(tokio::sync::Mutex::new(()));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let permit = running.clone().try_lock_owned();
                    match permit {
                        Ok(_guard) => {
                            let now = chrono::Utc::now().timestamp();
                            let report = self.run_tick(now, &discovery_config).await;
                            if report.skipped {
                                warn!("tick skipped: previous tick still running");
                            }
                        }
                        Err(_) => {
                            warn!("previous tick still running, skipping this one");
                        }
                    }
                    ticker = tokio::time::interval(self.jittered_interval());
                }
                _ = shutdown.recv() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }
    }

    fn jittered_interval(&self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.jitter.as_millis().max(1) as u64);
        self.config.check_interval + Duration::from_millis(jitter_ms)
    }

    /// Runs the six tick steps once, synchronously with respect to each other (concurrency is
    /// internal to step 4's per-workload I/O). `now` is passed in rather than read from the
    /// clock so the step sequence is deterministic for tests.
    pub async fn run_tick(&self, now: i64, discovery_config: &DiscoveryConfig) -> TickReport {
        let started = std::time::Instant::now();

        // Step 1: refresh discovered workloads.
        let discovered = self.discovery.resolve(self.client.as_ref(), discovery_config).await;
        for id in &discovered.gone {
            self.prescale.remove_if_idle(id);
            self.autopilot.remove(id);
        }

        // Step 2: cluster pressure.
        let pressure = self.compute_cluster_pressure().await;
        if let Some(p) = pressure {
            self.arbiter.record_pressure(p);
        }

        // Step 3: priority order.
        let mut workloads = discovered.active;
        PriorityArbiter::order(&mut workloads, |w| w.priority, |w| w.id.name.as_str());

        // Step 4: per-workload.
        let mut outcomes = Vec::with_capacity(workloads.len());
        for workload in &workloads {
            outcomes.push(self.process_workload(workload, now).await);
        }

        // Step 5: Validator closure pass.
        let mut closed = 0;
        for workload in &workloads {
            closed += self.validator.close_due_predictions(&workload.id, now);
        }

        self.check_overrun(started.elapsed());

        TickReport {
            skipped: false,
            cluster_pressure_percent: pressure,
            outcomes,
            validator_closed: closed,
            workloads_gone: discovered.gone.len(),
        }
    }

    fn check_overrun(&self, elapsed: Duration) {
        let mut degraded = self.degraded.lock().expect("control loop lock poisoned");
        if elapsed >= self.config.check_interval {
            if !*degraded {
                warn!(elapsed_ms = elapsed.as_millis(), "tick overran its interval");
            }
            *degraded = true;
        } else {
            *degraded = false;
        }
    }

    async fn compute_cluster_pressure(&self) -> Option<f64> {
        match self.client.list_nodes().await {
            Ok(nodes) if !nodes.is_empty() => nodes
                .iter()
                .map(|n| {
                    if n.cpu_capacity_millicores == 0 {
                        0.0
                    } else {
                        100.0 * (1.0 - n.cpu_allocatable_millicores as f64 / n.cpu_capacity_millicores as f64)
                    }
                })
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a: f64| a.max(v)))),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "failed to list nodes for cluster pressure");
                None
            }
        }
    }

    async fn process_workload(&self, workload: &Workload, now: i64) -> WorkloadOutcome {
        let mut outcome = WorkloadOutcome { workload: Some(workload.id.clone()), ..Default::default() };

        let hpa = match self.client.read_hpa(&workload.id).await {
            Ok(h) => h,
            Err(e) => {
                debug!(workload = %workload.id, error = %e, "failed to read hpa this tick");
                return outcome;
            }
        };
        let pods = self.client.list_pods(&workload.id).await.unwrap_or_default();
        let deployment = self.client.read_deployment(&workload.id).await.ok();

        // (a) gather metrics, preferring mature pods.
        let (mature, used_fallback) = partition_mature(&pods, now, workload.startup_filter_minutes);
        let considered = if mature.is_empty() { &pods } else { &mature };
        let replica_count = pods.len() as u32;
        let (cpu_millicores, memory_mib) = self.sample_resource_usage(&workload.id, considered).await;
        let cpu_request_millicores = deployment
            .as_ref()
            .and_then(|d| d.containers.first())
            .map(|c| c.cpu_request_millicores)
            .unwrap_or(0);
        let memory_request_mib = deployment
            .as_ref()
            .and_then(|d| d.containers.first())
            .map(|c| c.memory_request_mib)
            .unwrap_or(0);

        // (b) append sample.
        let sample = Sample {
            workload: workload.id.clone(),
            timestamp: now,
            cpu_millicores,
            memory_mib,
            replica_count,
            hpa_target_percent: hpa.target_percent,
            node_cpu_utilization_percent: self.arbiter.current_pressure().unwrap_or(0.0),
            cpu_request_millicores,
            memory_request_mib,
        };
        if self.tss.append_sample(sample).is_ok() {
            outcome.sample_recorded = true;
        }

        // (c) classify, forecast.
        let history = self.tss.read_samples(&workload.id, now - HISTORY_WINDOW_SECONDS, now);
        let classification = classifier::classify(&history);
        outcome.pattern_tag = Some(classification.tag.as_str());

        let mut predictions_this_tick: Vec<PredictionRecord> = Vec::new();
        if self.config.enable_predictive && !history.is_empty() {
            let trusted = self.validator.trusted_model(&workload.id);
            let trusted_ref = trusted.as_ref().map(|(tag, acc, n)| (tag.as_str(), *acc, *n));
            let accuracy_spread = self.validator.accuracy_spread(&workload.id);
            let forecaster = forecast::select(classification.tag, history.len(), trusted_ref, accuracy_spread);
            for horizon in Horizon::ALL {
                if let Some(output) = forecaster.forecast(&history, horizon) {
                    let confidence = forecast::confidence_for(history.len(), horizon, output.model_accuracy)
                        * if used_fallback { MATURE_POD_FALLBACK_CONFIDENCE_PENALTY } else { 1.0 };
                    let record = PredictionRecord {
                        workload: workload.id.clone(),
                        issue_time: now,
                        horizon,
                        predicted_value: output.predicted_value,
                        lower_bound: output.lower_bound,
                        upper_bound: output.upper_bound,
                        model_tag: forecaster.model_tag().to_string(),
                        confidence,
                        realized_value: None,
                        accurate: None,
                    };
                    let _ = self.tss.append_prediction(record.clone());
                    predictions_this_tick.push(record);
                }
            }
            outcome.predictions_issued = predictions_this_tick.len();
        }

        // (d) recommended HPA target.
        let target = self.recommend_target(workload);
        outcome.recommended_target = Some(target);

        // (e) patch HPA target if the change clears threshold/cooldown/confidence.
        let decision_confidence = predictions_this_tick
            .iter()
            .map(|p| p.confidence)
            .fold(0.0_f32, f32::max);
        let delta = (target as i64 - hpa.target_percent as i64).abs();
        let cooldown_ok = {
            let last = self.last_patch_time.lock().expect("control loop lock poisoned");
            last.get(&workload.id).map(|t| now - t >= TARGET_PATCH_COOLDOWN_SECONDS).unwrap_or(true)
        };
        if delta >= TARGET_PATCH_MIN_DELTA_POINTS && cooldown_ok && decision_confidence >= TARGET_PATCH_MIN_CONFIDENCE {
            if self.client.patch_hpa_target(&workload.id, target).await.is_ok() {
                outcome.target_patched = true;
                self.last_patch_time.lock().expect("control loop lock poisoned").insert(workload.id.clone(), now);
            }
        }

        // (f) pre-scale evaluation.
        if self.config.enable_prescale {
            self.prescale.ensure_profile(&workload.id, hpa.min_replicas, hpa.max_replicas);
            let max_confidence_prediction = predictions_this_tick
                .iter()
                .filter(|p| p.horizon.minutes() <= MAX_PRESCALE_HORIZON.minutes())
                .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .map(|p| (p.predicted_value, p.confidence));
            let realized_cpu_10min_avg = recent_cpu_percent_avg(&self.tss, &workload.id, now, 600);
            let input = EvaluationInput {
                now,
                max_confidence_prediction,
                confidence_threshold: arbiter::prescale_confidence_threshold(workload.priority) as f32,
                current_replicas: replica_count,
                target_cpu_percent: hpa.target_percent,
                realized_cpu_10min_avg,
                workload_gone: false,
            };
            let was_active = self
                .prescale
                .profile(&workload.id)
                .map(|p| p.state != PreScaleState::Idle)
                .unwrap_or(false);
            if let Some(action) = self.prescale.evaluate(&workload.id, input) {
                let _ = self.client.patch_hpa_min(&workload.id, action.new_min).await;
                let event = if was_active {
                    Notifier::prescale_rolled_back(workload.id.clone(), now, action.new_min)
                } else {
                    Notifier::prescale_activated(workload.id.clone(), now, action.new_min, action.reason.clone())
                };
                self.notifier.notify(event).await;
                outcome.prescale_action = Some(action.reason);
            }
        }

        // (g) autopilot evaluation.
        if self.config.enable_autopilot && autopilot::may_recommend(self.config.autopilot_level) {
            outcome.autopilot_action = self.run_autopilot(workload, now, cpu_request_millicores, memory_request_mib).await;
        }

        outcome
    }

    async fn sample_resource_usage(&self, workload: &WorkloadId, pods: &[PodInfo]) -> (f64, f64) {
        let cpu_query = format!(
            "avg(rate(container_cpu_usage_seconds_total{{namespace=\"{}\",pod=~\"{}.*\"}}[5m])) * 1000",
            workload.namespace, workload.name
        );
        let mem_query = format!(
            "avg(container_memory_working_set_bytes{{namespace=\"{}\",pod=~\"{}.*\"}}) / (1024*1024)",
            workload.namespace, workload.name
        );
        let cpu = self.client.query_instant(&cpu_query).await.ok().and_then(|f| scalar_of(f.value)).unwrap_or(0.0);
        let mem = self.client.query_instant(&mem_query).await.ok().and_then(|f| scalar_of(f.value)).unwrap_or(0.0);
        let _ = pods;
        (cpu, mem)
    }

    fn recommend_target(&self, workload: &Workload) -> u32 {
        let ticks_needed = 7 * ticks_per_day(self.config.check_interval);
        let optimal = self
            .tss
            .read_optimal_targets(&workload.id)
            .into_iter()
            .find(|r| r.hour_of_day.is_none() && r.confidence >= OPTIMAL_TARGET_MIN_CONFIDENCE && r.sample_count >= ticks_needed);

        let base = match optimal {
            Some(r) => r.target_percent as i64,
            None => self.arbiter.target_for(workload.priority) as i64,
        };

        let pressure = self.arbiter.current_pressure().unwrap_or(0.0);
        let corrected = if pressure > 85.0 {
            base + PRESSURE_HIGH_CORRECTION
        } else if pressure < 40.0 {
            base + PRESSURE_LOW_CORRECTION
        } else {
            base
        };

        corrected.clamp(arbiter::MIN_TARGET as i64, arbiter::MAX_TARGET as i64) as u32
    }

    async fn run_autopilot(
        &self,
        workload: &Workload,
        now: i64,
        current_cpu_request: u32,
        current_memory_mib: u32,
    ) -> Option<String> {
        let window_start = now - HISTORY_WINDOW_SECONDS;
        let samples = self.tss.read_samples(&workload.id, window_start, now);
        if samples.is_empty() {
            return None;
        }
        let cpu_samples: Vec<f64> = samples.iter().map(|s| s.cpu_millicores).collect();
        let mem_samples: Vec<f64> = samples.iter().map(|s| s.memory_mib).collect();
        self.autopilot.advance_learning(&workload.id, now, &cpu_samples, &mem_samples, false);

        let recommendation = self.autopilot.recommend(&workload.id, current_cpu_request, current_memory_mib)?;
        let is_reduction = recommendation.cpu_request_millicores < current_cpu_request || recommendation.memory_request_mib < current_memory_mib;
        let change_percent = {
            let cpu_change = relative_change_percent(current_cpu_request as f64, recommendation.cpu_request_millicores as f64);
            let mem_change = relative_change_percent(current_memory_mib as f64, recommendation.memory_request_mib as f64);
            cpu_change.max(mem_change)
        };
        let state = self.autopilot.state(&workload.id)?;

        if !autopilot::may_apply(self.config.autopilot_level) {
            return Some(format!(
                "recommend cpu={}m mem={}Mi",
                recommendation.cpu_request_millicores, recommendation.memory_request_mib
            ));
        }

        let has_active_prescale = self
            .prescale
            .profile(&workload.id)
            .map(|p| p.state != PreScaleState::Idle)
            .unwrap_or(false);
        let gate_input = GateInput {
            priority: workload.priority,
            confidence: state.confidence,
            now,
            is_reduction,
            change_percent,
            has_active_prescale,
            manual_approved: false,
        };
        if self.autopilot.check_gates(&workload.id, &gate_input).is_err() {
            return None;
        }

        let pods = self.client.list_pods(&workload.id).await.unwrap_or_default();
        let replica_set_hash = self.client.read_deployment(&workload.id).await.map(|d| d.replica_set_hash).unwrap_or_default();
        let snapshot = crate::types::AutopilotSnapshot {
            replica_set_hash,
            cpu_request_millicores: current_cpu_request,
            memory_request_mib: current_memory_mib,
            pod_restart_count: pods.iter().map(|p| p.restart_count as u64).sum(),
            oom_kill_count: pods.iter().flat_map(|p| &p.container_statuses).filter(|c| c.last_oom_killed).count() as u64,
            ready_replica_count: pods.iter().filter(|p| p.ready).count() as u32,
        };

        if self
            .client
            .patch_deployment_requests(&workload.id, recommendation.cpu_request_millicores, recommendation.memory_request_mib)
            .await
            .is_ok()
        {
            self.autopilot.apply(&workload.id, now, snapshot, recommendation.cpu_request_millicores, recommendation.memory_request_mib);
            self.notifier
                .notify(Notifier::autopilot_applied(
                    workload.id.clone(),
                    now,
                    recommendation.cpu_request_millicores,
                    recommendation.memory_request_mib,
                ))
                .await;
            Some(format!(
                "applied cpu={}m mem={}Mi",
                recommendation.cpu_request_millicores, recommendation.memory_request_mib
            ))
        } else {
            None
        }
    }

    /// 30-second ancillary sweep: polls every active autopilot monitor for regressions against
    /// its pending snapshot, rolling back the Deployment's resource requests on a trigger.
    pub async fn run_ancillary_sweep(&self, now: i64, workloads: &[WorkloadId]) {
        for workload in workloads {
            let Some(state) = self.autopilot.state(workload) else { continue };
            let Some(snapshot) = state.pending_snapshot.as_ref() else { continue };
            if state.monitor_deadline.is_none() {
                continue;
            }

            let pods = self.client.list_pods(workload).await.unwrap_or_default();
            let restart_total: u64 = pods.iter().map(|p| p.restart_count as u64).sum();
            let oom_total: u64 = pods.iter().flat_map(|p| &p.container_statuses).filter(|c| c.last_oom_killed).count() as u64;
            let restart_increase = restart_total.saturating_sub(snapshot.pod_restart_count);
            let oom_increase = oom_total.saturating_sub(snapshot.oom_kill_count);

            let ready_count = pods.iter().filter(|p| p.ready).count() as u32;
            let readiness_drop = if snapshot.ready_replica_count > 0 {
                ((snapshot.ready_replica_count as f64 - ready_count as f64) / snapshot.ready_replica_count as f64 * 100.0).max(0.0)
            } else {
                0.0
            };

            match self.autopilot.monitor_check(workload, now, restart_increase, oom_increase, readiness_drop) {
                MonitorOutcome::RolledBack(snapshot) => {
                    let reason = format!(
                        "restart_increase={restart_increase} oom_increase={oom_increase} readiness_drop={readiness_drop:.1}%"
                    );
                    let _ = self
                        .client
                        .patch_deployment_requests(workload, snapshot.cpu_request_millicores, snapshot.memory_request_mib)
                        .await;
                    self.notifier.notify(Notifier::autopilot_rolled_back(workload.clone(), now, reason)).await;
                }
                MonitorOutcome::Idle | MonitorOutcome::Continue | MonitorOutcome::Confirmed => {}
            }
        }
    }
}

/// Splits pods into the mature subset (age >= `startup_filter_minutes`) and reports whether
/// the caller should attenuate confidence because no pod qualified.
fn partition_mature(pods: &[PodInfo], now: i64, startup_filter_minutes: u32) -> (Vec<PodInfo>, bool) {
    let threshold_secs = startup_filter_minutes as i64 * 60;
    let mature: Vec<PodInfo> = pods
        .iter()
        .filter(|p| p.start_time.map(|t| now - t >= threshold_secs).unwrap_or(false))
        .cloned()
        .collect();
    let used_fallback = mature.is_empty() && !pods.is_empty();
    (mature, used_fallback)
}

fn scalar_of(value: crate::metrics_client::InstantValue) -> Option<f64> {
    match value {
        crate::metrics_client::InstantValue::Scalar(v) => Some(v),
        crate::metrics_client::InstantValue::Vector(vs) => vs.first().map(|v| v.value),
    }
}

fn relative_change_percent(current: f64, target: f64) -> f64 {
    if current.abs() < f64::EPSILON {
        return 0.0;
    }
    ((target - current).abs() / current) * 100.0
}

/// Average CPU percent (of request) over the trailing `window_seconds`, `None` if no samples.
fn recent_cpu_percent_avg(tss: &TimeSeriesStore, workload: &WorkloadId, now: i64, window_seconds: i64) -> Option<f64> {
    let samples = tss.read_samples(workload, now - window_seconds, now);
    if samples.is_empty() {
        return None;
    }
    let percents: Vec<f64> = samples
        .iter()
        .filter(|s| s.cpu_request_millicores > 0)
        .map(|s| 100.0 * s.cpu_millicores / s.cpu_request_millicores as f64)
        .collect();
    if percents.is_empty() {
        None
    } else {
        Some(mean(&percents))
    }
}
