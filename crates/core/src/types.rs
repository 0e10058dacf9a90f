//! Core data model: workload identity, samples, predictions, and the
//! per-workload state records that the rest of the crate operates on.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identity of a watched workload: `(namespace, name, hpa_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
    pub hpa_name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, hpa_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            hpa_name: hpa_name.into(),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Priority tier governing target bias, scale-speed, and preemption rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    BestEffort,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    /// Ordinal used for total ordering: critical first, best_effort last.
    fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::BestEffort => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            "best_effort" | "best-effort" => Some(Priority::BestEffort),
            _ => None,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Where a workload definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Config,
    Annotation,
}

/// A watched workload and its per-workload overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub priority: Priority,
    pub startup_filter_minutes: u32,
    pub source: SourceTag,
    pub node_selector: Option<std::collections::BTreeMap<String, String>>,
    pub autopilot_enabled: Option<bool>,
}

/// Sample written by the Control Loop each tick. The sole long-term state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub workload: WorkloadId,
    pub timestamp: i64,
    pub cpu_millicores: f64,
    pub memory_mib: f64,
    pub replica_count: u32,
    pub hpa_target_percent: u32,
    pub node_cpu_utilization_percent: f64,
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
}

/// Forecast lead time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    #[serde(rename = "15m")]
    FifteenMin,
    #[serde(rename = "30m")]
    ThirtyMin,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHour,
    #[serde(rename = "4h")]
    FourHour,
}

impl Horizon {
    pub const ALL: [Horizon; 5] = [
        Horizon::FifteenMin,
        Horizon::ThirtyMin,
        Horizon::OneHour,
        Horizon::TwoHour,
        Horizon::FourHour,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Horizon::FifteenMin => 15,
            Horizon::ThirtyMin => 30,
            Horizon::OneHour => 60,
            Horizon::TwoHour => 120,
            Horizon::FourHour => 240,
        }
    }
}

/// A prediction issued by a forecaster for one workload and horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub workload: WorkloadId,
    pub issue_time: i64,
    pub horizon: Horizon,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub model_tag: String,
    pub confidence: f32,
    pub realized_value: Option<f64>,
    pub accurate: Option<bool>,
}

impl PredictionRecord {
    pub fn due_at(&self) -> i64 {
        self.issue_time + self.horizon.minutes() * 60
    }

    /// |predicted - actual| / actual < 0.15
    pub fn mark_realized(&mut self, actual: f64) {
        self.realized_value = Some(actual);
        self.accurate = Some(if actual.abs() > f64::EPSILON {
            ((self.predicted_value - actual).abs() / actual.abs()) < 0.15
        } else {
            (self.predicted_value - actual).abs() < f64::EPSILON
        });
    }
}

/// Learned per-workload optimal HPA target, optionally stratified by hour-of-day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalTargetRecord {
    pub workload: WorkloadId,
    pub hour_of_day: Option<u8>,
    pub target_percent: u32,
    pub sample_count: u64,
    pub confidence: f32,
    pub last_updated: i64,
}

/// Pre-scale state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreScaleState {
    Idle,
    PreScaling,
    RollingBack,
}

/// Per-workload pre-scale override profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreScaleProfile {
    pub workload: WorkloadId,
    pub original_min_replicas: u32,
    pub original_max_replicas: u32,
    pub current_min_replicas: u32,
    pub state: PreScaleState,
    pub override_start: Option<i64>,
    pub rollback_at: Option<i64>,
    pub pre_scale_count: u64,
    pub successful_prediction_count: u64,
    pub reason: String,
    pub last_trigger_time: Option<i64>,
}

impl PreScaleProfile {
    pub fn new_idle(workload: WorkloadId, original_min: u32, original_max: u32) -> Self {
        Self {
            workload,
            original_min_replicas: original_min,
            original_max_replicas: original_max,
            current_min_replicas: original_min,
            state: PreScaleState::Idle,
            override_start: None,
            rollback_at: None,
            pre_scale_count: 0,
            successful_prediction_count: 0,
            reason: String::new(),
            last_trigger_time: None,
        }
    }
}

/// Autopilot learning-state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningState {
    NotStarted,
    Learning,
    Completed,
    Graduated,
}

/// Snapshot taken before an autopilot apply, used to roll back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotSnapshot {
    pub replica_set_hash: String,
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
    pub pod_restart_count: u64,
    pub oom_kill_count: u64,
    pub ready_replica_count: u32,
}

/// Per-workload autopilot state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotState {
    pub workload: WorkloadId,
    pub learning_state: LearningState,
    pub learning_start: Option<i64>,
    pub sample_count: u64,
    pub baseline_cpu_p95: Option<f64>,
    pub baseline_memory_p95: Option<f64>,
    pub confidence: f32,
    pub last_change_time: Option<i64>,
    pub last_applied_cpu_millicores: Option<u32>,
    pub last_applied_memory_mib: Option<u32>,
    pub pending_snapshot: Option<AutopilotSnapshot>,
    pub monitor_deadline: Option<i64>,
    pub cooldown_extended: bool,
}

impl AutopilotState {
    pub fn new(workload: WorkloadId) -> Self {
        Self {
            workload,
            learning_state: LearningState::NotStarted,
            learning_start: None,
            sample_count: 0,
            baseline_cpu_p95: None,
            baseline_memory_p95: None,
            confidence: 0.0,
            last_change_time: None,
            last_applied_cpu_millicores: None,
            last_applied_memory_mib: None,
            pending_snapshot: None,
            monitor_deadline: None,
            cooldown_extended: false,
        }
    }
}

/// Autopilot operating level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotLevel {
    Disabled,
    Observe,
    Recommend,
    Autopilot,
}

impl Default for AutopilotLevel {
    fn default() -> Self {
        AutopilotLevel::Disabled
    }
}

/// Anomaly kind recorded in the TSS `anomalies` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CpuSpike,
    MemoryLeak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub workload: WorkloadId,
    pub kind: AnomalyKind,
    pub detected_at: i64,
    pub severity: String,
    pub detail: String,
    pub dedup_key: String,
}
