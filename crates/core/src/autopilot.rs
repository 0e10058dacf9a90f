//! Autopilot: learns a per-workload CPU/memory request baseline, recommends or applies a
//! change, and monitors for regressions with automatic rollback.
//!
//! The apply/monitor/rollback path follows a snapshot-then-validate-then-rollback-on-deviation
//! shape: `apply()` snapshots the old request values and installs the new ones, `monitor_check()`
//! watches for deviation past the tolerance window, and a triggered rollback restores the
//! snapshot.

use crate::stats::{coefficient_of_variation, percentile};
use crate::types::{AutopilotLevel, AutopilotSnapshot, AutopilotState, LearningState, Priority, WorkloadId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Default learning window before a workload's baseline is established.
pub const LEARN_DAYS: i64 = 7;
pub const MIN_CPU_MILLICORES: u32 = 50;
pub const MIN_MEMORY_MIB: u32 = 64;
pub const CPU_BUFFER: f64 = 0.20;
pub const MEM_BUFFER: f64 = 0.25;
pub const NOISE_FLOOR_FRACTION: f64 = 0.05;
pub const MAX_CHANGE_PERCENT: f64 = 30.0;
pub const MIN_CONFIDENCE: f32 = 0.80;
pub const COOLDOWN_HOURS: i64 = 24;
pub const HIGH_TIER_REDUCTION_APPROVAL_PERCENT: f64 = 15.0;
pub const MONITOR_MINUTES: i64 = 10;
pub const MAX_RESTART_INCREASE: u64 = 2;
pub const MAX_OOM_INCREASE: u64 = 1;
pub const MAX_READINESS_DROP_PERCENT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
}

/// Input to the five safety gates that must all hold before an `autopilot`-level apply.
pub struct GateInput {
    pub priority: Priority,
    pub confidence: f32,
    pub now: i64,
    pub is_reduction: bool,
    pub change_percent: f64,
    pub has_active_prescale: bool,
    pub manual_approved: bool,
}

pub enum MonitorOutcome {
    /// No pending snapshot for this workload; nothing to monitor.
    Idle,
    /// Still inside the monitor window, no trigger yet.
    Continue,
    /// Monitor window elapsed without a trigger; change confirmed, snapshot discarded.
    Confirmed,
    /// A regression trigger fired; restore the snapshot's requests.
    RolledBack(AutopilotSnapshot),
}

pub struct AutopilotManager {
    states: Mutex<HashMap<WorkloadId, AutopilotState>>,
}

impl Default for AutopilotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AutopilotManager {
    pub fn new() -> Self {
        Self { states: Mutex::new(HashMap::new()) }
    }

    pub fn state(&self, workload: &WorkloadId) -> Option<AutopilotState> {
        self.states.lock().expect("autopilot lock poisoned").get(workload).cloned()
    }

    pub fn remove(&self, workload: &WorkloadId) {
        self.states.lock().expect("autopilot lock poisoned").remove(workload);
    }

    /// Advances the learning-state machine for one tick given the workload's CPU/memory samples
    /// over its full observed history. `auto_graduate` moves straight to `graduated` once the
    /// baseline is established instead of stopping at `completed`.
    pub fn advance_learning(&self, workload: &WorkloadId, now: i64, cpu_samples: &[f64], memory_samples: &[f64], auto_graduate: bool) {
        let mut states = self.states.lock().expect("autopilot lock poisoned");
        let state = states.entry(workload.clone()).or_insert_with(|| AutopilotState::new(workload.clone()));

        match state.learning_state {
            LearningState::NotStarted => {
                if !cpu_samples.is_empty() {
                    state.learning_state = LearningState::Learning;
                    state.learning_start = Some(now);
                }
            }
            LearningState::Learning => {
                state.sample_count = cpu_samples.len() as u64;
                let days_observed = state.learning_start.map(|start| (now - start) / 86_400).unwrap_or(0);
                if days_observed >= LEARN_DAYS {
                    let cpu_p95 = percentile(cpu_samples, 95.0);
                    let mem_p95 = percentile(memory_samples, 95.0);
                    let day_factor = (days_observed as f64 / LEARN_DAYS as f64).min(1.0);
                    let cv = coefficient_of_variation(cpu_samples);
                    let attenuation = (1.0 - cv.min(1.0)).max(0.1);
                    let confidence = (day_factor * attenuation).clamp(0.0, 1.0) as f32;

                    state.baseline_cpu_p95 = Some(cpu_p95);
                    state.baseline_memory_p95 = Some(mem_p95);
                    state.confidence = confidence;
                    state.learning_state = if auto_graduate { LearningState::Graduated } else { LearningState::Completed };
                }
            }
            LearningState::Completed | LearningState::Graduated => {}
        }
    }

    /// The recommendation for a `completed`/`graduated` workload, or `None` if learning isn't
    /// done yet, the change is within the noise floor for both resources, or neither resource
    /// has a baseline.
    pub fn recommend(&self, workload: &WorkloadId, current_cpu_request: u32, current_memory_mib: u32) -> Option<Recommendation> {
        let states = self.states.lock().expect("autopilot lock poisoned");
        let state = states.get(workload)?;
        if !matches!(state.learning_state, LearningState::Completed | LearningState::Graduated) {
            return None;
        }
        let cpu_p95 = state.baseline_cpu_p95?;
        let mem_p95 = state.baseline_memory_p95?;

        let cpu_rec = clamp_change(current_cpu_request as f64, (cpu_p95 * (1.0 + CPU_BUFFER)).ceil().max(MIN_CPU_MILLICORES as f64));
        let mem_rec = clamp_change(current_memory_mib as f64, (mem_p95 * (1.0 + MEM_BUFFER)).ceil().max(MIN_MEMORY_MIB as f64));

        let cpu_changed = relative_change(current_cpu_request as f64, cpu_rec) >= NOISE_FLOOR_FRACTION;
        let mem_changed = relative_change(current_memory_mib as f64, mem_rec) >= NOISE_FLOOR_FRACTION;
        if !cpu_changed && !mem_changed {
            return None;
        }

        Some(Recommendation {
            cpu_request_millicores: cpu_rec.round() as u32,
            memory_request_mib: mem_rec.round() as u32,
        })
    }

    /// Evaluates the five safety gates for an `autopilot`-level apply. `Ok(())` if all hold.
    pub fn check_gates(&self, workload: &WorkloadId, input: &GateInput) -> Result<(), String> {
        if input.confidence < MIN_CONFIDENCE {
            return Err(format!("confidence {:.2} below minimum {:.2}", input.confidence, MIN_CONFIDENCE));
        }
        let states = self.states.lock().expect("autopilot lock poisoned");
        if let Some(state) = states.get(workload) {
            if let Some(last_change) = state.last_change_time {
                let elapsed_hours = (input.now - last_change) as f64 / 3600.0;
                if elapsed_hours < COOLDOWN_HOURS as f64 {
                    return Err(format!("cooldown not elapsed: {elapsed_hours:.1}h of {COOLDOWN_HOURS}h"));
                }
            }
        }
        drop(states);

        if input.priority == Priority::Critical {
            return Err("critical priority requires manual approval".into());
        }
        if input.priority == Priority::High && input.is_reduction && input.change_percent > HIGH_TIER_REDUCTION_APPROVAL_PERCENT && !input.manual_approved {
            return Err("high-priority reduction over 15% requires manual approval".into());
        }
        if input.is_reduction && input.has_active_prescale {
            return Err("reduction blocked by active pre-scale override".into());
        }
        if input.change_percent > MAX_CHANGE_PERCENT {
            return Err(format!("change {:.1}% exceeds maximum {MAX_CHANGE_PERCENT}%", input.change_percent));
        }
        Ok(())
    }

    /// Snapshots the pre-change state, records the applied requests, and starts the monitor
    /// window.
    pub fn apply(&self, workload: &WorkloadId, now: i64, snapshot: AutopilotSnapshot, new_cpu_request: u32, new_memory_mib: u32) {
        let mut states = self.states.lock().expect("autopilot lock poisoned");
        let state = states.entry(workload.clone()).or_insert_with(|| AutopilotState::new(workload.clone()));
        state.pending_snapshot = Some(snapshot);
        state.last_applied_cpu_millicores = Some(new_cpu_request);
        state.last_applied_memory_mib = Some(new_memory_mib);
        state.last_change_time = Some(now);
        state.monitor_deadline = Some(now + MONITOR_MINUTES * 60);
        state.cooldown_extended = false;
    }

    /// Polled every 30s by the ancillary sweep. Reports whether to roll back, keep
    /// monitoring, or confirm the change.
    pub fn monitor_check(&self, workload: &WorkloadId, now: i64, restart_increase: u64, oom_increase: u64, readiness_drop_percent: f64) -> MonitorOutcome {
        let mut states = self.states.lock().expect("autopilot lock poisoned");
        let Some(state) = states.get_mut(workload) else {
            return MonitorOutcome::Idle;
        };
        let Some(snapshot) = state.pending_snapshot.clone() else {
            return MonitorOutcome::Idle;
        };

        let triggered = restart_increase > MAX_RESTART_INCREASE || oom_increase > MAX_OOM_INCREASE || readiness_drop_percent > MAX_READINESS_DROP_PERCENT;
        if triggered {
            state.pending_snapshot = None;
            state.cooldown_extended = true;
            state.last_change_time = Some(now);
            return MonitorOutcome::RolledBack(snapshot);
        }

        if now >= state.monitor_deadline.unwrap_or(i64::MAX) {
            state.pending_snapshot = None;
            return MonitorOutcome::Confirmed;
        }

        MonitorOutcome::Continue
    }

    /// Forces an immediate rollback regardless of the monitor deadline.
    pub fn manual_rollback(&self, workload: &WorkloadId, now: i64) -> Option<AutopilotSnapshot> {
        let mut states = self.states.lock().expect("autopilot lock poisoned");
        let state = states.get_mut(workload)?;
        let snapshot = state.pending_snapshot.take()?;
        state.cooldown_extended = true;
        state.last_change_time = Some(now);
        Some(snapshot)
    }
}

/// `None` is "still disabled"; `AutopilotLevel::Observe` records only, `Recommend` surfaces
/// without applying, `Autopilot` applies. Kept as a free function since it is a pure mapping
/// the Control Loop consults before calling `apply`.
pub fn may_apply(level: AutopilotLevel) -> bool {
    level == AutopilotLevel::Autopilot
}

pub fn may_recommend(level: AutopilotLevel) -> bool {
    matches!(level, AutopilotLevel::Recommend | AutopilotLevel::Autopilot)
}

fn relative_change(current: f64, target: f64) -> f64 {
    if current.abs() < f64::EPSILON {
        if target.abs() < f64::EPSILON {
            0.0
        } else {
            1.0
        }
    } else {
        (target - current).abs() / current.abs()
    }
}

/// Clamps `target` to within `MAX_CHANGE_PERCENT` of `current`, moving only partway toward the
/// recommendation when it would otherwise exceed that bound.
fn clamp_change(current: f64, target: f64) -> f64 {
    let max_delta = current * (MAX_CHANGE_PERCENT / 100.0);
    let delta = target - current;
    if delta.abs() <= max_delta {
        target
    } else {
        current + max_delta.copysign(delta)
    }
}
