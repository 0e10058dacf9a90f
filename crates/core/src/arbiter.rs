//! Priority Arbiter: maps a workload's priority tier and the cluster's recent CPU pressure to
//! an HPA target, a pre-scale confidence gate, scale-speed multipliers, and preemption rights
//! over lower-tier workloads. Also orders the Control Loop's per-tick iteration.

use crate::types::{Priority, WorkloadId};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Lower bound on any HPA target this crate writes, per the `[MIN_TARGET, MAX_TARGET]` invariant.
pub const MIN_TARGET: u32 = 20;
pub const MAX_TARGET: u32 = 95;

const HIGH_PRESSURE_PERCENT: f64 = 85.0;
const LOW_PRESSURE_PERCENT: f64 = 40.0;
const PREEMPTION_PRESSURE_PERCENT: f64 = 80.0;
const PREEMPTION_BUMP: u32 = 5;
const PREEMPTION_COOLDOWN_SECONDS: i64 = 5 * 60;
const PRESSURE_WINDOW: usize = 10;

fn base_target(priority: Priority) -> u32 {
    match priority {
        Priority::Critical => 55,
        Priority::High => 60,
        Priority::Medium => 70,
        Priority::Low => 80,
        Priority::BestEffort => 85,
    }
}

/// Default pre-scale confidence gate is 0.70; adjusted per tier.
pub fn prescale_confidence_threshold(priority: Priority) -> f64 {
    match priority {
        Priority::Critical => 0.60,
        Priority::High => 0.65,
        Priority::Medium => 0.70,
        Priority::Low => 0.75,
        Priority::BestEffort => 0.80,
    }
}

/// Advisory scale-up multiplier; scale-down is the reciprocal.
pub fn scale_speed_multiplier_up(priority: Priority) -> f64 {
    match priority {
        Priority::Critical => 2.0,
        Priority::High => 1.5,
        Priority::Medium => 1.0,
        Priority::Low => 0.5,
        Priority::BestEffort => 0.25,
    }
}

pub fn scale_speed_multiplier_down(priority: Priority) -> f64 {
    1.0 / scale_speed_multiplier_up(priority)
}

/// Tracks cluster pressure history and per-workload preemption cooldowns across ticks.
pub struct PriorityArbiter {
    pressure_history: Mutex<VecDeque<f64>>,
    preemption_cooldowns: Mutex<HashMap<WorkloadId, i64>>,
}

impl Default for PriorityArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityArbiter {
    pub fn new() -> Self {
        Self {
            pressure_history: Mutex::new(VecDeque::with_capacity(PRESSURE_WINDOW)),
            preemption_cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Records the current tick's max-node-utilization reading, keeping the last
    /// `PRESSURE_WINDOW` ticks.
    pub fn record_pressure(&self, pressure_percent: f64) {
        let mut history = self.pressure_history.lock().expect("arbiter lock poisoned");
        history.push_back(pressure_percent);
        while history.len() > PRESSURE_WINDOW {
            history.pop_front();
        }
    }

    pub fn current_pressure(&self) -> Option<f64> {
        self.pressure_history.lock().expect("arbiter lock poisoned").back().copied()
    }

    pub fn average_pressure(&self) -> Option<f64> {
        let history = self.pressure_history.lock().expect("arbiter lock poisoned");
        if history.is_empty() {
            return None;
        }
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }

    /// The HPA target for `priority` given the latest recorded cluster pressure, clamped to
    /// `[MIN_TARGET, MAX_TARGET]`.
    pub fn target_for(&self, priority: Priority) -> u32 {
        let pressure = self.current_pressure().unwrap_or(0.0);
        let base = base_target(priority) as i64;
        let adjusted = if pressure > HIGH_PRESSURE_PERCENT {
            match priority {
                Priority::Critical | Priority::High => base - 5,
                Priority::Low | Priority::BestEffort => base + 10,
                Priority::Medium => base,
            }
        } else if pressure < LOW_PRESSURE_PERCENT {
            match priority {
                Priority::Low | Priority::BestEffort => base + 5,
                _ => base,
            }
        } else {
            base
        };
        adjusted.clamp(MIN_TARGET as i64, MAX_TARGET as i64) as u32
    }

    /// If cluster pressure exceeds the preemption threshold, `preempting` is critical/high,
    /// `target_priority` is low/best_effort, and the target workload's cooldown has elapsed,
    /// raises its HPA target by `PREEMPTION_BUMP` and starts a fresh cooldown. Returns the
    /// bumped target, or `None` if preemption does not apply.
    pub fn try_preempt(&self, now: i64, preempting: Priority, target: &WorkloadId, target_priority: Priority) -> Option<u32> {
        let pressure = self.current_pressure().unwrap_or(0.0);
        if pressure <= PREEMPTION_PRESSURE_PERCENT {
            return None;
        }
        let preempting_eligible = matches!(preempting, Priority::Critical | Priority::High);
        let target_eligible = matches!(target_priority, Priority::Low | Priority::BestEffort);
        if !preempting_eligible || !target_eligible {
            return None;
        }

        let mut cooldowns = self.preemption_cooldowns.lock().expect("arbiter lock poisoned");
        if let Some(last) = cooldowns.get(target) {
            if now - last < PREEMPTION_COOLDOWN_SECONDS {
                return None;
            }
        }
        cooldowns.insert(target.clone(), now);
        Some((self.target_for(target_priority) + PREEMPTION_BUMP).min(MAX_TARGET))
    }

    /// Stable priority order for the Control Loop's per-tick iteration: critical first,
    /// best_effort last, ties broken by name.
    pub fn order<'a, T>(items: &'a mut [T], priority_of: impl Fn(&T) -> Priority, name_of: impl Fn(&T) -> &str) {
        items.sort_by(|a, b| priority_of(a).cmp(&priority_of(b)).then_with(|| name_of(a).cmp(name_of(b))));
    }
}
