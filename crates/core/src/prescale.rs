//! Pre-Scale Manager: raises `minReplicas` ahead of a predicted spike and rolls the override
//! back once the deadline passes, the peak has passed, or the workload disappears.
//!
//! State machine per workload: `idle -(trigger)-> pre_scaling -(expiry|peak-passed)->
//! rolling_back -> idle`. `rolling_back` is modeled as a transient state collapsed into the
//! same `evaluate()` call that detects the rollback condition, since the Metrics Client already
//! owns patch-failure retry; the state machine here only tracks logical phase.

use crate::types::{PreScaleProfile, PreScaleState, WorkloadId};
use std::collections::HashMap;
use std::sync::Mutex;

pub const PRESCALE_THRESHOLD_PERCENT: f64 = 75.0;
pub const TRIGGER_COOLDOWN_SECONDS: i64 = 15 * 60;
pub const ROLLBACK_MINUTES: i64 = 60;
pub const PEAK_PASSED_FACTOR: f64 = 0.6;

/// Config-sourced knobs for trigger/rollback, overriding the module defaults above.
#[derive(Debug, Clone, Copy)]
pub struct PreScaleConfig {
    /// Minimum predicted CPU percent (of target) to trigger, as a `[0, 1]` fraction.
    pub threshold_fraction: f64,
    /// Global confidence floor; the arbiter's per-priority gate is never weakened below this.
    pub min_confidence: f32,
    pub rollback_minutes: i64,
    pub cooldown_minutes: u32,
}

impl Default for PreScaleConfig {
    fn default() -> Self {
        Self {
            threshold_fraction: PRESCALE_THRESHOLD_PERCENT / 100.0,
            min_confidence: 0.0,
            rollback_minutes: ROLLBACK_MINUTES,
            cooldown_minutes: (TRIGGER_COOLDOWN_SECONDS / 60) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreScaleAction {
    pub new_min: u32,
    pub reason: String,
}

/// Inputs the Control Loop gathers for one workload's pre-scale evaluation this tick.
pub struct EvaluationInput {
    pub now: i64,
    /// Predicted CPU percent and confidence of the maximum-confidence prediction over horizons
    /// at or below `max_horizon`, if any prediction exists.
    pub max_confidence_prediction: Option<(f64, f32)>,
    /// Arbiter's pre-scale confidence gate for this workload's priority tier.
    pub confidence_threshold: f32,
    pub current_replicas: u32,
    pub target_cpu_percent: u32,
    /// Realized CPU percent averaged over the last 10 minutes, if samples exist.
    pub realized_cpu_10min_avg: Option<f64>,
    pub workload_gone: bool,
}

pub struct PreScaleManager {
    profiles: Mutex<HashMap<WorkloadId, PreScaleProfile>>,
    config: PreScaleConfig,
}

impl Default for PreScaleManager {
    fn default() -> Self {
        Self::new(PreScaleConfig::default())
    }
}

impl PreScaleManager {
    pub fn new(config: PreScaleConfig) -> Self {
        Self { profiles: Mutex::new(HashMap::new()), config }
    }

    /// Creates an idle profile on first observation of a workload; a
    /// no-op if one already exists.
    pub fn ensure_profile(&self, workload: &WorkloadId, original_min: u32, original_max: u32) {
        let mut profiles = self.profiles.lock().expect("prescale lock poisoned");
        profiles
            .entry(workload.clone())
            .or_insert_with(|| PreScaleProfile::new_idle(workload.clone(), original_min, original_max));
    }

    pub fn profile(&self, workload: &WorkloadId) -> Option<PreScaleProfile> {
        self.profiles.lock().expect("prescale lock poisoned").get(workload).cloned()
    }

    /// Garbage-collects a workload's profile once Discovery reports it gone and it is back at
    /// `idle` (no outstanding override to roll back).
    pub fn remove_if_idle(&self, workload: &WorkloadId) {
        let mut profiles = self.profiles.lock().expect("prescale lock poisoned");
        if profiles.get(workload).map(|p| p.state == PreScaleState::Idle).unwrap_or(false) {
            profiles.remove(workload);
        }
    }

    /// Runs one tick's worth of trigger/rollback evaluation for `workload`. Returns the
    /// `minReplicas` patch to issue, if the state transitioned.
    pub fn evaluate(&self, workload: &WorkloadId, input: EvaluationInput) -> Option<PreScaleAction> {
        let mut profiles = self.profiles.lock().expect("prescale lock poisoned");
        let profile = profiles.get_mut(workload)?;

        if input.workload_gone {
            if profile.state != PreScaleState::Idle {
                let original_min = profile.original_min_replicas;
                Self::reset_to_idle(profile, original_min);
                return Some(PreScaleAction { new_min: original_min, reason: "workload gone".into() });
            }
            return None;
        }

        match profile.state {
            PreScaleState::Idle => {
                let (predicted_percent, confidence) = input.max_confidence_prediction?;
                let cooldown_seconds = self.config.cooldown_minutes as i64 * 60;
                let cooldown_ok = profile
                    .last_trigger_time
                    .map(|t| input.now - t >= cooldown_seconds)
                    .unwrap_or(true);
                let confidence_threshold = input.confidence_threshold.max(self.config.min_confidence);
                if predicted_percent < self.config.threshold_fraction * 100.0 || (confidence as f32) < confidence_threshold || !cooldown_ok {
                    return None;
                }

                let new_min = compute_new_min(
                    input.current_replicas,
                    predicted_percent,
                    input.target_cpu_percent,
                    profile.original_min_replicas,
                    profile.original_max_replicas,
                    profile.current_min_replicas,
                );
                profile.state = PreScaleState::PreScaling;
                profile.current_min_replicas = new_min;
                profile.override_start = Some(input.now);
                profile.rollback_at = Some(input.now + self.config.rollback_minutes * 60);
                profile.reason = format!("predicted {predicted_percent:.1}% cpu at confidence {confidence:.2}");
                profile.pre_scale_count += 1;
                profile.last_trigger_time = Some(input.now);

                Some(PreScaleAction { new_min, reason: profile.reason.clone() })
            }
            PreScaleState::PreScaling => {
                let deadline_passed = input.now >= profile.rollback_at.unwrap_or(i64::MAX);
                let peak_passed = input
                    .realized_cpu_10min_avg
                    .map(|avg| avg <= input.target_cpu_percent as f64 * PEAK_PASSED_FACTOR)
                    .unwrap_or(false);
                if !deadline_passed && !peak_passed {
                    return None;
                }

                if peak_passed {
                    profile.successful_prediction_count += 1;
                }
                let original_min = profile.original_min_replicas;
                profile.state = PreScaleState::RollingBack;
                Self::reset_to_idle(profile, original_min);
                Some(PreScaleAction { new_min: original_min, reason: "rollback".into() })
            }
            PreScaleState::RollingBack => {
                let original_min = profile.original_min_replicas;
                Self::reset_to_idle(profile, original_min);
                None
            }
        }
    }

    /// Forces a pre-scale with an explicit `minReplicas`, clamped to `[original_min,
    /// original_max]`.
    pub fn manual_override(&self, workload: &WorkloadId, requested_min: u32, now: i64) -> Option<PreScaleAction> {
        let mut profiles = self.profiles.lock().expect("prescale lock poisoned");
        let profile = profiles.get_mut(workload)?;
        let new_min = requested_min.clamp(profile.original_min_replicas, profile.original_max_replicas);
        profile.state = PreScaleState::PreScaling;
        profile.current_min_replicas = new_min;
        profile.override_start = Some(now);
        profile.rollback_at = Some(now + self.config.rollback_minutes * 60);
        profile.reason = "manual override".into();
        profile.pre_scale_count += 1;
        profile.last_trigger_time = Some(now);
        Some(PreScaleAction { new_min, reason: profile.reason.clone() })
    }

    /// Forces an immediate rollback regardless of current state.
    pub fn manual_rollback(&self, workload: &WorkloadId) -> Option<PreScaleAction> {
        let mut profiles = self.profiles.lock().expect("prescale lock poisoned");
        let profile = profiles.get_mut(workload)?;
        if profile.state == PreScaleState::Idle {
            return None;
        }
        let original_min = profile.original_min_replicas;
        Self::reset_to_idle(profile, original_min);
        Some(PreScaleAction { new_min: original_min, reason: "manual rollback".into() })
    }

    fn reset_to_idle(profile: &mut PreScaleProfile, original_min: u32) {
        profile.state = PreScaleState::Idle;
        profile.current_min_replicas = original_min;
        profile.override_start = None;
        profile.rollback_at = None;
    }
}

/// `ceil(current_replicas * predicted_percent / target_cpu_percent)`, clamped to
/// `[original_min, original_max]` and never decreased below the currently active minimum.
fn compute_new_min(current_replicas: u32, predicted_percent: f64, target_cpu_percent: u32, original_min: u32, original_max: u32, current_min: u32) -> u32 {
    let raw = (current_replicas as f64 * predicted_percent / target_cpu_percent.max(1) as f64).ceil() as i64;
    raw.clamp(original_min as i64, original_max as i64).max(current_min as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> WorkloadId {
        WorkloadId::new("ns", "svc", "svc-hpa")
    }

    fn input(now: i64) -> EvaluationInput {
        EvaluationInput {
            now,
            max_confidence_prediction: Some((80.0, 0.9)),
            confidence_threshold: 0.6,
            current_replicas: 4,
            target_cpu_percent: 70,
            realized_cpu_10min_avg: None,
            workload_gone: false,
        }
    }

    #[test]
    fn triggers_pre_scale_when_thresholds_clear() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);

        let action = mgr.evaluate(&w, input(0)).expect("should trigger");
        assert!(action.new_min >= 4);
        assert_eq!(mgr.profile(&w).unwrap().state, PreScaleState::PreScaling);
    }

    #[test]
    fn does_not_trigger_below_confidence_threshold() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);

        let mut low_confidence = input(0);
        low_confidence.max_confidence_prediction = Some((80.0, 0.3));
        assert!(mgr.evaluate(&w, low_confidence).is_none());
    }

    #[test]
    fn respects_trigger_cooldown() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);
        mgr.evaluate(&w, input(0)).unwrap();
        mgr.manual_rollback(&w).unwrap();

        assert!(mgr.evaluate(&w, input(100)).is_none());
        assert!(mgr.evaluate(&w, input(15 * 60 + 1)).is_some());
    }

    #[test]
    fn rolls_back_at_deadline() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);
        mgr.evaluate(&w, input(0)).unwrap();

        let mut past_deadline = input(ROLLBACK_MINUTES * 60 + 1);
        past_deadline.max_confidence_prediction = None;
        let action = mgr.evaluate(&w, past_deadline).expect("should roll back");
        assert_eq!(action.new_min, 2);
        assert_eq!(mgr.profile(&w).unwrap().state, PreScaleState::Idle);
    }

    #[test]
    fn rolls_back_when_peak_passed() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);
        mgr.evaluate(&w, input(0)).unwrap();

        let mut peak_passed = input(100);
        peak_passed.max_confidence_prediction = None;
        peak_passed.realized_cpu_10min_avg = Some(10.0);
        let action = mgr.evaluate(&w, peak_passed).expect("should roll back");
        assert_eq!(action.new_min, 2);
        assert_eq!(mgr.profile(&w).unwrap().successful_prediction_count, 1);
    }

    #[test]
    fn workload_gone_forces_rollback_and_can_be_gced() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);
        mgr.evaluate(&w, input(0)).unwrap();

        let mut gone = input(100);
        gone.workload_gone = true;
        let action = mgr.evaluate(&w, gone).expect("should roll back on gone");
        assert_eq!(action.new_min, 2);

        mgr.remove_if_idle(&w);
        assert!(mgr.profile(&w).is_none());
    }

    #[test]
    fn manual_override_clamps_to_original_bounds() {
        let mgr = PreScaleManager::new(PreScaleConfig::default());
        let w = workload();
        mgr.ensure_profile(&w, 2, 10);

        let action = mgr.manual_override(&w, 99, 0).unwrap();
        assert_eq!(action.new_min, 10);
    }

    #[test]
    fn new_min_never_decreases_from_current() {
        assert_eq!(compute_new_min(4, 50.0, 70, 1, 10, 5), 5);
    }
}
