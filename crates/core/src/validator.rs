//! Validator: closes out due prediction records against realized samples and maintains a
//! rolling per-(workload, model) accuracy/MAPE/RMSE so the forecaster dispatcher can decide
//! when to trust a single model over pattern-based selection.

use crate::tss::TimeSeriesStore;
use crate::types::WorkloadId;
use std::sync::Arc;
use tracing::debug;

/// Window over which rolling accuracy/MAPE/RMSE are computed.
pub const ROLLING_WINDOW: usize = 100;
/// Minimum closed records before a model's accuracy is considered trustworthy.
pub const MIN_TRUSTED_RECORDS: usize = 20;
/// Accuracy a model needs to clear to be trusted outright.
pub const TRUST_ACCURACY_THRESHOLD: f64 = 0.70;
/// A prediction's due sample must land within this many seconds of `due_at` to close it.
const MATCH_TOLERANCE_SECONDS: i64 = 150;

/// Config-sourced trust thresholds, overriding the module defaults above.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    pub min_accuracy: f64,
    pub min_samples: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_accuracy: TRUST_ACCURACY_THRESHOLD,
            min_samples: MIN_TRUSTED_RECORDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStats {
    pub model_tag: String,
    pub accuracy: f64,
    pub mape: f64,
    pub rmse: f64,
    pub record_count: usize,
}

pub struct Validator {
    tss: Arc<TimeSeriesStore>,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(tss: Arc<TimeSeriesStore>) -> Self {
        Self::with_config(tss, ValidatorConfig::default())
    }

    pub fn with_config(tss: Arc<TimeSeriesStore>, config: ValidatorConfig) -> Self {
        Self { tss, config }
    }

    /// Scans this workload's open predictions due by `now`, joins each against the closest
    /// sample within tolerance, and marks it realized. Predictions with no matching sample yet
    /// are left open for a later tick. Returns the number of records closed.
    pub fn close_due_predictions(&self, workload: &WorkloadId, now: i64) -> usize {
        let open = self.tss.read_open_predictions(workload, now);
        let mut closed = 0;
        for record in open {
            let due_at = record.due_at();
            let window = self.tss.read_samples(workload, due_at - MATCH_TOLERANCE_SECONDS, due_at + MATCH_TOLERANCE_SECONDS);
            let closest = window.iter().min_by_key(|s| (s.timestamp - due_at).abs());
            let Some(actual) = closest else {
                debug!(%workload, due_at, "no realized sample yet for due prediction, leaving open");
                continue;
            };
            if let Err(e) = self.tss.update_prediction(workload, record.issue_time, record.horizon, actual.cpu_millicores) {
                debug!(%workload, error = %e, "failed to close due prediction");
                continue;
            }
            closed += 1;
        }
        closed
    }

    /// Rolling accuracy/MAPE/RMSE for one model over its most recent `ROLLING_WINDOW` closed
    /// records for this workload. `None` if the model has no closed records at all.
    pub fn model_stats(&self, workload: &WorkloadId, model_tag: &str) -> Option<ModelStats> {
        let closed = self.tss.read_recent_predictions(workload, ROLLING_WINDOW * 10);
        let mut matching: Vec<_> = closed.into_iter().filter(|p| p.model_tag == model_tag).collect();
        matching.truncate(ROLLING_WINDOW);
        if matching.is_empty() {
            return None;
        }

        let n = matching.len();
        let accurate_count = matching.iter().filter(|p| p.accurate == Some(true)).count();
        let accuracy = accurate_count as f64 / n as f64;

        let mut ape_sum = 0.0;
        let mut se_sum = 0.0;
        let mut ape_n = 0usize;
        for p in &matching {
            let actual = p.realized_value.unwrap_or(p.predicted_value);
            let error = p.predicted_value - actual;
            se_sum += error * error;
            if actual.abs() > f64::EPSILON {
                ape_sum += (error / actual).abs();
                ape_n += 1;
            }
        }
        let mape = if ape_n > 0 { (ape_sum / ape_n as f64) * 100.0 } else { 0.0 };
        let rmse = (se_sum / n as f64).sqrt();

        Some(ModelStats {
            model_tag: model_tag.to_string(),
            accuracy,
            mape,
            rmse,
            record_count: n,
        })
    }

    /// Every model tag with at least one closed record for this workload, per `model_stats`.
    fn known_model_tags(&self, workload: &WorkloadId) -> Vec<String> {
        let closed = self.tss.read_recent_predictions(workload, ROLLING_WINDOW * 10);
        let mut tags: Vec<String> = closed.into_iter().map(|p| p.model_tag).collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// The forecaster dispatcher's "trusted model" input: the model with the highest accuracy
    /// among those clearing both the accuracy and record-count thresholds, if any.
    pub fn trusted_model(&self, workload: &WorkloadId) -> Option<(String, f64, usize)> {
        self.known_model_tags(workload)
            .into_iter()
            .filter_map(|tag| self.model_stats(workload, &tag))
            .filter(|s| s.accuracy >= self.config.min_accuracy && s.record_count >= self.config.min_samples)
            .max_by(|a, b| a.accuracy.partial_cmp(&b.accuracy).unwrap_or(std::cmp::Ordering::Equal))
            .map(|s| (s.model_tag, s.accuracy, s.record_count))
    }

    /// Gap between the top two known models' accuracies for this workload, the forecaster
    /// dispatcher's "is anyone clearly ahead" input. `None` with fewer than two known models.
    pub fn accuracy_spread(&self, workload: &WorkloadId) -> Option<f64> {
        let mut accuracies: Vec<f64> = self
            .known_model_tags(workload)
            .into_iter()
            .filter_map(|tag| self.model_stats(workload, &tag))
            .map(|s| s.accuracy)
            .collect();
        if accuracies.len() < 2 {
            return None;
        }
        accuracies.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        Some(accuracies[0] - accuracies[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Horizon, PredictionRecord, Sample};
    use tempfile::tempdir;

    fn store() -> Arc<TimeSeriesStore> {
        let dir = tempdir().unwrap();
        Arc::new(TimeSeriesStore::open(&dir.path().join("tss.bin")))
    }

    fn sample(workload: &WorkloadId, ts: i64, cpu: f64) -> Sample {
        Sample {
            workload: workload.clone(),
            timestamp: ts,
            cpu_millicores: cpu,
            memory_mib: 128.0,
            replica_count: 2,
            hpa_target_percent: 70,
            node_cpu_utilization_percent: 40.0,
            cpu_request_millicores: 200,
            memory_request_mib: 256,
        }
    }

    fn prediction(workload: &WorkloadId, issue_time: i64, predicted: f64) -> PredictionRecord {
        PredictionRecord {
            workload: workload.clone(),
            issue_time,
            horizon: Horizon::FifteenMin,
            predicted_value: predicted,
            lower_bound: predicted - 10.0,
            upper_bound: predicted + 10.0,
            model_tag: "mean".into(),
            confidence: 0.6,
            realized_value: None,
            accurate: None,
        }
    }

    #[test]
    fn closes_predictions_with_a_matching_sample() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        tss.append_prediction(prediction(&workload, 0, 100.0)).unwrap();
        tss.append_sample(sample(&workload, 15 * 60 + 10, 103.0)).unwrap();

        let validator = Validator::new(tss.clone());
        let closed = validator.close_due_predictions(&workload, 15 * 60 + 300);
        assert_eq!(closed, 1);

        let recent = tss.read_recent_predictions(&workload, 10);
        assert_eq!(recent[0].accurate, Some(true));
    }

    #[test]
    fn leaves_prediction_open_without_a_matching_sample() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        tss.append_prediction(prediction(&workload, 0, 100.0)).unwrap();

        let validator = Validator::new(tss.clone());
        let closed = validator.close_due_predictions(&workload, 15 * 60 + 300);
        assert_eq!(closed, 0);
    }

    #[test]
    fn model_stats_none_without_closed_records() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        let validator = Validator::new(tss);
        assert!(validator.model_stats(&workload, "mean").is_none());
    }

    #[test]
    fn trusted_model_requires_both_accuracy_and_record_count() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        for i in 0..25 {
            let issue_time = i as i64 * 1000;
            tss.append_prediction(prediction(&workload, issue_time, 100.0)).unwrap();
            tss.update_prediction(&workload, issue_time, Horizon::FifteenMin, 101.0).unwrap();
        }

        let validator = Validator::new(tss);
        let trusted = validator.trusted_model(&workload).expect("mean model should be trusted");
        assert_eq!(trusted.0, "mean");
        assert!(trusted.1 >= TRUST_ACCURACY_THRESHOLD);
        assert_eq!(trusted.2, 25);
    }

    #[test]
    fn model_not_trusted_below_record_count() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        for i in 0..5 {
            let issue_time = i as i64 * 1000;
            tss.append_prediction(prediction(&workload, issue_time, 100.0)).unwrap();
            tss.update_prediction(&workload, issue_time, Horizon::FifteenMin, 101.0).unwrap();
        }

        let validator = Validator::new(tss);
        assert!(validator.trusted_model(&workload).is_none());
    }

    #[test]
    fn accuracy_spread_none_with_fewer_than_two_models() {
        let tss = store();
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        tss.append_prediction(prediction(&workload, 0, 100.0)).unwrap();
        tss.update_prediction(&workload, 0, Horizon::FifteenMin, 101.0).unwrap();

        let validator = Validator::new(tss);
        assert!(validator.accuracy_spread(&workload).is_none());
    }
}
