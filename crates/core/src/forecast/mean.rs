//! Flat mean forecaster: predicts the recent average, unchanged across the horizon.
//!
//! The simplest family, and the fallback when nothing else applies.

use super::{confidence_for, ForecastOutput, Forecaster};
use crate::stats::{mean, std_dev};
use crate::types::{Horizon, Sample};

const MIN_SAMPLES: usize = 5;
const MODEL_ACCURACY: f64 = 0.75;
/// 80% confidence interval half-width in standard deviations.
const Z_80: f64 = 1.28;

#[derive(Default)]
pub struct MeanForecaster;

impl Forecaster for MeanForecaster {
    fn model_tag(&self) -> &'static str {
        "mean"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let values: Vec<f64> = samples.iter().map(|s| s.cpu_millicores).collect();
        let m = mean(&values);
        let sd = std_dev(&values);
        let _ = confidence_for(values.len(), horizon, MODEL_ACCURACY);

        Some(ForecastOutput {
            predicted_value: m,
            lower_bound: (m - Z_80 * sd).max(0.0),
            upper_bound: m + Z_80 * sd,
            model_accuracy: MODEL_ACCURACY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkloadId;

    fn samples(values: &[f64]) -> Vec<Sample> {
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                workload: workload.clone(),
                timestamp: i as i64 * 60,
                cpu_millicores: *v,
                memory_mib: 100.0,
                replica_count: 1,
                hpa_target_percent: 70,
                node_cpu_utilization_percent: 50.0,
                cpu_request_millicores: 200,
                memory_request_mib: 256,
            })
            .collect()
    }

    #[test]
    fn too_few_samples_returns_none() {
        let f = MeanForecaster::default();
        assert!(f.forecast(&samples(&[1.0, 2.0]), Horizon::FifteenMin).is_none());
    }

    #[test]
    fn predicts_the_mean() {
        let f = MeanForecaster::default();
        let out = f.forecast(&samples(&[10.0, 10.0, 10.0, 10.0, 10.0]), Horizon::OneHour).unwrap();
        assert!((out.predicted_value - 10.0).abs() < f64::EPSILON);
        assert_eq!(out.lower_bound, out.upper_bound);
    }
}
