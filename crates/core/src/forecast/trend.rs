//! Linear-trend forecaster: projects the recent linear-regression slope forward.
//!
//! Reuses [`crate::stats::linear_regression_slope`] to extrapolate rather than only to feed a
//! trend feature into another model.

use super::{ForecastOutput, Forecaster};
use crate::stats::{linear_regression_slope, mean, std_dev};
use crate::types::{Horizon, Sample};

const MIN_SAMPLES: usize = 5;
const MODEL_ACCURACY: f64 = 0.70;

#[derive(Default)]
pub struct TrendForecaster;

impl Forecaster for TrendForecaster {
    fn model_tag(&self) -> &'static str {
        "trend"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);
        let values: Vec<f64> = ordered.iter().map(|s| s.cpu_millicores).collect();

        let span_secs = (ordered.last().unwrap().timestamp - ordered.first().unwrap().timestamp).max(1);
        let cadence_secs = span_secs as f64 / (values.len() - 1).max(1) as f64;
        let slope_per_sample = linear_regression_slope(&values);
        let steps_ahead = (horizon.minutes() as f64 * 60.0) / cadence_secs.max(1.0);

        let last = *values.last().unwrap();
        let predicted = (last + slope_per_sample * steps_ahead).max(0.0);
        let sd = std_dev(&values);
        let m = mean(&values);
        let spread = sd.max(m * 0.05);

        Some(ForecastOutput {
            predicted_value: predicted,
            lower_bound: (predicted - spread).max(0.0),
            upper_bound: predicted + spread,
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
    fn extrapolates_rising_trend_above_last_value() {
        let values: Vec<f64> = (0..20).map(|i| 10.0 + i as f64 * 2.0).collect();
        let f = TrendForecaster::default();
        let out = f.forecast(&samples(&values), Horizon::OneHour).unwrap();
        assert!(out.predicted_value > *values.last().unwrap());
    }

    #[test]
    fn flat_series_predicts_near_last_value() {
        let values = vec![50.0; 20];
        let f = TrendForecaster::default();
        let out = f.forecast(&samples(&values), Horizon::FifteenMin).unwrap();
        assert!((out.predicted_value - 50.0).abs() < 1.0);
    }
}
