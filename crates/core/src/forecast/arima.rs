//! Simplified ARIMA(1,1,1): first-difference the series, fit a one-lag AR term by OLS on the
//! differenced series, apply a one-lag MA correction from the last residual. For
//! `bursty`-tagged workloads, where a fixed mean or slope underfits the noise structure.

use super::{ForecastOutput, Forecaster};
use crate::stats::std_dev;
use crate::types::{Horizon, Sample};

const MIN_SAMPLES: usize = 10;
const MODEL_ACCURACY: f64 = 0.68;
const MA_THETA: f64 = 0.3;

#[derive(Default)]
pub struct ArimaForecaster;

impl Forecaster for ArimaForecaster {
    fn model_tag(&self) -> &'static str {
        "arima"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);
        let values: Vec<f64> = ordered.iter().map(|s| s.cpu_millicores).collect();

        let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let phi = ar1_coefficient(&diffs);

        let last_diff = *diffs.last().unwrap_or(&0.0);
        let residual = diffs.last().zip(diffs.get(diffs.len().wrapping_sub(2))).map(|(last, prev)| last - phi * prev).unwrap_or(0.0);

        let last_value = *values.last().unwrap();
        let cadence_secs = if ordered.len() > 1 {
            (ordered.last().unwrap().timestamp - ordered.first().unwrap().timestamp) as f64 / (ordered.len() - 1) as f64
        } else {
            60.0
        };
        let steps_ahead = ((horizon.minutes() as f64 * 60.0) / cadence_secs.max(1.0)).round().max(1.0);

        let mut predicted = last_value;
        let mut step_diff = phi * last_diff + MA_THETA * residual;
        for _ in 0..steps_ahead as u32 {
            predicted += step_diff;
            step_diff *= phi;
        }
        predicted = predicted.max(0.0);

        let sd = std_dev(&diffs).max(1.0);
        Some(ForecastOutput {
            predicted_value: predicted,
            lower_bound: (predicted - sd * steps_ahead.sqrt()).max(0.0),
            upper_bound: predicted + sd * steps_ahead.sqrt(),
            model_accuracy: MODEL_ACCURACY,
        })
    }
}

/// OLS estimate of the lag-1 AR coefficient on an already-differenced series.
fn ar1_coefficient(diffs: &[f64]) -> f64 {
    if diffs.len() < 2 {
        return 0.0;
    }
    let pairs: Vec<(f64, f64)> = diffs.windows(2).map(|w| (w[0], w[1])).collect();
    let denom: f64 = pairs.iter().map(|(x, _)| x * x).sum();
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    let numer: f64 = pairs.iter().map(|(x, y)| x * y).sum();
    (numer / denom).clamp(-0.95, 0.95)
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
        let f = ArimaForecaster::default();
        assert!(f.forecast(&samples(&[1.0, 2.0, 3.0]), Horizon::FifteenMin).is_none());
    }

    #[test]
    fn noisy_series_produces_bounded_forecast() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 + ((i * 37) % 23) as f64 * 4.0).collect();
        let f = ArimaForecaster::default();
        let out = f.forecast(&samples(&values), Horizon::ThirtyMin).unwrap();
        assert!(out.predicted_value >= 0.0);
        assert!(out.lower_bound <= out.upper_bound);
    }
}
