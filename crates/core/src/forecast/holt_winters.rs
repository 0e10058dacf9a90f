//! Holt-Winters triple exponential smoothing (level, trend, and a fixed-length seasonal
//! component), for `periodic`-tagged workloads.

use super::{ForecastOutput, Forecaster};
use crate::stats::std_dev;
use crate::types::{Horizon, Sample};

const MIN_SAMPLES: usize = 24;
const MODEL_ACCURACY: f64 = 0.78;
const ALPHA: f64 = 0.3;
const BETA: f64 = 0.1;
const GAMMA: f64 = 0.2;
const SEASON_LENGTH: usize = 24;

#[derive(Default)]
pub struct HoltWintersForecaster;

impl Forecaster for HoltWintersForecaster {
    fn model_tag(&self) -> &'static str {
        "holt_winters"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);
        let values: Vec<f64> = ordered.iter().map(|s| s.cpu_millicores).collect();

        let season = SEASON_LENGTH.min(values.len() / 2).max(1);
        let second_block_end = (season * 2).min(values.len());
        let mut level = values[..season].iter().sum::<f64>() / season as f64;
        let second_block_mean = values[season..second_block_end].iter().sum::<f64>() / (second_block_end - season).max(1) as f64;
        let mut trend = (second_block_mean - level) / season as f64;
        let mut seasonal: Vec<f64> = values[..season].iter().map(|v| v - level).collect();

        for (i, &v) in values.iter().enumerate().skip(season) {
            let s_idx = i % season;
            let last_level = level;
            level = ALPHA * (v - seasonal[s_idx]) + (1.0 - ALPHA) * (level + trend);
            trend = BETA * (level - last_level) + (1.0 - BETA) * trend;
            seasonal[s_idx] = GAMMA * (v - level) + (1.0 - GAMMA) * seasonal[s_idx];
        }

        let cadence_secs = if ordered.len() > 1 {
            (ordered.last().unwrap().timestamp - ordered.first().unwrap().timestamp) as f64 / (ordered.len() - 1) as f64
        } else {
            60.0
        };
        let steps_ahead = ((horizon.minutes() as f64 * 60.0) / cadence_secs.max(1.0)).round() as usize;
        let s_idx = (values.len() + steps_ahead) % season;
        let predicted = (level + trend * steps_ahead as f64 + seasonal[s_idx]).max(0.0);

        let sd = std_dev(&values);
        Some(ForecastOutput {
            predicted_value: predicted,
            lower_bound: (predicted - sd).max(0.0),
            upper_bound: predicted + sd,
            model_accuracy: MODEL_ACCURACY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkloadId;

    fn periodic_samples() -> Vec<Sample> {
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        (0..96)
            .map(|i| {
                let hour = i % 24;
                let value = 100.0 + if (9..17).contains(&hour) { 200.0 } else { 0.0 };
                Sample {
                    workload: workload.clone(),
                    timestamp: i as i64 * 3600,
                    cpu_millicores: value,
                    memory_mib: 100.0,
                    replica_count: 1,
                    hpa_target_percent: 70,
                    node_cpu_utilization_percent: 50.0,
                    cpu_request_millicores: 200,
                    memory_request_mib: 256,
                }
            })
            .collect()
    }

    #[test]
    fn too_few_samples_returns_none() {
        let f = HoltWintersForecaster::default();
        assert!(f.forecast(&periodic_samples()[..10], Horizon::OneHour).is_none());
    }

    #[test]
    fn produces_a_bounded_forecast() {
        let f = HoltWintersForecaster::default();
        let out = f.forecast(&periodic_samples(), Horizon::OneHour).unwrap();
        assert!(out.predicted_value >= 0.0);
        assert!(out.lower_bound <= out.predicted_value);
        assert!(out.upper_bound >= out.predicted_value);
    }
}
