//! Prophet-like additive decomposition: trend (linear) + day-of-week seasonality + residual
//! noise band, for `event_driven`-tagged workloads whose level shifts around sparse events
//! rather than following a smooth curve.

use super::{ForecastOutput, Forecaster};
use crate::stats::{linear_regression_slope, mean, std_dev};
use crate::types::{Horizon, Sample};
use chrono::{DateTime, Datelike, Utc};

const MIN_SAMPLES: usize = 14;
const MODEL_ACCURACY: f64 = 0.70;

#[derive(Default)]
pub struct ProphetLikeForecaster;

impl Forecaster for ProphetLikeForecaster {
    fn model_tag(&self) -> &'static str {
        "prophet_like"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let mut ordered: Vec<&Sample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);
        let values: Vec<f64> = ordered.iter().map(|s| s.cpu_millicores).collect();

        let overall_mean = mean(&values);
        let slope = linear_regression_slope(&values);

        let mut day_offsets = [0.0f64; 7];
        let mut day_counts = [0u32; 7];
        for (s, v) in ordered.iter().zip(values.iter()) {
            let dow = weekday_index(s.timestamp);
            day_offsets[dow] += v - overall_mean;
            day_counts[dow] += 1;
        }
        for i in 0..7 {
            if day_counts[i] > 0 {
                day_offsets[i] /= day_counts[i] as f64;
            }
        }

        let last_ts = ordered.last().unwrap().timestamp;
        let target_ts = last_ts + horizon.minutes() * 60;
        let target_dow = weekday_index(target_ts);

        let span_secs = (last_ts - ordered.first().unwrap().timestamp).max(1);
        let cadence_secs = span_secs as f64 / (values.len() - 1).max(1) as f64;
        let steps_ahead = (horizon.minutes() as f64 * 60.0) / cadence_secs.max(1.0);
        let trend_component = *values.last().unwrap() + slope * steps_ahead;
        let predicted = (trend_component + day_offsets[target_dow]).max(0.0);

        let residuals: Vec<f64> = ordered
            .iter()
            .zip(values.iter())
            .map(|(s, v)| v - (overall_mean + day_offsets[weekday_index(s.timestamp)]))
            .collect();
        let noise = std_dev(&residuals).max(overall_mean * 0.05);

        Some(ForecastOutput {
            predicted_value: predicted,
            lower_bound: (predicted - noise).max(0.0),
            upper_bound: predicted + noise,
            model_accuracy: MODEL_ACCURACY,
        })
    }
}

fn weekday_index(ts: i64) -> usize {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_else(Utc::now)
        .weekday()
        .num_days_from_monday() as usize
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
                timestamp: i as i64 * 86_400,
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
        let f = ProphetLikeForecaster::default();
        assert!(f.forecast(&samples(&[1.0; 5]), Horizon::OneHour).is_none());
    }

    #[test]
    fn produces_a_bounded_forecast_for_spiky_series() {
        let values: Vec<f64> = (0..28).map(|i| if i % 7 == 0 { 400.0 } else { 80.0 }).collect();
        let f = ProphetLikeForecaster::default();
        let out = f.forecast(&samples(&values), Horizon::OneHour).unwrap();
        assert!(out.predicted_value >= 0.0);
        assert!(out.lower_bound <= out.upper_bound);
    }
}
