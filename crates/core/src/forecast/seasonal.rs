//! Seasonal forecaster: averages historical usage in the same hour-of-day bucket as the
//! forecast's target time, for `weekly_seasonal`/`monthly_seasonal`-tagged workloads.

use super::{ForecastOutput, Forecaster};
use crate::stats::std_dev;
use crate::types::{Horizon, Sample};
use chrono::{DateTime, Timelike, Utc};

const MIN_SAMPLES: usize = 10;
const MODEL_ACCURACY: f64 = 0.72;

#[derive(Default)]
pub struct SeasonalForecaster;

impl Forecaster for SeasonalForecaster {
    fn model_tag(&self) -> &'static str {
        "seasonal"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let last_ts = samples.iter().map(|s| s.timestamp).max()?;
        let target_ts = last_ts + horizon.minutes() * 60;
        let target_hour = hour_of(target_ts);

        let bucket: Vec<f64> = samples
            .iter()
            .filter(|s| hour_of(s.timestamp) == target_hour)
            .map(|s| s.cpu_millicores)
            .collect();

        let values = if bucket.len() >= 3 {
            bucket
        } else {
            samples.iter().map(|s| s.cpu_millicores).collect()
        };

        let m = values.iter().sum::<f64>() / values.len() as f64;
        let sd = std_dev(&values);

        Some(ForecastOutput {
            predicted_value: m,
            lower_bound: (m - sd).max(0.0),
            upper_bound: m + sd,
            model_accuracy: MODEL_ACCURACY,
        })
    }
}

fn hour_of(ts: i64) -> u32 {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now).hour()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkloadId;

    fn samples_with_hourly_pattern() -> Vec<Sample> {
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        // Three synthetic days, hour 9 always busy, hour 3 always quiet.
        (0..72)
            .map(|i| {
                let hour = i % 24;
                let value = if hour == 9 { 500.0 } else if hour == 3 { 50.0 } else { 200.0 };
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
    fn picks_the_matching_hour_bucket() {
        let samples = samples_with_hourly_pattern();
        let f = SeasonalForecaster::default();
        // last sample timestamp is 71*3600 -> hour 23; +1h horizon lands on hour 0.
        let out = f.forecast(&samples, Horizon::OneHour).unwrap();
        assert!(out.predicted_value < 300.0);
    }
}
