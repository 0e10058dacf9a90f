//! Ensemble forecaster: a confidence-weighted blend of the other six families, for workloads
//! where no single pattern tag dominates strongly enough to trust one model alone.

use super::{ArimaForecaster, ForecastOutput, Forecaster, HoltWintersForecaster, MeanForecaster, ProphetLikeForecaster, SeasonalForecaster, TrendForecaster};
use crate::types::{Horizon, Sample};

const MODEL_ACCURACY: f64 = 0.80;

#[derive(Default)]
pub struct EnsembleForecaster;

impl Forecaster for EnsembleForecaster {
    fn model_tag(&self) -> &'static str {
        "ensemble"
    }

    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput> {
        let members: Vec<Box<dyn Forecaster>> = vec![
            Box::new(MeanForecaster::default()),
            Box::new(TrendForecaster::default()),
            Box::new(SeasonalForecaster::default()),
            Box::new(HoltWintersForecaster::default()),
            Box::new(ArimaForecaster::default()),
            Box::new(ProphetLikeForecaster::default()),
        ];

        let outputs: Vec<ForecastOutput> = members.iter().filter_map(|m| m.forecast(samples, horizon)).collect();
        if outputs.is_empty() {
            return None;
        }

        let weight_sum: f64 = outputs.iter().map(|o| o.model_accuracy).sum();
        if weight_sum.abs() < f64::EPSILON {
            return None;
        }

        let predicted = outputs.iter().map(|o| o.predicted_value * o.model_accuracy).sum::<f64>() / weight_sum;
        let lower = outputs.iter().map(|o| o.lower_bound * o.model_accuracy).sum::<f64>() / weight_sum;
        let upper = outputs.iter().map(|o| o.upper_bound * o.model_accuracy).sum::<f64>() / weight_sum;

        Some(ForecastOutput {
            predicted_value: predicted,
            lower_bound: lower.min(predicted),
            upper_bound: upper.max(predicted),
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
                timestamp: i as i64 * 3600,
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
    fn blends_members_when_enough_data() {
        let values: Vec<f64> = (0..48).map(|i| 100.0 + (i % 24) as f64 * 5.0).collect();
        let f = EnsembleForecaster::default();
        let out = f.forecast(&samples(&values), Horizon::OneHour).unwrap();
        assert!(out.predicted_value > 0.0);
        assert!(out.lower_bound <= out.predicted_value && out.predicted_value <= out.upper_bound);
    }

    #[test]
    fn returns_none_when_no_member_has_enough_data() {
        let f = EnsembleForecaster::default();
        assert!(f.forecast(&samples(&[1.0, 2.0]), Horizon::FifteenMin).is_none());
    }
}
