//! Forecasters: seven model families behind one trait, selected per workload by the pattern
//! tag the classifier assigned (or by the Validator's trusted model, once one earns it).
//!
//! One trait, seven classical statistical model structs behind a single
//! one-method-predicts-a-profile shape, with [`mean::MeanForecaster`] as the fallback when
//! nothing better applies.

mod arima;
mod ensemble;
mod holt_winters;
mod mean;
mod prophet_like;
mod seasonal;
mod trend;

pub use arima::ArimaForecaster;
pub use ensemble::EnsembleForecaster;
pub use holt_winters::HoltWintersForecaster;
pub use mean::MeanForecaster;
pub use prophet_like::ProphetLikeForecaster;
pub use seasonal::SeasonalForecaster;
pub use trend::TrendForecaster;

use crate::classifier::PatternTag;
use crate::types::{Horizon, Sample};

#[derive(Debug, Clone, Copy)]
pub struct ForecastOutput {
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Model-intrinsic accuracy estimate in `[0, 1]`, folded into the final confidence by
    /// [`confidence_for`]. Distinct from the Validator's measured rolling accuracy.
    pub model_accuracy: f64,
}

pub trait Forecaster: Send + Sync {
    fn model_tag(&self) -> &'static str;
    /// Returns `None` if the model has insufficient data to produce a forecast at all.
    fn forecast(&self, samples: &[Sample], horizon: Horizon) -> Option<ForecastOutput>;
}

/// `min(0.9, n/100) * (1 - horizon_min/480) * model_accuracy`.
pub fn confidence_for(sample_count: usize, horizon: Horizon, model_accuracy: f64) -> f32 {
    let data_term = (sample_count as f64 / 100.0).min(0.9);
    let horizon_term = 1.0 - (horizon.minutes() as f64 / 480.0);
    (data_term * horizon_term.max(0.0) * model_accuracy).clamp(0.0, 1.0) as f32
}

/// Picks a forecaster by data characteristics when no model has yet earned the Validator's
/// trust: the Validator's trusted model if it clears 70% accuracy and 20 records, else the
/// classifier's pick by data characteristics.
pub fn select_by_pattern(tag: PatternTag) -> Box<dyn Forecaster> {
    match tag {
        PatternTag::Unknown | PatternTag::Steady => Box::new(MeanForecaster::default()),
        PatternTag::Growing | PatternTag::Declining => Box::new(TrendForecaster::default()),
        PatternTag::WeeklySeasonal | PatternTag::MonthlySeasonal => Box::new(SeasonalForecaster::default()),
        PatternTag::Periodic => Box::new(HoltWintersForecaster::default()),
        PatternTag::Bursty => Box::new(ArimaForecaster::default()),
        PatternTag::EventDriven => Box::new(ProphetLikeForecaster::default()),
    }
}

/// Minimum closed-record count before the ensemble is preferred over committing to one model.
const ENSEMBLE_MIN_SAMPLES: usize = 50;
/// Top two models' accuracies must differ by at least this much for one to count as "clearly
/// ahead"; below this margin neither is trusted over the other.
const ENSEMBLE_ACCURACY_MARGIN: f64 = 0.05;

/// Looks up a forecaster by its `model_tag`, for the Validator's trusted-model override path.
pub fn select_by_tag(tag: &str) -> Option<Box<dyn Forecaster>> {
    match tag {
        "mean" => Some(Box::new(MeanForecaster::default())),
        "trend" => Some(Box::new(TrendForecaster::default())),
        "seasonal" => Some(Box::new(SeasonalForecaster::default())),
        "holt_winters" => Some(Box::new(HoltWintersForecaster::default())),
        "arima" => Some(Box::new(ArimaForecaster::default())),
        "prophet_like" => Some(Box::new(ProphetLikeForecaster::default())),
        "ensemble" => Some(Box::new(EnsembleForecaster::default())),
        _ => None,
    }
}

/// Chooses the forecaster for a workload: once there's enough closed-record history to compare
/// models (`ENSEMBLE_MIN_SAMPLES`) and the Validator reports no model clearly ahead of its
/// closest rival (`accuracy_spread` within `ENSEMBLE_ACCURACY_MARGIN`), blend through
/// [`EnsembleForecaster`]; otherwise the Validator's trusted model when it has earned trust,
/// otherwise the data-characteristics mapping above.
pub fn select(tag: PatternTag, sample_count: usize, trusted_model: Option<(&str, f64, usize)>, accuracy_spread: Option<f64>) -> Box<dyn Forecaster> {
    if sample_count >= ENSEMBLE_MIN_SAMPLES {
        if accuracy_spread.map(|spread| spread < ENSEMBLE_ACCURACY_MARGIN).unwrap_or(false) {
            return Box::new(EnsembleForecaster::default());
        }
    }
    if let Some((model_tag, accuracy, record_count)) = trusted_model {
        if accuracy >= 0.70 && record_count >= 20 {
            if let Some(forecaster) = select_by_tag(model_tag) {
                return forecaster;
            }
        }
    }
    select_by_pattern(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_decreases_with_horizon() {
        let near = confidence_for(100, Horizon::FifteenMin, 0.9);
        let far = confidence_for(100, Horizon::FourHour, 0.9);
        assert!(near > far);
    }

    #[test]
    fn confidence_capped_at_point_nine_data_term() {
        let c = confidence_for(10_000, Horizon::FifteenMin, 1.0);
        assert!(c <= 1.0);
        assert!(c > 0.8);
    }

    #[test]
    fn trusted_model_below_threshold_falls_back_to_pattern() {
        let forecaster = select(PatternTag::Steady, 10, Some(("arima", 0.5, 50)), None);
        assert_eq!(forecaster.model_tag(), "mean");
    }

    #[test]
    fn trusted_model_above_threshold_is_used() {
        let forecaster = select(PatternTag::Steady, 10, Some(("arima", 0.8, 25)), None);
        assert_eq!(forecaster.model_tag(), "arima");
    }

    #[test]
    fn close_accuracies_with_enough_history_prefer_ensemble() {
        let forecaster = select(PatternTag::Steady, ENSEMBLE_MIN_SAMPLES, Some(("arima", 0.8, 25)), Some(0.01));
        assert_eq!(forecaster.model_tag(), "ensemble");
    }

    #[test]
    fn close_accuracies_without_enough_history_still_use_trusted_model() {
        let forecaster = select(PatternTag::Steady, ENSEMBLE_MIN_SAMPLES - 1, Some(("arima", 0.8, 25)), Some(0.01));
        assert_eq!(forecaster.model_tag(), "arima");
    }
}
