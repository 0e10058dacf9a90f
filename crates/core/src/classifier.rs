//! Pattern Classifier: tags a workload's recent CPU history with one of nine usage patterns
//! via a fixed decision cascade, each tag driving which forecaster family the Control Loop
//! prefers.
//!
//! Built on [`crate::stats`]'s percentile/variance/`MIN_SAMPLES` gate and a rolling z-score spike
//! detector, reused for the bursty-pattern spike-rate rule and the event-driven spike-decay rule.

use crate::stats::{autocorrelation, coefficient_of_variation, mean, std_dev};
use crate::types::Sample;
use chrono::{DateTime, Datelike, Utc};

const MIN_SAMPLES: usize = 20;
const STEADY_CV_THRESHOLD: f64 = 0.15;
const BURSTY_CV_THRESHOLD: f64 = 0.5;
const BURSTY_SPIKE_RATE_THRESHOLD: f64 = 0.10;
const WEEKLY_SEASONAL_THRESHOLD: f64 = 0.20;
const MONTHLY_SEASONAL_THRESHOLD: f64 = 0.25;
const EVENT_DRIVEN_MIN_SPIKES: usize = 3;
const PERIODIC_AUTOCORR_THRESHOLD: f64 = 0.5;
const TREND_THRESHOLD: f64 = 0.20;
const SPIKE_Z_SCORE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternTag {
    Unknown,
    Steady,
    Bursty,
    WeeklySeasonal,
    MonthlySeasonal,
    EventDriven,
    Periodic,
    Growing,
    Declining,
}

impl PatternTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternTag::Unknown => "unknown",
            PatternTag::Steady => "steady",
            PatternTag::Bursty => "bursty",
            PatternTag::WeeklySeasonal => "weekly_seasonal",
            PatternTag::MonthlySeasonal => "monthly_seasonal",
            PatternTag::EventDriven => "event_driven",
            PatternTag::Periodic => "periodic",
            PatternTag::Growing => "growing",
            PatternTag::Declining => "declining",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub tag: PatternTag,
    pub confidence: f32,
}

/// Scales confidence with sample count within the documented `[0.3, 0.95]` band, independent
/// of which rule matched: more history always means more confidence in the label.
fn confidence_for(sample_count: usize) -> f32 {
    let scaled = 0.3 + 0.65 * (sample_count as f64 / 100.0).min(1.0);
    scaled.clamp(0.3, 0.95) as f32
}

pub fn classify(samples: &[Sample]) -> Classification {
    if samples.len() < MIN_SAMPLES {
        return Classification {
            tag: PatternTag::Unknown,
            confidence: 0.3,
        };
    }

    let mut ordered: Vec<&Sample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);
    let values: Vec<f64> = ordered.iter().map(|s| s.cpu_millicores).collect();
    let confidence = confidence_for(values.len());

    let cv = coefficient_of_variation(&values);
    if cv < STEADY_CV_THRESHOLD {
        return Classification { tag: PatternTag::Steady, confidence };
    }

    if cv > BURSTY_CV_THRESHOLD && spike_rate(&values) > BURSTY_SPIKE_RATE_THRESHOLD {
        return Classification { tag: PatternTag::Bursty, confidence };
    }

    if weekly_seasonality_ratio(&ordered) > WEEKLY_SEASONAL_THRESHOLD {
        return Classification { tag: PatternTag::WeeklySeasonal, confidence };
    }

    if month_end_ratio(&ordered) > MONTHLY_SEASONAL_THRESHOLD {
        return Classification { tag: PatternTag::MonthlySeasonal, confidence };
    }

    if count_spike_decay_events(&values) >= EVENT_DRIVEN_MIN_SPIKES {
        return Classification { tag: PatternTag::EventDriven, confidence };
    }

    if autocorrelation(&values, lag_for_24h(&ordered)) > PERIODIC_AUTOCORR_THRESHOLD {
        return Classification { tag: PatternTag::Periodic, confidence };
    }

    let trend = relative_trend(&values);
    if trend > TREND_THRESHOLD {
        return Classification { tag: PatternTag::Growing, confidence };
    }
    if trend < -TREND_THRESHOLD {
        return Classification { tag: PatternTag::Declining, confidence };
    }

    Classification { tag: PatternTag::Steady, confidence }
}

fn spike_rate(values: &[f64]) -> f64 {
    let m = mean(values);
    let sd = std_dev(values);
    if sd < f64::EPSILON {
        return 0.0;
    }
    let spikes = values.iter().filter(|v| (*v - m) / sd > SPIKE_Z_SCORE).count();
    spikes as f64 / values.len() as f64
}

/// Counts occurrences of a spike (>2 std devs above mean) followed within three samples by a
/// return below the mean plus one std dev, the "spike then decay" shape this classifier uses for
/// `event_driven`.
fn count_spike_decay_events(values: &[f64]) -> usize {
    let m = mean(values);
    let sd = std_dev(values);
    if sd < f64::EPSILON {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i < values.len() {
        if (values[i] - m) / sd > SPIKE_Z_SCORE {
            let decayed = values[i + 1..(i + 4).min(values.len())]
                .iter()
                .any(|v| (*v - m) / sd < 1.0);
            if decayed {
                count += 1;
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    count
}

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

/// `|mean(weekday) - mean(weekend)| / overall_mean`.
fn weekly_seasonality_ratio(samples: &[&Sample]) -> f64 {
    let overall_mean = mean(&samples.iter().map(|s| s.cpu_millicores).collect::<Vec<_>>());
    if overall_mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let mut weekday = Vec::new();
    let mut weekend = Vec::new();
    for s in samples {
        let dt = timestamp_to_utc(s.timestamp);
        if matches!(dt.weekday().num_days_from_monday(), 0..=4) {
            weekday.push(s.cpu_millicores);
        } else {
            weekend.push(s.cpu_millicores);
        }
    }
    if weekday.is_empty() || weekend.is_empty() {
        return 0.0;
    }
    (mean(&weekday) - mean(&weekend)).abs() / overall_mean
}

/// Relative increase of the last-3-calendar-days-of-month mean over the overall mean.
fn month_end_ratio(samples: &[&Sample]) -> f64 {
    let overall_mean = mean(&samples.iter().map(|s| s.cpu_millicores).collect::<Vec<_>>());
    if overall_mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let month_end_values: Vec<f64> = samples
        .iter()
        .filter_map(|s| {
            let dt = timestamp_to_utc(s.timestamp);
            let days_in_month = days_in_month(dt.year(), dt.month());
            if dt.day() > days_in_month.saturating_sub(3) {
                Some(s.cpu_millicores)
            } else {
                None
            }
        })
        .collect();
    if month_end_values.is_empty() {
        return 0.0;
    }
    (mean(&month_end_values) - overall_mean) / overall_mean
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_first = chrono::NaiveDate::from_ymd_opt(next_month.0, next_month.1, 1).expect("valid date");
    let this_first = chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid date");
    (next_first - this_first).num_days() as u32
}

/// Approximates a 24-hour lag in sample-count terms from the observed sampling cadence.
fn lag_for_24h(samples: &[&Sample]) -> usize {
    if samples.len() < 2 {
        return 1;
    }
    let span_secs = (samples.last().unwrap().timestamp - samples.first().unwrap().timestamp).max(1);
    let cadence_secs = (span_secs as f64 / (samples.len() - 1) as f64).max(1.0);
    let lag = (86_400.0 / cadence_secs).round() as usize;
    lag.clamp(1, samples.len().saturating_sub(1).max(1))
}

/// `(mean(last quartile) - mean(first quartile)) / mean(first quartile)`.
fn relative_trend(values: &[f64]) -> f64 {
    let q = (values.len() / 4).max(1);
    let first = &values[..q];
    let last = &values[values.len() - q..];
    let first_mean = mean(first);
    if first_mean.abs() < f64::EPSILON {
        return 0.0;
    }
    (mean(last) - first_mean) / first_mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkloadId;

    fn make_samples(values: &[f64], start: i64, step_secs: i64) -> Vec<Sample> {
        let workload = WorkloadId::new("ns", "svc", "svc-hpa");
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                workload: workload.clone(),
                timestamp: start + i as i64 * step_secs,
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
    fn fewer_than_twenty_samples_is_unknown() {
        let samples = make_samples(&[1.0; 5], 0, 60);
        let c = classify(&samples);
        assert_eq!(c.tag, PatternTag::Unknown);
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn flat_series_is_steady() {
        let samples = make_samples(&[100.0; 40], 0, 60);
        let c = classify(&samples);
        assert_eq!(c.tag, PatternTag::Steady);
    }

    #[test]
    fn highly_variable_with_spikes_is_bursty() {
        let mut values = vec![10.0; 40];
        for i in (0..40).step_by(5) {
            values[i] = 200.0;
        }
        let samples = make_samples(&values, 0, 60);
        let c = classify(&samples);
        assert!(matches!(c.tag, PatternTag::Bursty), "got {:?}", c.tag);
    }

    #[test]
    fn monotonic_increase_is_growing() {
        let values: Vec<f64> = (0..40).map(|i| 10.0 + i as f64 * 5.0).collect();
        let samples = make_samples(&values, 0, 60);
        let c = classify(&samples);
        assert!(matches!(c.tag, PatternTag::Growing), "got {:?}", c.tag);
    }

    #[test]
    fn monotonic_decrease_is_declining() {
        let values: Vec<f64> = (0..40).map(|i| 500.0 - i as f64 * 5.0).collect();
        let samples = make_samples(&values, 0, 60);
        let c = classify(&samples);
        assert!(matches!(c.tag, PatternTag::Declining), "got {:?}", c.tag);
    }

    #[test]
    fn confidence_increases_with_sample_count() {
        assert!(confidence_for(20) < confidence_for(100));
        assert!(confidence_for(1000) <= 0.95);
    }
}
