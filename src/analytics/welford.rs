//! Welford's online algorithm for incremental duration statistics.
//!
//! Mean and dispersion are maintained per monitor without storing the full
//! run history. The median is a windowed approximation recomputed from the
//! most recent 50 successful run durations, not a streaming median.

use serde::{Deserialize, Serialize};

use crate::db::entities::monitor;

/// How many recent successful runs feed the median approximation.
pub const MEDIAN_WINDOW: u64 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: i64,
    pub mean: Option<f64>,
    /// Sum of squared differences from the running mean.
    pub m2: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
}

impl DurationStats {
    pub fn from_monitor(monitor: &monitor::Model) -> Self {
        Self {
            count: monitor.duration_count,
            mean: monitor.duration_mean,
            m2: monitor.duration_m2,
            min: monitor.duration_min,
            max: monitor.duration_max,
            median: monitor.duration_median,
        }
    }

    /// Folds a new duration sample into the accumulators.
    ///
    /// The median field is left untouched; callers refresh it separately from
    /// the recent-run window.
    pub fn update(self, value: f64) -> Self {
        let count = self.count + 1;
        let prior_mean = self.mean.unwrap_or(0.0);
        let delta = value - prior_mean;
        let mean = prior_mean + delta / count as f64;
        let delta2 = value - mean;
        let m2 = self.m2.unwrap_or(0.0) + delta * delta2;

        Self {
            count,
            mean: Some(mean),
            m2: Some(m2),
            min: Some(self.min.map_or(value, |m| m.min(value))),
            max: Some(self.max.map_or(value, |m| m.max(value))),
            median: self.median,
        }
    }

    /// Population variance. Undefined for fewer than two samples.
    pub fn variance(&self) -> Option<f64> {
        if self.count > 1 {
            self.m2.map(|m2| m2 / self.count as f64)
        } else {
            None
        }
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Standard score of `value`, or `None` when the distribution is degenerate.
pub fn z_score(value: f64, mean: f64, stddev: f64) -> Option<f64> {
    if stddev == 0.0 || stddev.is_nan() {
        return None;
    }
    Some((value - mean) / stddev)
}

/// Median of an unsorted sample. Even-length samples average the two middle
/// elements.
pub fn median_of(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_mean_and_variance(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, variance)
    }

    #[test]
    fn incremental_matches_batch_statistics() {
        let samples = [
            1200.0, 980.0, 1010.0, 1500.0, 870.0, 1130.0, 990.0, 1045.0, 2200.0, 760.0, 1001.0,
        ];
        let stats = samples
            .iter()
            .fold(DurationStats::default(), |acc, &v| acc.update(v));

        let (mean, variance) = batch_mean_and_variance(&samples);
        assert_eq!(stats.count, samples.len() as i64);
        assert!((stats.mean.unwrap() - mean).abs() < 1e-9);
        assert!((stats.variance().unwrap() - variance).abs() < 1e-6);
    }

    #[test]
    fn min_mean_max_ordering_holds() {
        let stats = [5.0, 1.0, 9.0, 3.0]
            .iter()
            .fold(DurationStats::default(), |acc, &v| acc.update(v));
        let (min, mean, max) = (
            stats.min.unwrap(),
            stats.mean.unwrap(),
            stats.max.unwrap(),
        );
        assert!(min <= mean && mean <= max);
        assert_eq!(min, 1.0);
        assert_eq!(max, 9.0);
    }

    #[test]
    fn variance_undefined_below_two_samples() {
        let stats = DurationStats::default();
        assert_eq!(stats.variance(), None);
        let stats = stats.update(100.0);
        assert_eq!(stats.variance(), None);
        assert_eq!(stats.stddev(), None);
        let stats = stats.update(200.0);
        assert!(stats.variance().is_some());
    }

    #[test]
    fn z_score_degenerate_stddev_is_none() {
        assert_eq!(z_score(100.0, 50.0, 0.0), None);
        assert_eq!(z_score(1450.0, 1000.0, 100.0), Some(4.5));
    }

    #[test]
    fn median_even_and_odd_windows() {
        assert_eq!(median_of(&[]), None);
        assert_eq!(median_of(&[7]), Some(7.0));
        assert_eq!(median_of(&[4, 1, 3]), Some(3.0));
        assert_eq!(median_of(&[4, 1, 3, 2]), Some(2.5));
    }
}
