//! Duration and output-size anomaly detection.
//!
//! Both checks are pure functions over already-loaded statistics so they can
//! run on the background worker without touching the ping path.

use serde::{Deserialize, Serialize};

use super::welford::{z_score, DurationStats};

/// Minimum successful runs before duration detection activates.
pub const MIN_RUNS_FOR_DETECTION: i64 = 10;
/// Standard deviations from the mean considered an outlier.
pub const Z_SCORE_THRESHOLD: f64 = 3.0;
/// Critical anomalies must also exceed this multiple of the median.
pub const MEDIAN_RATIO_THRESHOLD: f64 = 1.5;
/// Output-size drops larger than this percentage are flagged.
pub const OUTPUT_DROP_PERCENT: f64 = 70.0;
/// Minimum sampled runs with output before size detection activates.
pub const MIN_OUTPUT_SAMPLES: usize = 3;
/// How many recent runs the output-size check samples.
pub const OUTPUT_SAMPLE_WINDOW: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Duration,
    OutputSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub severity: AnomalySeverity,
    pub expected: Option<i64>,
    pub actual: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    pub message: String,
}

/// Flags a run duration as anomalous against the monitor's streaming stats.
///
/// Cold-start guard: fewer than [`MIN_RUNS_FOR_DETECTION`] samples, or a
/// zero/undefined stddev, never flags.
pub fn detect_duration_anomaly(stats: &DurationStats, duration_ms: i64) -> Option<Anomaly> {
    if stats.count < MIN_RUNS_FOR_DETECTION {
        return None;
    }
    let mean = stats.mean?;
    let stddev = stats.stddev().filter(|s| *s > 0.0)?;

    let actual = duration_ms as f64;
    let z = z_score(actual, mean, stddev);
    let z_outlier = z.is_some_and(|z| z.abs() > Z_SCORE_THRESHOLD);
    let median_outlier = stats
        .median
        .is_some_and(|median| actual > median * MEDIAN_RATIO_THRESHOLD);
    let expected = Some(mean.round() as i64);

    if z_outlier && median_outlier {
        let z = z.unwrap_or_default();
        return Some(Anomaly {
            kind: AnomalyType::Duration,
            severity: AnomalySeverity::Critical,
            expected,
            actual: duration_ms,
            z_score: Some(z),
            message: format!(
                "Job took {duration_ms}ms ({:.1}\u{3c3} from mean). Expected ~{}ms.",
                z.abs(),
                mean.round()
            ),
        });
    }

    if z_outlier {
        let z = z.unwrap_or_default();
        return Some(Anomaly {
            kind: AnomalyType::Duration,
            severity: AnomalySeverity::Warning,
            expected,
            actual: duration_ms,
            z_score: Some(z),
            message: format!(
                "Job took {duration_ms}ms, which is {:.1} standard deviations from mean ({}ms).",
                z.abs(),
                mean.round()
            ),
        });
    }

    // Safety net for stale means: upper-bound check with the same threshold.
    let upper_bound = mean + Z_SCORE_THRESHOLD * stddev;
    if actual > upper_bound {
        return Some(Anomaly {
            kind: AnomalyType::Duration,
            severity: AnomalySeverity::Warning,
            expected,
            actual: duration_ms,
            z_score: None,
            message: format!(
                "Job took {duration_ms}ms, significantly higher than expected range ({}ms threshold).",
                upper_bound.round()
            ),
        });
    }

    None
}

/// Flags a drop of more than [`OUTPUT_DROP_PERCENT`] against the average of
/// recent nonzero output sizes. `recent_sizes` is the last
/// [`OUTPUT_SAMPLE_WINDOW`] runs that recorded a size.
pub fn detect_output_size_anomaly(recent_sizes: &[i64], size_bytes: i64) -> Option<Anomaly> {
    let sizes: Vec<i64> = recent_sizes.iter().copied().filter(|s| *s > 0).collect();
    if sizes.len() < MIN_OUTPUT_SAMPLES {
        return None;
    }

    let avg = sizes.iter().sum::<i64>() as f64 / sizes.len() as f64;
    let drop_percent = (avg - size_bytes as f64) / avg * 100.0;
    if drop_percent <= OUTPUT_DROP_PERCENT {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyType::OutputSize,
        severity: AnomalySeverity::Warning,
        expected: Some(avg.round() as i64),
        actual: size_bytes,
        z_score: None,
        message: format!(
            "Output size dropped {drop_percent:.0}% ({size_bytes} bytes vs expected {} bytes). May indicate partial failure.",
            avg.round()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stats with mean 1000 and population stddev 100 over `count` samples.
    fn stats(count: i64, median: Option<f64>) -> DurationStats {
        DurationStats {
            count,
            mean: Some(1000.0),
            m2: Some(10_000.0 * count as f64),
            min: Some(800.0),
            max: Some(1200.0),
            median,
        }
    }

    #[test]
    fn cold_start_never_flags() {
        for count in 0..MIN_RUNS_FOR_DETECTION {
            assert_eq!(
                detect_duration_anomaly(&stats(count, Some(1000.0)), 1_000_000),
                None,
                "count {count} must not flag"
            );
        }
    }

    #[test]
    fn degenerate_stddev_skips_detection() {
        let flat = DurationStats {
            count: 20,
            mean: Some(1000.0),
            m2: Some(0.0),
            min: Some(1000.0),
            max: Some(1000.0),
            median: Some(1000.0),
        };
        assert_eq!(detect_duration_anomaly(&flat, 5000), None);
    }

    #[test]
    fn z_and_median_outlier_is_critical() {
        let anomaly = detect_duration_anomaly(&stats(20, Some(1000.0)), 1600).expect("flagged");
        assert_eq!(anomaly.severity, AnomalySeverity::Critical);
        assert_eq!(anomaly.kind, AnomalyType::Duration);
        assert_eq!(anomaly.expected, Some(1000));
        assert!((anomaly.z_score.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn z_outlier_alone_is_warning() {
        // z = 3.5 but 1350 is not beyond 1.5x the median.
        let anomaly = detect_duration_anomaly(&stats(20, Some(1000.0)), 1350).expect("flagged");
        assert_eq!(anomaly.severity, AnomalySeverity::Warning);
        assert!((anomaly.z_score.unwrap() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn within_range_is_clean() {
        assert_eq!(detect_duration_anomaly(&stats(20, Some(1000.0)), 1200), None);
    }

    #[test]
    fn output_size_needs_three_samples() {
        assert_eq!(detect_output_size_anomaly(&[5000, 5100], 10), None);
        // Zero-size entries are excluded from the sample.
        assert_eq!(detect_output_size_anomaly(&[5000, 5100, 0], 10), None);
    }

    #[test]
    fn output_size_drop_over_seventy_percent_flags() {
        let anomaly = detect_output_size_anomaly(&[5000, 5200, 4800], 1000).expect("flagged");
        assert_eq!(anomaly.kind, AnomalyType::OutputSize);
        assert_eq!(anomaly.severity, AnomalySeverity::Warning);
        assert_eq!(anomaly.expected, Some(5000));

        // A 70% drop exactly is not "more than 70%".
        assert_eq!(detect_output_size_anomaly(&[5000, 5000, 5000], 1500), None);
    }
}
