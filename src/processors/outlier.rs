use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    DEFAULT_MAX_HOURLY_PRECIP, DEFAULT_MIN_HOURLY_PRECIP, OUTLIER_MAX_ITERATIONS,
};

/// Thresholds for hourly precipitation outlier clamping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OutlierConfig {
    pub enabled: bool,
    #[validate(range(min = 0.0))]
    pub max_threshold: f64,
    #[validate(range(min = 0.0))]
    pub min_threshold: f64,
    /// Repeat the pass until nothing changes. `false` applies exactly one pass.
    pub until_stable: bool,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_threshold: DEFAULT_MAX_HOURLY_PRECIP,
            min_threshold: DEFAULT_MIN_HOURLY_PRECIP,
            until_stable: true,
        }
    }
}

/// What a correction run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutlierReport {
    /// Passes that changed something.
    pub passes: usize,
    /// Values lowered at least once.
    pub clamped: usize,
    /// Final cap applied, if any.
    pub cap: Option<f64>,
}

impl OutlierReport {
    pub fn is_clean(&self) -> bool {
        self.passes == 0
    }
}

/// Clamps isolated extreme values of a bounded accumulation.
///
/// One pass: nothing to do when the maximum is within `max_threshold`. Otherwise take
/// the mean and population standard deviation of the values at or above
/// `min_threshold`, `T = mean + 3 std`. If `T` reaches the maximum the extremes are
/// plausible and left alone; if `T` is above `max_threshold` values `>= T` are clamped
/// to `T`; otherwise values `>= max_threshold` are clamped to `max_threshold`.
///
/// By default [`correct`](Self::correct) repeats the pass until nothing changes, so
/// correcting an already corrected array is a no-op. This clamps harder than a single
/// pass: twenty 1.0 mm values and one 500 mm spike end at 50 instead of ~343.56.
/// `with_until_stable(false)` (config `outlier.until_stable = false`) applies exactly
/// one pass and reproduces single-pass labels; that result is not idempotent.
/// Missing values (`NaN`) are ignored.
#[derive(Debug, Clone)]
pub struct OutlierCorrector {
    max_threshold: f64,
    min_threshold: f64,
    until_stable: bool,
    max_iterations: usize,
}

impl Default for OutlierCorrector {
    fn default() -> Self {
        Self {
            max_threshold: DEFAULT_MAX_HOURLY_PRECIP,
            min_threshold: DEFAULT_MIN_HOURLY_PRECIP,
            until_stable: true,
            max_iterations: OUTLIER_MAX_ITERATIONS,
        }
    }
}

impl OutlierCorrector {
    pub fn new(max_threshold: f64, min_threshold: f64) -> Result<Self> {
        if !(min_threshold < max_threshold) {
            return Err(ProcessingError::Config(format!(
                "outlier min threshold {} must be below max threshold {}",
                min_threshold, max_threshold
            )));
        }
        Ok(Self {
            max_threshold,
            min_threshold,
            ..Self::default()
        })
    }

    pub fn from_config(config: &OutlierConfig) -> Result<Self> {
        Self::new(config.max_threshold, config.min_threshold)
            .map(|corrector| corrector.with_until_stable(config.until_stable))
    }

    pub fn with_until_stable(mut self, until_stable: bool) -> Self {
        self.until_stable = until_stable;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_threshold(&self) -> f64 {
        self.max_threshold
    }

    pub fn min_threshold(&self) -> f64 {
        self.min_threshold
    }

    /// One correction pass. Returns the cap it applied, or `None` if nothing changed.
    pub fn single_pass(&self, values: &mut [f64]) -> Option<f64> {
        let max = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() || max <= self.max_threshold {
            return None;
        }

        let (count, sum) = values
            .iter()
            .filter(|v| v.is_finite() && **v >= self.min_threshold)
            .fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
        // max itself is in the subset, so count > 0
        let mean = sum / count as f64;
        let variance = values
            .iter()
            .filter(|v| v.is_finite() && **v >= self.min_threshold)
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        let threshold = mean + 3.0 * variance.sqrt();

        if threshold >= max {
            return None;
        }

        let cap = if threshold >= self.max_threshold {
            threshold
        } else {
            self.max_threshold
        };
        for v in values.iter_mut().filter(|v| **v >= cap) {
            *v = cap;
        }
        Some(cap)
    }

    pub fn correct_in_place(&self, values: &mut [f64]) -> OutlierReport {
        let original: Vec<f64> = values.to_vec();
        let mut report = OutlierReport::default();

        while let Some(cap) = self.single_pass(values) {
            report.passes += 1;
            report.cap = Some(cap);
            if !self.until_stable {
                break;
            }
            if report.passes >= self.max_iterations {
                let cap = self.max_threshold;
                for v in values.iter_mut().filter(|v| **v > cap) {
                    *v = cap;
                }
                report.cap = Some(cap);
                break;
            }
        }

        report.clamped = original
            .iter()
            .zip(values.iter())
            .filter(|(before, after)| before != after && before.is_finite())
            .count();
        if !report.is_clean() {
            debug!(
                "outlier correction: {} values clamped to {:.3} in {} passes",
                report.clamped,
                report.cap.unwrap_or(self.max_threshold),
                report.passes
            );
        }
        report
    }

    pub fn correct(&self, values: &[f64]) -> Vec<f64> {
        let mut corrected = values.to_vec();
        self.correct_in_place(&mut corrected);
        corrected
    }

    /// Station column form; `None` entries are missing and untouched.
    pub fn correct_stations(&self, values: &mut [Option<f64>]) -> OutlierReport {
        let mut dense: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let report = self.correct_in_place(&mut dense);
        for (slot, v) in values.iter_mut().zip(dense) {
            if slot.is_some() {
                *slot = Some(v);
            }
        }
        report
    }

    pub fn correct_grid(&self, values: &mut Array2<f64>) -> OutlierReport {
        match values.as_slice_mut() {
            Some(slice) => self.correct_in_place(slice),
            None => {
                let mut dense: Vec<f64> = values.iter().copied().collect();
                let report = self.correct_in_place(&mut dense);
                for (slot, v) in values.iter_mut().zip(dense) {
                    *slot = v;
                }
                report
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn corrector() -> OutlierCorrector {
        OutlierCorrector::new(50.0, 1.0).unwrap()
    }

    #[test]
    fn test_plausible_extreme_is_kept() {
        // T = 26.5 + 3 * 42.44 ~ 153.8 >= 100
        let values = vec![0.0, 1.0, 2.0, 3.0, 100.0];
        assert_eq!(corrector().correct(&values), values);
    }

    #[test]
    fn test_within_threshold_is_noop() {
        let values = vec![0.0, 10.0, 49.9, 50.0];
        let mut copy = values.clone();
        let report = corrector().correct_in_place(&mut copy);
        assert!(report.is_clean());
        assert_eq!(copy, values);
    }

    #[test]
    fn test_single_pass_clamps_to_statistical_cap() {
        let mut values = vec![1.0; 20];
        values.push(500.0);
        let cap = corrector().single_pass(&mut values).unwrap();
        assert!((cap - 343.561_310_696_874_7).abs() < 1e-6);
        assert_eq!(values[20], cap);
        assert_eq!(values[0], 1.0);
    }

    #[test]
    fn test_isolated_spike_converges_to_max_threshold() {
        let mut values = vec![1.0; 20];
        values.push(500.0);
        let mut corrected = values.clone();
        let report = corrector().correct_in_place(&mut corrected);

        assert_eq!(corrected[20], 50.0);
        assert_eq!(report.clamped, 1);
        assert_eq!(report.cap, Some(50.0));
        assert_eq!(report.passes, 7);
    }

    #[test]
    fn test_single_pass_mode_keeps_statistical_cap() {
        let mut values = vec![1.0; 20];
        values.push(500.0);
        let corrector = corrector().with_until_stable(false);
        let report = corrector.correct_in_place(&mut values);

        assert_eq!(report.passes, 1);
        assert_eq!(report.clamped, 1);
        assert!((values[20] - 343.561_310_696_874_7).abs() < 1e-6);
        assert_eq!(values[0], 1.0);

        let config = OutlierConfig {
            until_stable: false,
            ..OutlierConfig::default()
        };
        let from_config = OutlierCorrector::from_config(&config).unwrap();
        let mut again = vec![1.0; 20];
        again.push(500.0);
        assert_eq!(from_config.correct(&again), values);
    }

    #[test]
    fn test_correction_is_idempotent() {
        let inputs = vec![
            vec![0.0, 1.0, 2.0, 3.0, 100.0],
            vec![2.0, 3.0, 5.0, 80.0, 90.0, 400.0, 1.5, 0.0],
            {
                let mut v = vec![1.0; 20];
                v.push(500.0);
                v
            },
            vec![60.0, 61.0, 62.0],
        ];
        let corrector = corrector();
        for input in inputs {
            let once = corrector.correct(&input);
            let twice = corrector.correct(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_iteration_cap_falls_back_to_max_threshold() {
        let mut values = vec![1.0; 20];
        values.push(500.0);
        let corrector = corrector().with_max_iterations(1);
        let report = corrector.correct_in_place(&mut values);
        assert_eq!(report.passes, 1);
        assert_eq!(values[20], 50.0);
        assert_eq!(corrector.correct(&values), values);
    }

    #[test]
    fn test_missing_values_ignored() {
        let mut stations = vec![Some(1.0); 20];
        stations.push(None);
        stations.push(Some(500.0));
        corrector().correct_stations(&mut stations);
        assert_eq!(stations[20], None);
        assert_eq!(stations[21], Some(50.0));

        let mut grid = array![[f64::NAN, 1.0], [1.0, 1.0]];
        let report = corrector().correct_grid(&mut grid);
        assert!(report.is_clean());
        assert!(grid[[0, 0]].is_nan());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(OutlierCorrector::new(1.0, 50.0).is_err());
        assert!(OutlierCorrector::new(f64::NAN, 1.0).is_err());
    }
}
