//! Time-indexed power demand consumed by the controllers.
//!
//! Demand is in watts in the pack sign convention: positive values ask the
//! pack to discharge, negative values to charge.

use std::io::Read;
use std::path::Path;

use rand::rngs::StdRng;
use serde::Deserialize;

use crate::devices::types::gaussian_noise;

/// Hourly wind output shape (relative units, normalized by its maximum).
const WIND_SHAPE: [f64; 24] = [
    4200.0, 4500.0, 4700.0, 4800.0, 4700.0, 4600.0, 4500.0, 4400.0, 4500.0, 4400.0, 4300.0,
    4600.0, 4700.0, 4100.0, 3600.0, 3000.0, 2400.0, 2300.0, 2000.0, 1800.0, 2200.0, 2700.0,
    3100.0, 3500.0,
];

/// Hourly solar output shape (relative units, normalized by its maximum).
const SOLAR_SHAPE: [f64; 24] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -200.0, 1000.0, 3000.0, 5000.0, 6500.0, 7200.0,
    7000.0, 6000.0, 5000.0, 3000.0, 1000.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

/// Errors raised while loading a target series.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("failed to read target CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("column `{0}` not found in target CSV header")]
    MissingColumn(String),
    #[error("row {row}: cannot parse `{value}` as a number")]
    InvalidValue { row: usize, value: String },
    #[error("target series is empty")]
    Empty,
    #[error("target series has {len} samples, the run needs {required}")]
    TooShort { len: usize, required: usize },
}

/// Parameters of the synthetic wind + solar profile.
///
/// Demand is `setpoint_w − renewable`, with renewable output clipped at zero
/// after smoothed noise is added.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenewableProfile {
    /// Constant consumer load the renewables and the pack serve together (W).
    pub setpoint_w: f64,
    /// Installed wind capacity (W).
    pub wind_capacity_w: f64,
    /// Installed solar capacity (W).
    pub solar_capacity_w: f64,
    /// Noise standard deviation as a fraction of the peak renewable output.
    pub noise_std_fraction: f64,
    /// Standard deviation of the Gaussian smoothing kernel, in samples.
    pub smoothing_sigma_steps: f64,
    /// Hour of day at the first sample.
    pub start_hour: f64,
}

impl Default for RenewableProfile {
    fn default() -> Self {
        Self {
            setpoint_w: 9000.0,
            wind_capacity_w: 6000.0,
            solar_capacity_w: 4000.0,
            noise_std_fraction: 1.0,
            smoothing_sigma_steps: 60.0,
            start_hour: 0.0,
        }
    }
}

impl RenewableProfile {
    /// Noise-free renewable output at an hour of day, linearly interpolated.
    pub fn renewable_at_hour(&self, hour: f64) -> f64 {
        let wind_max = WIND_SHAPE.iter().copied().fold(f64::MIN, f64::max);
        let solar_max = SOLAR_SHAPE.iter().copied().fold(f64::MIN, f64::max);
        let h = hour.rem_euclid(24.0);
        let lo = h.floor() as usize % 24;
        let hi = (lo + 1) % 24;
        let w = h - h.floor();
        let lerp = |shape: &[f64; 24]| shape[lo] * (1.0 - w) + shape[hi] * w;
        lerp(&WIND_SHAPE) / wind_max * self.wind_capacity_w
            + lerp(&SOLAR_SHAPE) / solar_max * self.solar_capacity_w
    }
}

/// Time-indexed demand in watts.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSeries {
    values_w: Vec<f64>,
}

impl TargetSeries {
    /// A series holding `value_w` for `len` steps.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn constant(value_w: f64, len: usize) -> Self {
        assert!(len > 0, "target series length must be > 0");
        Self {
            values_w: vec![value_w; len],
        }
    }

    /// Wraps explicit samples.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::Empty`] when `values_w` is empty.
    pub fn from_values(values_w: Vec<f64>) -> Result<Self, SeriesError> {
        if values_w.is_empty() {
            return Err(SeriesError::Empty);
        }
        Ok(Self { values_w })
    }

    /// Loads one named column of a headed CSV file.
    ///
    /// # Errors
    ///
    /// Returns a [`SeriesError`] if the file cannot be read, the column is
    /// missing, a cell is not a number, or no rows are present.
    pub fn from_csv(path: &Path, column: &str) -> Result<Self, SeriesError> {
        let rdr = csv::Reader::from_path(path)?;
        Self::read_column(rdr, column)
    }

    /// Same as [`TargetSeries::from_csv`] for any reader.
    pub fn from_csv_reader(reader: impl Read, column: &str) -> Result<Self, SeriesError> {
        Self::read_column(csv::Reader::from_reader(reader), column)
    }

    fn read_column<R: Read>(mut rdr: csv::Reader<R>, column: &str) -> Result<Self, SeriesError> {
        let idx = rdr
            .headers()?
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| SeriesError::MissingColumn(column.to_string()))?;

        let mut values_w = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let raw = record.get(idx).unwrap_or("").trim();
            let value = raw.parse::<f64>().map_err(|_| SeriesError::InvalidValue {
                row: row + 1,
                value: raw.to_string(),
            })?;
            values_w.push(value);
        }
        Self::from_values(values_w)
    }

    /// Synthetic demand from a wind + solar day with smoothed Gaussian noise.
    ///
    /// # Arguments
    ///
    /// * `profile` - Capacities, setpoint, and noise parameters
    /// * `len` - Number of samples
    /// * `dt_s` - Sample spacing in seconds
    /// * `rng` - Noise source
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or `dt_s` is not positive.
    pub fn renewable_profile(
        profile: &RenewableProfile,
        len: usize,
        dt_s: f64,
        rng: &mut StdRng,
    ) -> Self {
        assert!(len > 0, "target series length must be > 0");
        assert!(dt_s > 0.0, "dt_s must be > 0");

        let clean: Vec<f64> = (0..len)
            .map(|k| profile.renewable_at_hour(profile.start_hour + k as f64 * dt_s / 3600.0))
            .collect();
        let peak = clean.iter().copied().fold(0.0, f64::max);
        let std_dev = profile.noise_std_fraction * peak;
        let noise: Vec<f64> = (0..len).map(|_| gaussian_noise(rng, std_dev)).collect();
        let smoothed = gaussian_smooth(&noise, profile.smoothing_sigma_steps);

        let values_w = clean
            .iter()
            .zip(&smoothed)
            .map(|(p, n)| profile.setpoint_w - (p + n).max(0.0))
            .collect();
        Self { values_w }
    }

    pub fn len(&self) -> usize {
        self.values_w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values_w.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values_w
    }

    /// Demand at step `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is past the end of the series.
    pub fn at(&self, i: usize) -> f64 {
        assert!(
            i < self.values_w.len(),
            "target index {i} out of range (len {})",
            self.values_w.len()
        );
        self.values_w[i]
    }

    /// `len` samples starting at `start`, holding the last sample past the end.
    pub fn window(&self, start: usize, len: usize) -> Vec<f64> {
        let last = self.values_w.len() - 1;
        (start..start + len)
            .map(|i| self.values_w[i.min(last)])
            .collect()
    }
}

/// Gaussian filter with reflected edges, truncated at four standard deviations.
fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.len() < 2 {
        return values.to_vec();
    }
    let radius = (4.0 * sigma).round() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let n = values.len() as isize;
    let reflect = |mut i: isize| -> usize {
        // Repeated reflection handles kernels wider than the signal.
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - i - 1;
            } else {
                return i as usize;
            }
        }
    };
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * values[reflect(i + k)])
                .sum::<f64>()
                / norm
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn constant_series_holds_value() {
        let s = TargetSeries::constant(1500.0, 10);
        assert_eq!(s.len(), 10);
        assert_eq!(s.at(9), 1500.0);
    }

    #[test]
    #[should_panic]
    fn at_out_of_range_panics() {
        let s = TargetSeries::constant(0.0, 3);
        s.at(3);
    }

    #[test]
    fn window_holds_last_sample() {
        let s = TargetSeries::from_values(vec![1.0, 2.0, 3.0]).unwrap_or_else(|_| TargetSeries::constant(0.0, 1));
        assert_eq!(s.window(1, 4), vec![2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn empty_values_are_rejected() {
        assert!(matches!(TargetSeries::from_values(Vec::new()), Err(SeriesError::Empty)));
    }

    #[test]
    fn csv_column_is_loaded() {
        let data = "time,demand_w\n0,100.5\n1,-20\n2,0\n";
        let s = TargetSeries::from_csv_reader(data.as_bytes(), "demand_w").ok();
        assert_eq!(s.map(|s| s.values().to_vec()), Some(vec![100.5, -20.0, 0.0]));
    }

    #[test]
    fn csv_missing_column_is_reported() {
        let data = "time,power\n0,1\n";
        let err = TargetSeries::from_csv_reader(data.as_bytes(), "demand_w").err();
        assert!(matches!(err, Some(SeriesError::MissingColumn(c)) if c == "demand_w"));
    }

    #[test]
    fn csv_bad_value_is_reported() {
        let data = "demand_w\n1\nabc\n";
        let err = TargetSeries::from_csv_reader(data.as_bytes(), "demand_w").err();
        assert!(matches!(err, Some(SeriesError::InvalidValue { row: 2, .. })));
    }

    #[test]
    fn renewable_profile_without_noise_follows_shape() {
        let profile = RenewableProfile {
            noise_std_fraction: 0.0,
            ..RenewableProfile::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let s = TargetSeries::renewable_profile(&profile, 24, 3600.0, &mut rng);
        // Hour 3 is the wind peak, solar is dark.
        assert_relative_eq!(s.at(3), profile.setpoint_w - profile.wind_capacity_w, epsilon = 1e-9);
        // Around 13:00 solar peaks and demand drops below the night value.
        assert!(s.at(13) < s.at(3) + profile.wind_capacity_w);
    }

    #[test]
    fn renewable_profile_is_reproducible() {
        let profile = RenewableProfile::default();
        let a = TargetSeries::renewable_profile(&profile, 500, 1.0, &mut StdRng::seed_from_u64(9));
        let b = TargetSeries::renewable_profile(&profile, 500, 1.0, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        assert!(a.values().iter().all(|v| *v <= profile.setpoint_w));
    }

    #[test]
    fn interpolation_is_linear_between_hours() {
        let profile = RenewableProfile::default();
        let mid = profile.renewable_at_hour(0.5);
        let expected = (profile.renewable_at_hour(0.0) + profile.renewable_at_hour(1.0)) / 2.0;
        assert_relative_eq!(mid, expected, epsilon = 1e-9);
    }

    #[test]
    fn smoothing_preserves_constant_signal() {
        let out = gaussian_smooth(&[2.0; 50], 5.0);
        assert!(out.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }
}
