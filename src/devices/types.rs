//! Common types shared by the plant models and the controllers.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// One actuation decision: compressor power and pack current.
///
/// # Sign Convention
/// - `current_a > 0`: discharge (the pack delivers power)
/// - `current_a < 0`: charge
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlAction {
    /// Cooling actuator (compressor) electrical power command in watts.
    pub actuator_w: f64,
    /// Pack current in amperes.
    pub current_a: f64,
}

impl ControlAction {
    /// Creates an action from an actuator command and a pack current.
    pub fn new(actuator_w: f64, current_a: f64) -> Self {
        Self {
            actuator_w,
            current_a,
        }
    }
}

/// Current and SOC limits valid for the next step.
///
/// The current range is the voltage-cutoff range narrowed so that one step
/// at either end keeps SOC inside `[soc_min, 1]`. Recomputed by the battery
/// model after every step, so `soc_min` lags the temperature by one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingLimits {
    /// Most negative (charging) pack current allowed, in amperes.
    pub current_min_a: f64,
    /// Most positive (discharging) pack current allowed, in amperes.
    pub current_max_a: f64,
    /// Minimum state of charge reachable at the current temperature.
    pub soc_min: f64,
}

impl OperatingLimits {
    /// Clamps a pack current into `[current_min_a, current_max_a]`.
    pub fn clamp_current(&self, current_a: f64) -> f64 {
        current_a.clamp(self.current_min_a, self.current_max_a)
    }
}

/// Draws zero-mean Gaussian noise with the given standard deviation.
///
/// Returns `0.0` for a non-positive standard deviation.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}
