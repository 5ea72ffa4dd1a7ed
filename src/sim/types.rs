//! Core simulation types: configuration, observations, plans, and step records.

use std::fmt;

use crate::devices::types::ControlAction;

/// Centralized simulation configuration.
///
/// The engine and both controllers take their timing from this struct.
///
/// # Examples
///
/// ```
/// use bess_thermal_sim::sim::types::SimConfig;
///
/// let cfg = SimConfig::new(60.0, 120, 42);
/// assert_eq!(cfg.total_time_s(), 7200.0);
/// assert_eq!(cfg.time_at(3), 180.0);
/// ```
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Duration of one step in seconds.
    pub dt_s: f64,
    /// Number of steps to simulate.
    pub total_steps: usize,
    /// Master random seed for reproducibility.
    pub seed: u64,
    /// Pack temperature at step 0 (°C).
    pub initial_temp_c: f64,
    /// Pack SOC at step 0.
    pub initial_soc: f64,
    /// Standard deviation of the temperature measurement noise (°C).
    pub noise_std_c: f64,
    /// Planned actions applied before the controller is asked again.
    pub n_control: usize,
    /// Actuator range enforced when an action is applied (W).
    pub actuator_min_w: f64,
    pub actuator_max_w: f64,
    /// Pump and fan load drawn alongside the compressor (W).
    pub aux_base_power_w: f64,
}

impl SimConfig {
    /// Creates a configuration with default initial conditions.
    ///
    /// # Arguments
    ///
    /// * `dt_s` - Step duration in seconds (must be > 0)
    /// * `total_steps` - Number of steps (must be > 0)
    /// * `seed` - Master random seed
    ///
    /// # Panics
    ///
    /// Panics if `dt_s` is not positive or `total_steps` is zero.
    pub fn new(dt_s: f64, total_steps: usize, seed: u64) -> Self {
        assert!(dt_s > 0.0, "dt_s must be > 0");
        assert!(total_steps > 0, "total_steps must be > 0");
        Self {
            dt_s,
            total_steps,
            seed,
            initial_temp_c: 25.0,
            initial_soc: 0.5,
            noise_std_c: 0.01,
            n_control: 1,
            actuator_min_w: 0.0,
            actuator_max_w: 3000.0,
            aux_base_power_w: 200.0,
        }
    }

    /// Simulated duration in seconds.
    pub fn total_time_s(&self) -> f64 {
        self.total_steps as f64 * self.dt_s
    }

    /// Time at the start of `step` in seconds.
    pub fn time_at(&self, step: usize) -> f64 {
        step as f64 * self.dt_s
    }

    /// Clamps an actuator command into the applicable range.
    pub fn clip_actuator(&self, actuator_w: f64) -> f64 {
        actuator_w.clamp(self.actuator_min_w, self.actuator_max_w)
    }
}

/// What a controller sees at the start of a planning call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Step index the plan starts at.
    pub step: usize,
    /// Measured pack temperature (°C).
    pub temperature_c: f64,
    pub soc: f64,
    /// Actuator command currently applied (W).
    pub actuator_w: f64,
    /// Coolant outlet temperature (°C).
    pub coolant_temp_c: f64,
}

/// One predicted state of the plant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedState {
    pub temperature_c: f64,
    pub soc: f64,
    pub coolant_temp_c: f64,
}

/// Predicted trajectory returned by a controller.
///
/// `states` has one more entry than `actions`: `states[0]` is the state the
/// plan starts from and `states[i + 1]` follows `actions[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonTrajectory {
    pub actions: Vec<ControlAction>,
    pub states: Vec<PredictedState>,
}

impl HorizonTrajectory {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Complete record of one simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Step index.
    pub step: usize,
    /// Simulation time at the start of the step (s).
    pub time_s: f64,
    /// Applied compressor power (W).
    pub actuator_w: f64,
    /// Applied pack current (A, positive = discharge).
    pub current_a: f64,
    /// Measured temperature after the step (°C).
    pub temperature_c: f64,
    /// Noise-free temperature after the step (°C).
    pub true_temperature_c: f64,
    /// SOC after the step.
    pub soc: f64,
    /// Health loss reported at this step, zero between estimator calls (%).
    pub health_loss_pct: f64,
    /// Health loss accumulated since step 0 (%).
    pub cumulative_health_loss_pct: f64,
    /// Power delivered by the pack (W, positive = discharge).
    pub power_w: f64,
    /// Power the pack was asked to deliver: target plus cooling load (W).
    pub demand_w: f64,
    /// Coolant outlet temperature after the step (°C).
    pub coolant_temp_c: f64,
    /// Whether the controller failed and the previous action was held.
    pub fallback: bool,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>4} ({:>7.0}s) | T={:>6.2}°C  SOC={:>5.1}% | comp={:>7.1} W  I={:>7.2} A | \
             P={:>8.1} W  demand={:>8.1} W | loss={:.5}%{}",
            self.step,
            self.time_s,
            self.temperature_c,
            self.soc * 100.0,
            self.actuator_w,
            self.current_a,
            self.power_w,
            self.demand_w,
            self.cumulative_health_loss_pct,
            if self.fallback { "  [fallback]" } else { "" },
        )
    }
}
