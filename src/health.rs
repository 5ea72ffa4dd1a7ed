//! Battery health-loss estimation.
//!
//! The driver queries a [`HealthEstimator`] every few steps with the pack
//! current, terminal voltage, and measured temperature, and accumulates the
//! returned state-of-health loss increments.

use serde::Deserialize;

/// Universal gas constant (J/mol·K).
const GAS_CONSTANT: f64 = 8.314;
const KELVIN_OFFSET: f64 = 273.15;
/// Currents below this magnitude count as rest (A).
const REST_CURRENT_A: f64 = 1e-3;

/// Stateful estimator of health loss, called in time order.
pub trait HealthEstimator {
    /// Health-loss increment (percentage points) since the previous call.
    ///
    /// # Arguments
    ///
    /// * `current_a` - Pack current (positive = discharge)
    /// * `voltage_v` - Pack terminal voltage
    /// * `temperature_c` - Measured pack temperature
    fn inference(&mut self, current_a: f64, voltage_v: f64, temperature_c: f64) -> f64;
}

/// Parameters of [`EmpiricalHealthEstimator`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Driver steps between two estimator calls.
    pub interval_steps: usize,
    /// Loss per ampere-hour of throughput at reference conditions (%/Ah).
    pub base_loss_pct_per_ah: f64,
    /// Arrhenius activation energy (J/mol).
    pub activation_energy_j_per_mol: f64,
    /// Temperature at which the Arrhenius factor is one (°C).
    pub reference_temp_c: f64,
    /// Linear stress added per unit of C-rate.
    pub c_rate_coefficient: f64,
    /// Exponential stress per volt of cell voltage above `reference_cell_voltage_v`.
    pub voltage_coefficient: f64,
    pub reference_cell_voltage_v: f64,
    /// Stress added per hour spent in the current charging period.
    pub charge_time_coefficient_per_h: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_steps: 60,
            base_loss_pct_per_ah: 8e-5,
            activation_energy_j_per_mol: 31_500.0,
            reference_temp_c: 25.0,
            c_rate_coefficient: 0.5,
            voltage_coefficient: 2.0,
            reference_cell_voltage_v: 3.7,
            charge_time_coefficient_per_h: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Charge,
    Discharge,
    Rest,
}

impl Mode {
    fn from_current(current_a: f64) -> Self {
        if current_a > REST_CURRENT_A {
            Mode::Discharge
        } else if current_a < -REST_CURRENT_A {
            Mode::Charge
        } else {
            Mode::Rest
        }
    }
}

/// Closed-form degradation model standing in for a learned estimator.
///
/// `loss = base · arrhenius(T) · (1 + k_c·C) · exp(k_v·max(V_cell − V_ref, 0))
///         · (1 + k_t·t_charge) · Ah`
///
/// where `t_charge` is the time spent in the ongoing charging period, the
/// relative charge-time feature. It resets on every mode change.
#[derive(Debug, Clone)]
pub struct EmpiricalHealthEstimator {
    config: HealthConfig,
    capacity_ah: f64,
    n_series: f64,
    interval_s: f64,
    mode: Mode,
    time_in_mode_s: f64,
}

impl EmpiricalHealthEstimator {
    /// Creates an estimator for a pack.
    ///
    /// # Arguments
    ///
    /// * `config` - Model coefficients and call interval
    /// * `capacity_ah` - Pack capacity used to compute the C-rate
    /// * `n_series` - Cells in series, to recover the cell voltage
    /// * `dt_s` - Driver step; the estimator covers `interval_steps · dt_s` per call
    ///
    /// # Panics
    ///
    /// Panics if `capacity_ah`, `n_series`, `dt_s`, or `interval_steps` is zero.
    pub fn new(config: HealthConfig, capacity_ah: f64, n_series: u32, dt_s: f64) -> Self {
        assert!(capacity_ah > 0.0 && n_series > 0 && dt_s > 0.0);
        assert!(config.interval_steps > 0, "interval_steps must be > 0");
        let interval_s = config.interval_steps as f64 * dt_s;
        Self {
            config,
            capacity_ah,
            n_series: f64::from(n_series),
            interval_s,
            mode: Mode::Rest,
            time_in_mode_s: 0.0,
        }
    }

    /// Arrhenius acceleration relative to the reference temperature.
    pub fn arrhenius_factor(&self, temperature_c: f64) -> f64 {
        let t = temperature_c + KELVIN_OFFSET;
        let t_ref = self.config.reference_temp_c + KELVIN_OFFSET;
        (self.config.activation_energy_j_per_mol / GAS_CONSTANT * (1.0 / t_ref - 1.0 / t)).exp()
    }

    /// Seconds spent in the ongoing charging period, zero otherwise.
    pub fn relative_charge_time_s(&self) -> f64 {
        if self.mode == Mode::Charge {
            self.time_in_mode_s
        } else {
            0.0
        }
    }
}

impl HealthEstimator for EmpiricalHealthEstimator {
    fn inference(&mut self, current_a: f64, voltage_v: f64, temperature_c: f64) -> f64 {
        let mode = Mode::from_current(current_a);
        if mode == self.mode {
            self.time_in_mode_s += self.interval_s;
        } else {
            self.mode = mode;
            self.time_in_mode_s = self.interval_s;
        }
        if mode == Mode::Rest {
            return 0.0;
        }

        let cfg = &self.config;
        let throughput_ah = current_a.abs() * self.interval_s / 3600.0;
        let c_rate = current_a.abs() / self.capacity_ah;
        let cell_v = voltage_v / self.n_series;
        let voltage_stress =
            (cfg.voltage_coefficient * (cell_v - cfg.reference_cell_voltage_v).max(0.0)).exp();
        let charge_stress =
            1.0 + cfg.charge_time_coefficient_per_h * self.relative_charge_time_s() / 3600.0;

        cfg.base_loss_pct_per_ah
            * self.arrhenius_factor(temperature_c)
            * (1.0 + cfg.c_rate_coefficient * c_rate)
            * voltage_stress
            * charge_stress
            * throughput_ah
    }
}
