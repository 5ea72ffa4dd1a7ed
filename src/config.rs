//! TOML-based scenario configuration, preset definitions, and component builders.

use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;

use crate::devices::battery::{BatteryPack, BatteryPackConfig};
use crate::devices::cooling::{CoefficientTable, CoolingConfig, CoolingSystem};
use crate::health::{EmpiricalHealthEstimator, HealthConfig};
use crate::nlp::{InteriorPointSolver, SolverOptions};
use crate::sim::controller::{RuleBasedConfig, RuleBasedController};
use crate::sim::mpc::{MpcConfig, MpcController, RetryHeuristics};
use crate::sim::types::SimConfig;
use crate::target::{RenewableProfile, SeriesError, TargetSeries};
use crate::tariff::{PriceConfig, PriceSchedule};

/// Seed offset for the target noise RNG to avoid correlation with measurement noise.
const TARGET_SEED_OFFSET: u64 = 57;

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults matching the baseline scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Timing, initial conditions, and measurement noise.
    pub simulation: SimulationConfig,
    /// Battery pack parameters; the ambient temperature here also drives the cooling loop.
    pub battery: BatteryPackConfig,
    pub cooling: CoolingConfig,
    /// Controller choice and the actuator range applied by the engine.
    pub controller: ControllerConfig,
    pub mpc: MpcConfig,
    pub rule_based: RuleBasedConfig,
    /// Interior-point solver options used by the MPC.
    pub solver: SolverOptions,
    /// Retry ladder constants used by the MPC.
    pub retry: RetryHeuristics,
    pub health: HealthConfig,
    /// Source of the power demand series.
    pub target: TargetConfig,
    pub price: PriceConfig,
}

/// Simulation timing and initial conditions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Step duration in seconds (must be > 0).
    pub dt_s: f64,
    /// Number of steps to simulate (must be > 0).
    pub total_steps: usize,
    /// Master random seed.
    pub seed: u64,
    pub initial_temp_c: f64,
    /// Initial state of charge (0.0–1.0).
    pub initial_soc: f64,
    /// Standard deviation of the temperature measurement noise (°C).
    pub noise_std_c: f64,
    /// Planned actions applied per controller call.
    pub n_control: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt_s: 1.0,
            total_steps: 3600,
            seed: 42,
            initial_temp_c: 25.0,
            initial_soc: 0.2,
            noise_std_c: 0.01,
            n_control: 1,
        }
    }
}

/// Which controller closes the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerKind {
    Mpc,
    RuleBased,
}

/// Controller selection and the engine-side actuator range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub kind: ControllerKind,
    /// Compressor range enforced at application (W).
    pub actuator_min_w: f64,
    pub actuator_max_w: f64,
    /// Pump and fan load drawn alongside the compressor (W).
    pub aux_base_power_w: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::RuleBased,
            actuator_min_w: 0.0,
            actuator_max_w: 3000.0,
            aux_base_power_w: 200.0,
        }
    }
}

/// Source of the demand series, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    /// The same demand at every step.
    Constant { value_w: f64 },
    /// One column of a CSV file with a header row.
    Csv { path: PathBuf, column: String },
    /// Synthetic wind and solar profile.
    Renewable(RenewableProfile),
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig::Constant { value_w: 0.0 }
    }
}

impl TargetConfig {
    /// Materializes the series for a run of `len` steps.
    ///
    /// # Errors
    ///
    /// Returns a `SeriesError` if the CSV cannot be loaded or is shorter than `len`.
    pub fn build(&self, len: usize, dt_s: f64, seed: u64) -> Result<TargetSeries, SeriesError> {
        let series = match self {
            TargetConfig::Constant { value_w } => TargetSeries::constant(*value_w, len),
            TargetConfig::Csv { path, column } => TargetSeries::from_csv(path, column)?,
            TargetConfig::Renewable(profile) => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(TARGET_SEED_OFFSET));
                TargetSeries::renewable_profile(profile, len, dt_s, &mut rng)
            }
        };
        if series.len() < len {
            return Err(SeriesError::TooShort {
                len: series.len(),
                required: len,
            });
        }
        Ok(series)
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.dt_s"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ScenarioConfig {
    /// One hour at 1 s steps under a rule-based controller: 35 °C ambient,
    /// pack at 25 °C and 20 % SOC, zero external demand.
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Rule-based control in 45 °C ambient with a warm pack and noisy sensing.
    pub fn hot_ambient() -> Self {
        Self {
            simulation: SimulationConfig {
                initial_temp_c: 32.0,
                initial_soc: 0.6,
                noise_std_c: 0.1,
                ..SimulationConfig::default()
            },
            battery: BatteryPackConfig {
                ambient_temp_c: 45.0,
                ..BatteryPackConfig::default()
            },
            target: TargetConfig::Constant { value_w: 4000.0 },
            ..Self::default()
        }
    }

    /// MPC tracking a renewable-driven demand for two hours at one-minute steps.
    pub fn mpc_tracking() -> Self {
        Self {
            simulation: SimulationConfig {
                dt_s: 60.0,
                total_steps: 120,
                initial_temp_c: 30.0,
                initial_soc: 0.5,
                noise_std_c: 0.05,
                ..SimulationConfig::default()
            },
            controller: ControllerConfig {
                kind: ControllerKind::Mpc,
                ..ControllerConfig::default()
            },
            health: HealthConfig {
                interval_steps: 5,
                ..HealthConfig::default()
            },
            target: TargetConfig::Renewable(RenewableProfile {
                start_hour: 8.0,
                noise_std_fraction: 0.05,
                smoothing_sigma_steps: 3.0,
                ..RenewableProfile::default()
            }),
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "hot_ambient", "mpc_tracking"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "hot_ambient" => Ok(Self::hot_ambient()),
            "mpc_tracking" => Ok(Self::mpc_tracking()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::new(field, message));
            }
        };

        let s = &self.simulation;
        check(s.dt_s > 0.0, "simulation.dt_s", "must be > 0");
        check(s.total_steps > 0, "simulation.total_steps", "must be > 0");
        check(
            (0.0..=1.0).contains(&s.initial_soc),
            "simulation.initial_soc",
            "must be in [0.0, 1.0]",
        );
        check(s.noise_std_c >= 0.0, "simulation.noise_std_c", "must be >= 0");
        check(s.n_control > 0, "simulation.n_control", "must be > 0");

        let b = &self.battery;
        check(b.n_series > 0, "battery.n_series", "must be > 0");
        check(b.n_parallel > 0, "battery.n_parallel", "must be > 0");
        check(b.ah_cell > 0.0, "battery.ah_cell", "must be > 0");
        check(b.soh > 0.0 && b.soh <= 1.0, "battery.soh", "must be in (0.0, 1.0]");
        check(b.r_cell_ohm > 0.0, "battery.r_cell_ohm", "must be > 0");
        check(
            b.heat_capacity_j_per_k() > 0.0,
            "battery.thermal_mass_kg",
            "thermal mass and specific heat must be > 0",
        );
        check(
            b.discharge_cutoff_v < b.charge_cutoff_v,
            "battery.discharge_cutoff_v",
            "must be < battery.charge_cutoff_v",
        );

        let c = &self.cooling;
        check(
            c.capacity_flow_w_per_k() > 0.0,
            "cooling.coolant_mass_flow_kg_s",
            "mass flow and specific heat must be > 0",
        );
        check(c.gate_width_w > 0.0, "cooling.gate_width_w", "must be > 0");

        let ctl = &self.controller;
        check(
            ctl.actuator_min_w < ctl.actuator_max_w,
            "controller.actuator_min_w",
            "must be < controller.actuator_max_w",
        );
        check(ctl.aux_base_power_w >= 0.0, "controller.aux_base_power_w", "must be >= 0");

        let m = &self.mpc;
        check(m.horizon > 0, "mpc.horizon", "must be > 0");
        check(
            m.temp_min_c < m.temp_max_c,
            "mpc.temp_min_c",
            "must be < mpc.temp_max_c",
        );
        check(
            m.actuator_min_w < m.actuator_max_w,
            "mpc.actuator_min_w",
            "must be < mpc.actuator_max_w",
        );
        check(
            m.rate_limit_w.is_none_or(|r| r > 0.0),
            "mpc.rate_limit_w",
            "must be > 0 when set",
        );
        check(
            m.weight_temperature >= 0.0
                && m.weight_actuator >= 0.0
                && m.weight_increment >= 0.0
                && m.weight_output >= 0.0,
            "mpc.weight_temperature",
            "objective weights must be >= 0",
        );
        check(m.power_scale_w > 0.0, "mpc.power_scale_w", "must be > 0");
        if ctl.kind == ControllerKind::Mpc {
            check(
                s.n_control <= m.horizon,
                "simulation.n_control",
                "must be <= mpc.horizon",
            );
        }

        let r = &self.rule_based;
        check(
            r.temp_low_c < r.temp_high_c,
            "rule_based.temp_low_c",
            "must be < rule_based.temp_high_c",
        );
        check(
            r.actuator_off_w <= r.actuator_on_w,
            "rule_based.actuator_off_w",
            "must be <= rule_based.actuator_on_w",
        );
        check(r.actuator_step_w > 0.0, "rule_based.actuator_step_w", "must be > 0");

        let rt = &self.retry;
        check(
            (0.0..0.5).contains(&rt.interior_margin),
            "retry.interior_margin",
            "must be in [0.0, 0.5)",
        );
        check(rt.ramp_step_w > 0.0, "retry.ramp_step_w", "must be > 0");

        check(self.health.interval_steps > 0, "health.interval_steps", "must be > 0");

        match &self.target {
            TargetConfig::Constant { value_w } => {
                check(value_w.is_finite(), "target.value_w", "must be finite");
            }
            TargetConfig::Csv { column, .. } => {
                check(!column.is_empty(), "target.column", "must not be empty");
            }
            TargetConfig::Renewable(p) => {
                check(
                    p.smoothing_sigma_steps >= 0.0,
                    "target.smoothing_sigma_steps",
                    "must be >= 0",
                );
                check(p.noise_std_fraction >= 0.0, "target.noise_std_fraction", "must be >= 0");
            }
        }

        let p = &self.price;
        for (i, band) in p.bands.iter().enumerate() {
            check(
                band.start_hour >= 0.0 && band.start_hour < band.end_hour && band.end_hour <= 24.0,
                &format!("price.bands[{i}]"),
                "hours must satisfy 0 <= start_hour < end_hour <= 24",
            );
        }
        check(
            (0.0..=1.0).contains(&p.sell_ratio),
            "price.sell_ratio",
            "must be in [0.0, 1.0]",
        );

        for (field, message) in self.solver.problems() {
            errors.push(ConfigError::new(format!("solver.{field}"), message));
        }

        errors
    }

    /// Engine-side simulation configuration.
    pub fn sim_config(&self) -> SimConfig {
        let s = &self.simulation;
        let mut cfg = SimConfig::new(s.dt_s, s.total_steps, s.seed);
        cfg.initial_temp_c = s.initial_temp_c;
        cfg.initial_soc = s.initial_soc;
        cfg.noise_std_c = s.noise_std_c;
        cfg.n_control = s.n_control;
        cfg.actuator_min_w = self.controller.actuator_min_w;
        cfg.actuator_max_w = self.controller.actuator_max_w;
        cfg.aux_base_power_w = self.controller.aux_base_power_w;
        cfg
    }

    /// A battery pack at the initial conditions. Call once for truth and once per controller.
    pub fn battery_pack(&self) -> BatteryPack {
        let s = &self.simulation;
        BatteryPack::new(self.battery.clone(), s.initial_temp_c, s.initial_soc, s.dt_s)
    }

    /// A cooling loop at the configured ambient temperature.
    pub fn cooling_system(&self) -> CoolingSystem {
        CoolingSystem::new(
            self.cooling.clone(),
            &CoefficientTable::default(),
            self.battery.ambient_temp_c,
            self.simulation.dt_s,
        )
    }

    /// The demand series for this run.
    ///
    /// # Errors
    ///
    /// Returns a `SeriesError` if the configured source cannot produce enough samples.
    pub fn target_series(&self) -> Result<TargetSeries, SeriesError> {
        let s = &self.simulation;
        self.target.build(s.total_steps, s.dt_s, s.seed)
    }

    pub fn price_schedule(&self) -> PriceSchedule {
        PriceSchedule::new(self.price.clone(), self.simulation.dt_s)
    }

    pub fn health_estimator(&self) -> EmpiricalHealthEstimator {
        EmpiricalHealthEstimator::new(
            self.health.clone(),
            self.battery.pack_capacity_ah(),
            self.battery.n_series,
            self.simulation.dt_s,
        )
    }

    pub fn rule_based_controller(&self, target: TargetSeries) -> RuleBasedController {
        RuleBasedController::new(
            self.rule_based.clone(),
            self.battery_pack(),
            self.cooling_system(),
            target,
            self.controller.aux_base_power_w,
        )
    }

    pub fn mpc_controller(&self, target: TargetSeries) -> MpcController {
        MpcController::new(
            self.mpc.clone(),
            self.retry.clone(),
            InteriorPointSolver::new(self.solver.clone()),
            self.battery_pack(),
            self.cooling_system(),
            target,
            self.price_schedule(),
            self.controller.aux_base_power_w,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::mpc::{ActuatorBoundMode, ObjectiveMode};

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn baseline_measurement_is_noisy() {
        let cfg = ScenarioConfig::baseline();
        assert_eq!(cfg.simulation.noise_std_c, 0.01);
        assert_eq!(cfg.sim_config().noise_std_c, 0.01);
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err_and(|e| e.message.contains("unknown preset")));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[simulation]
dt_s = 60.0
total_steps = 30
seed = 7

[battery]
ambient_temp_c = 40.0
soh = 0.9

[controller]
kind = "mpc"

[mpc]
horizon = 12
rate_limit_w = 500.0
objective = { economic = { weight = 2.0 } }
actuator_bounds = { soft = { weight = 10.0 } }

[solver]
max_iter = 500

[target]
kind = "renewable"
setpoint_w = 8000.0
start_hour = 6.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.controller.kind), Some(ControllerKind::Mpc));
        assert_eq!(cfg.as_ref().map(|c| c.mpc.horizon), Some(12));
        assert_eq!(
            cfg.as_ref().map(|c| c.mpc.objective),
            Some(ObjectiveMode::Economic { weight: 2.0 })
        );
        assert_eq!(
            cfg.as_ref().map(|c| c.mpc.actuator_bounds),
            Some(ActuatorBoundMode::Soft { weight: 10.0 })
        );
        assert_eq!(cfg.as_ref().map(|c| c.solver.max_iter), Some(500));
        assert!(matches!(
            cfg.as_ref().map(|c| &c.target),
            Some(TargetConfig::Renewable(p)) if p.setpoint_w == 8000.0
        ));
    }

    #[test]
    fn csv_target_parses() {
        let toml = r#"
[target]
kind = "csv"
path = "demand.csv"
column = "power"
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(matches!(
            cfg.map(|c| c.target),
            Ok(TargetConfig::Csv { column, .. }) if column == "power"
        ));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
dt_s = 1.0
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_inverted_temperature_bounds() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.mpc.temp_min_c = 45.0;
        cfg.mpc.temp_max_c = 15.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "mpc.temp_min_c"));
    }

    #[test]
    fn validation_catches_invalid_soc() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.initial_soc = 1.5;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.initial_soc"));
    }

    #[test]
    fn validation_reports_solver_options() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.solver.tol = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "solver.tol"));
    }

    #[test]
    fn validation_collects_every_error() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.dt_s = 0.0;
        cfg.rule_based.temp_low_c = 30.0;
        cfg.health.interval_steps = 0;
        assert_eq!(cfg.validate().len(), 3);
    }

    #[test]
    fn n_control_beyond_horizon_is_rejected_for_mpc() {
        let mut cfg = ScenarioConfig::mpc_tracking();
        cfg.simulation.n_control = cfg.mpc.horizon + 1;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.n_control"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).ok();
        assert_eq!(cfg.as_ref().map(|c| c.simulation.seed), Some(99));
        assert_eq!(cfg.as_ref().map(|c| c.simulation.total_steps), Some(3600));
        assert_eq!(cfg.as_ref().map(|c| c.mpc.horizon), Some(24));
    }

    #[test]
    fn target_build_checks_length() {
        let short = TargetConfig::Constant { value_w: 1.0 }.build(10, 1.0, 0);
        assert!(short.is_ok_and(|s| s.len() == 10));
    }

    #[test]
    fn renewable_target_is_seeded() {
        let cfg = ScenarioConfig::mpc_tracking();
        let a = cfg.target_series().ok();
        let b = cfg.target_series().ok();
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn hot_ambient_is_hotter() {
        let base = ScenarioConfig::baseline();
        let hot = ScenarioConfig::hot_ambient();
        assert!(hot.battery.ambient_temp_c > base.battery.ambient_temp_c);
        assert!(hot.simulation.initial_temp_c > base.simulation.initial_temp_c);
    }
}
