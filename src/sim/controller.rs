//! Controller contract and the rule-based hysteresis controller.

use serde::Deserialize;

use crate::devices::battery::{BatteryPack, ThermalBattery};
use crate::devices::cooling::CoolingSystem;
use crate::devices::types::ControlAction;
use crate::nlp::SolverError;
use crate::target::TargetSeries;

use super::types::{HorizonTrajectory, Observation, PredictedState};

/// Failure to produce a plan.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A single solve failed.
    #[error("solve failed: {0}")]
    Solver(#[from] SolverError),
    /// Every attempt of the retry ladder failed.
    #[error("all {attempts} solve attempts failed")]
    Exhausted {
        attempts: usize,
        #[source]
        last: SolverError,
    },
}

/// Produces a planned trajectory from an observation.
///
/// The engine applies the leading actions of each plan and asks again once
/// they are used up. A controller owns its prediction models; they are never
/// the instances holding simulation truth.
pub trait Controller {
    /// Plans from the given observation.
    ///
    /// # Errors
    ///
    /// Returns a [`ControlError`] when no plan can be produced. The engine
    /// then holds the previous action.
    fn plan(&mut self, obs: &Observation) -> Result<HorizonTrajectory, ControlError>;

    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;
}

/// Thresholds and actuator steps of [`RuleBasedController`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleBasedConfig {
    /// Above this temperature the compressor ramps up (°C).
    pub temp_high_c: f64,
    /// Below this temperature the compressor ramps down (°C).
    pub temp_low_c: f64,
    /// Compressor ceiling while ramping up (W).
    pub actuator_on_w: f64,
    /// Compressor floor while ramping down (W).
    pub actuator_off_w: f64,
    /// Change per step while ramping (W).
    pub actuator_step_w: f64,
}

impl Default for RuleBasedConfig {
    fn default() -> Self {
        Self {
            temp_high_c: 26.0,
            temp_low_c: 24.0,
            actuator_on_w: 3000.0,
            actuator_off_w: 0.0,
            actuator_step_w: 300.0,
        }
    }
}

/// Hysteresis controller reacting to temperature and the power target.
///
/// The compressor ramps up above `temp_high_c`, down below `temp_low_c`,
/// and holds in between. The pack current serves the target plus the
/// cooling load.
#[derive(Debug, Clone)]
pub struct RuleBasedController {
    config: RuleBasedConfig,
    battery: BatteryPack,
    cooling: CoolingSystem,
    target: TargetSeries,
    aux_base_power_w: f64,
}

impl RuleBasedController {
    /// Creates a controller around its own prediction models.
    pub fn new(
        config: RuleBasedConfig,
        battery: BatteryPack,
        cooling: CoolingSystem,
        target: TargetSeries,
        aux_base_power_w: f64,
    ) -> Self {
        Self {
            config,
            battery,
            cooling,
            target,
            aux_base_power_w,
        }
    }

    /// Next actuator command given the measured temperature and the previous command.
    pub fn actuator_command(&self, temperature_c: f64, previous_w: f64) -> f64 {
        let c = &self.config;
        if temperature_c > c.temp_high_c {
            c.actuator_on_w.min(previous_w + c.actuator_step_w)
        } else if temperature_c < c.temp_low_c {
            c.actuator_off_w.max(previous_w - c.actuator_step_w)
        } else {
            previous_w
        }
    }
}

impl Controller for RuleBasedController {
    fn plan(&mut self, obs: &Observation) -> Result<HorizonTrajectory, ControlError> {
        let actuator_w = self.actuator_command(obs.temperature_c, obs.actuator_w);

        self.battery.observe(obs.temperature_c, obs.soc);
        let demand_w = self.target.at(obs.step) + actuator_w + self.aux_base_power_w;
        let current_a = self
            .battery
            .limits()
            .clamp_current(self.battery.current_for_power(demand_w));

        let cooling = self
            .cooling
            .predict(obs.temperature_c, actuator_w, obs.coolant_temp_c);
        let next = self
            .battery
            .predict(cooling.heat_j, current_a, obs.temperature_c, obs.soc);

        Ok(HorizonTrajectory {
            actions: vec![ControlAction::new(actuator_w, current_a)],
            states: vec![
                PredictedState {
                    temperature_c: obs.temperature_c,
                    soc: obs.soc,
                    coolant_temp_c: obs.coolant_temp_c,
                },
                PredictedState {
                    temperature_c: next.temperature_c,
                    soc: next.soc,
                    coolant_temp_c: cooling.coolant_out_c,
                },
            ],
        })
    }

    fn name(&self) -> &'static str {
        "rule-based"
    }
}
