//! Simulation engine that closes the loop between controller and plant.

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::devices::battery::{BatteryPack, ThermalBattery};
use crate::devices::cooling::CoolingSystem;
use crate::devices::types::{ControlAction, gaussian_noise};
use crate::health::HealthEstimator;
use crate::target::TargetSeries;

use super::clock::Clock;
use super::controller::Controller;
use super::types::{HorizonTrajectory, Observation, SimConfig, StepResult};

/// Simulation engine owning the plant, the controller, and the health estimator.
///
/// Generic over `C: Controller` and `H: HealthEstimator` for static dispatch.
/// The battery held here is the truth model; controllers carry their own
/// prediction copies.
pub struct Engine<C: Controller, H: HealthEstimator, B: ThermalBattery = BatteryPack> {
    config: SimConfig,
    battery: B,
    cooling: CoolingSystem,
    controller: C,
    health: H,
    health_interval_steps: usize,
    target: TargetSeries,
    rng: StdRng,
    plan: Option<HorizonTrajectory>,
    plan_cursor: usize,
    last_action: ControlAction,
    measured_temp_c: f64,
    cumulative_loss_pct: f64,
}

impl<C: Controller, H: HealthEstimator, B: ThermalBattery> Engine<C, H, B> {
    /// Creates a new simulation engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Simulation configuration
    /// * `battery` - Truth battery model
    /// * `cooling` - Truth cooling loop
    /// * `controller` - Planning controller
    /// * `health` - Health-loss estimator
    /// * `health_interval_steps` - Steps between two estimator calls
    /// * `target` - Per-step power target, at least `total_steps` long
    ///
    /// # Panics
    ///
    /// Panics if `health_interval_steps` is zero or the target is too short.
    pub fn new(
        config: SimConfig,
        battery: B,
        cooling: CoolingSystem,
        controller: C,
        health: H,
        health_interval_steps: usize,
        target: TargetSeries,
    ) -> Self {
        assert!(health_interval_steps > 0, "health interval must be > 0");
        assert!(
            target.len() >= config.total_steps,
            "target series shorter than the simulation"
        );
        let rng = StdRng::seed_from_u64(config.seed);
        let measured_temp_c = battery.state().temperature_c;
        let last_action = ControlAction::new(config.clip_actuator(0.0), 0.0);
        Self {
            config,
            battery,
            cooling,
            controller,
            health,
            health_interval_steps,
            target,
            rng,
            plan: None,
            plan_cursor: 0,
            last_action,
            measured_temp_c,
            cumulative_loss_pct: 0.0,
        }
    }

    /// Action for step `t`, replanning when the applied window is used up.
    ///
    /// Returns the action and whether it is a held fallback.
    fn next_action(&mut self, t: usize) -> (ControlAction, bool) {
        let window = self.config.n_control.max(1);
        let exhausted = match &self.plan {
            Some(plan) => self.plan_cursor >= window.min(plan.len()),
            None => true,
        };

        if exhausted {
            let obs = Observation {
                step: t,
                temperature_c: self.measured_temp_c,
                soc: self.battery.state().soc,
                actuator_w: self.last_action.actuator_w,
                coolant_temp_c: self.cooling.coolant_temperature_c(),
            };
            match self.controller.plan(&obs) {
                Ok(plan) if !plan.is_empty() => {
                    self.plan = Some(plan);
                    self.plan_cursor = 0;
                }
                Ok(_) => {
                    warn!(
                        step = t,
                        controller = self.controller.name(),
                        "empty plan; holding previous action"
                    );
                    self.plan = None;
                    return (self.last_action, true);
                }
                Err(e) => {
                    warn!(
                        step = t,
                        controller = self.controller.name(),
                        error = %e,
                        "controller failed; holding previous action"
                    );
                    self.plan = None;
                    return (self.last_action, true);
                }
            }
        }

        match &self.plan {
            Some(plan) => {
                let action = plan.actions[self.plan_cursor];
                self.plan_cursor += 1;
                (action, false)
            }
            None => (self.last_action, true),
        }
    }

    /// Executes one simulation step and returns its record.
    pub fn step(&mut self, t: usize) -> StepResult {
        let (planned, fallback) = self.next_action(t);

        // Clip at application: the plant never sees an out-of-range command.
        let actuator_w = self.config.clip_actuator(planned.actuator_w);
        let current_a = self.battery.limits().clamp_current(planned.current_a);
        let action = ControlAction::new(actuator_w, current_a);

        let state = self.battery.state();
        let (temperature_c, soc) = (state.temperature_c, state.soc);
        let q_cool_j = self.cooling.cooling_heat(temperature_c, actuator_w);
        let outcome = self.battery.step(q_cool_j, current_a, temperature_c, soc);

        self.measured_temp_c =
            outcome.temperature_c + gaussian_noise(&mut self.rng, self.config.noise_std_c);

        let health_loss_pct = if (t + 1) % self.health_interval_steps == 0 {
            let loss = self
                .health
                .inference(current_a, outcome.terminal_voltage_v, self.measured_temp_c);
            debug!(step = t, loss_pct = loss, "health estimate");
            loss
        } else {
            0.0
        };
        self.cumulative_loss_pct += health_loss_pct;
        self.last_action = action;

        StepResult {
            step: t,
            time_s: self.config.time_at(t),
            actuator_w,
            current_a,
            temperature_c: self.measured_temp_c,
            true_temperature_c: outcome.temperature_c,
            soc: outcome.soc,
            health_loss_pct,
            cumulative_health_loss_pct: self.cumulative_loss_pct,
            power_w: outcome.power_w,
            demand_w: self.target.at(t) + actuator_w + self.config.aux_base_power_w,
            coolant_temp_c: self.cooling.coolant_temperature_c(),
            fallback,
        }
    }

    /// Executes all steps and returns the complete record vector.
    pub fn run(&mut self) -> Vec<StepResult> {
        let mut clock = Clock::new(self.config.total_steps, self.config.dt_s);
        info!(
            controller = self.controller.name(),
            steps = self.config.total_steps,
            dt_s = self.config.dt_s,
            "simulation started"
        );
        let mut results = Vec::with_capacity(self.config.total_steps);
        clock.run(|t| results.push(self.step(t)));

        let fallbacks = results.iter().filter(|r| r.fallback).count();
        info!(
            elapsed_s = clock.elapsed_s(),
            fallbacks,
            health_loss_pct = self.cumulative_loss_pct,
            "simulation finished"
        );
        results
    }

    /// Returns a reference to the truth battery.
    pub fn battery(&self) -> &B {
        &self.battery
    }

    /// Returns a reference to the simulation configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }
}
