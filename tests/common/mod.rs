//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use bess_thermal_sim::devices::{
    BatteryPack, BatteryPackConfig, CoefficientTable, CoolingConfig, CoolingSystem,
};
use bess_thermal_sim::health::{EmpiricalHealthEstimator, HealthConfig};
use bess_thermal_sim::nlp::InteriorPointSolver;
use bess_thermal_sim::sim::controller::{RuleBasedConfig, RuleBasedController};
use bess_thermal_sim::sim::mpc::{MpcConfig, MpcController, RetryHeuristics};
use bess_thermal_sim::sim::types::{Observation, SimConfig};
use bess_thermal_sim::target::TargetSeries;
use bess_thermal_sim::tariff::PriceSchedule;

/// Ambient temperature used throughout (°C).
pub const AMBIENT_C: f64 = 35.0;

/// Simulation configuration with the given step, length, and initial conditions.
pub fn sim_config(dt_s: f64, total_steps: usize, initial_temp_c: f64, initial_soc: f64) -> SimConfig {
    let mut cfg = SimConfig::new(dt_s, total_steps, 42);
    cfg.initial_temp_c = initial_temp_c;
    cfg.initial_soc = initial_soc;
    cfg
}

/// Default pack (100s20p, 3 Ah cells) in a 35 °C ambient.
pub fn battery(cfg: &SimConfig) -> BatteryPack {
    let config = BatteryPackConfig {
        ambient_temp_c: AMBIENT_C,
        ..BatteryPackConfig::default()
    };
    BatteryPack::new(config, cfg.initial_temp_c, cfg.initial_soc, cfg.dt_s)
}

/// Default cooling loop in a 35 °C ambient.
pub fn cooling(cfg: &SimConfig) -> CoolingSystem {
    CoolingSystem::new(
        CoolingConfig::default(),
        &CoefficientTable::default(),
        AMBIENT_C,
        cfg.dt_s,
    )
}

pub fn health(cfg: &SimConfig) -> EmpiricalHealthEstimator {
    let pack = BatteryPackConfig::default();
    EmpiricalHealthEstimator::new(
        HealthConfig::default(),
        pack.pack_capacity_ah(),
        pack.n_series,
        cfg.dt_s,
    )
}

/// Rule-based controller with 24/26 °C thresholds.
pub fn rule_based(cfg: &SimConfig, target: TargetSeries) -> RuleBasedController {
    RuleBasedController::new(
        RuleBasedConfig::default(),
        battery(cfg),
        cooling(cfg),
        target,
        cfg.aux_base_power_w,
    )
}

/// MPC with the interior-point solver and a horizon of `horizon` steps.
pub fn mpc(cfg: &SimConfig, horizon: usize, target: TargetSeries) -> MpcController {
    let config = MpcConfig {
        horizon,
        ..MpcConfig::default()
    };
    mpc_with(cfg, config, target)
}

/// MPC with the interior-point solver and an explicit formulation.
pub fn mpc_with(cfg: &SimConfig, config: MpcConfig, target: TargetSeries) -> MpcController {
    MpcController::new(
        config,
        RetryHeuristics::default(),
        InteriorPointSolver::default(),
        battery(cfg),
        cooling(cfg),
        target,
        PriceSchedule::new(Default::default(), cfg.dt_s),
        cfg.aux_base_power_w,
    )
}

/// Observation at the simulation's initial conditions.
pub fn initial_observation(cfg: &SimConfig) -> Observation {
    Observation {
        step: 0,
        temperature_c: cfg.initial_temp_c,
        soc: cfg.initial_soc,
        actuator_w: 0.0,
        coolant_temp_c: CoolingConfig::default().initial_coolant_temp_c,
    }
}
