//! Presets and TOML scenarios drive complete runs through the public builders.

use bess_thermal_sim::config::{ControllerKind, ScenarioConfig};
use bess_thermal_sim::sim::engine::Engine;
use bess_thermal_sim::sim::kpi::KpiReport;

fn run_rule_based(cfg: &ScenarioConfig) -> KpiReport {
    let target = cfg.target_series().unwrap();
    let mut engine = Engine::new(
        cfg.sim_config(),
        cfg.battery_pack(),
        cfg.cooling_system(),
        cfg.rule_based_controller(target.clone()),
        cfg.health_estimator(),
        cfg.health.interval_steps,
        target,
    );
    let results = engine.run();
    assert_eq!(results.len(), cfg.simulation.total_steps);
    KpiReport::from_results(
        &results,
        cfg.simulation.dt_s,
        cfg.rule_based.temp_low_c,
        cfg.rule_based.temp_high_c,
    )
}

#[test]
fn every_preset_loads_and_validates() {
    for name in ScenarioConfig::PRESETS {
        let cfg = ScenarioConfig::from_preset(name);
        assert!(cfg.is_ok(), "preset \"{name}\" should load");
        let errors = cfg.map(|c| c.validate()).unwrap_or_default();
        assert!(errors.is_empty(), "preset \"{name}\": {errors:?}");
    }
}

#[test]
fn baseline_preset_runs() {
    let mut cfg = ScenarioConfig::baseline();
    cfg.simulation.total_steps = 600;
    let kpi = run_rule_based(&cfg);
    assert_eq!(kpi.fallback_count, 0);
    assert!(kpi.max_temp_c < 27.0);
}

#[test]
fn hot_ambient_preset_spends_more_cooling_energy() {
    let mut base = ScenarioConfig::baseline();
    base.simulation.total_steps = 900;
    let mut hot = ScenarioConfig::hot_ambient();
    hot.simulation.total_steps = 900;
    let base_kpi = run_rule_based(&base);
    let hot_kpi = run_rule_based(&hot);
    assert!(hot_kpi.compressor_energy_kwh > base_kpi.compressor_energy_kwh);
}

#[test]
fn mpc_preset_selects_mpc() {
    let cfg = ScenarioConfig::from_preset("mpc_tracking").ok();
    assert_eq!(cfg.map(|c| c.controller.kind), Some(ControllerKind::Mpc));
}

#[test]
fn toml_scenario_overrides_preset_values() {
    let toml = r#"
[simulation]
total_steps = 120
initial_temp_c = 27.0

[battery]
ambient_temp_c = 30.0

[rule_based]
temp_high_c = 27.5
temp_low_c = 25.5

[target]
kind = "constant"
value_w = 1500.0
"#;
    let cfg = ScenarioConfig::from_toml_str(toml);
    assert!(cfg.is_ok(), "{:?}", cfg.as_ref().err());
    let cfg = cfg.unwrap_or_default();
    assert!(cfg.validate().is_empty());
    let kpi = run_rule_based(&cfg);
    assert!(kpi.mean_temp_c > 25.0);
}

#[test]
fn inverted_temperature_bounds_fail_validation() {
    let toml = r#"
[mpc]
temp_min_c = 40.0
temp_max_c = 20.0
"#;
    let cfg = ScenarioConfig::from_toml_str(toml).unwrap_or_default();
    let errors = cfg.validate();
    assert!(errors.iter().any(|e| e.field == "mpc.temp_min_c"));
}
