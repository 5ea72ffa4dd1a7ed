//! Thermal-management simulator entry point: CLI wiring and config-driven engine construction.

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use bess_thermal_sim::config::{ControllerKind, ScenarioConfig};
use bess_thermal_sim::io::export::export_csv;
use bess_thermal_sim::sim::engine::Engine;
use bess_thermal_sim::sim::kpi::KpiReport;
use bess_thermal_sim::sim::types::StepResult;

/// Battery pack thermal-management simulator.
///
/// If no --scenario or --preset is given, the baseline preset is used.
#[derive(Debug, Parser)]
#[command(name = "bess-thermal-sim", version)]
struct Cli {
    /// Load scenario from TOML config file
    #[arg(long, conflicts_with = "preset")]
    scenario: Option<PathBuf>,
    /// Use a built-in preset (baseline, hot_ambient, mpc_tracking)
    #[arg(long)]
    preset: Option<String>,
    /// Override the configured controller
    #[arg(long, value_enum)]
    controller: Option<ControllerKind>,
    /// Override random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Override the number of simulated steps
    #[arg(long)]
    steps: Option<usize>,
    /// Export step results to CSV
    #[arg(long)]
    telemetry_out: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
    /// Print only the KPI report
    #[arg(long)]
    quiet: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
}

/// Builds the configured engine, runs it, and computes the KPI report.
fn run_simulation(cfg: &ScenarioConfig) -> anyhow::Result<(Vec<StepResult>, KpiReport)> {
    let sim_config = cfg.sim_config();
    let target = cfg.target_series().context("failed to build target series")?;
    let interval = cfg.health.interval_steps;

    let results = match cfg.controller.kind {
        ControllerKind::Mpc => {
            let controller = cfg.mpc_controller(target.clone());
            let mut engine = Engine::new(
                sim_config.clone(),
                cfg.battery_pack(),
                cfg.cooling_system(),
                controller,
                cfg.health_estimator(),
                interval,
                target,
            );
            engine.run()
        }
        ControllerKind::RuleBased => {
            let controller = cfg.rule_based_controller(target.clone());
            let mut engine = Engine::new(
                sim_config.clone(),
                cfg.battery_pack(),
                cfg.cooling_system(),
                controller,
                cfg.health_estimator(),
                interval,
                target,
            );
            engine.run()
        }
    };

    let kpi = KpiReport::from_results(
        &results,
        sim_config.dt_s,
        cfg.rule_based.temp_low_c,
        cfg.rule_based.temp_high_c,
    );
    Ok((results, kpi))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // --scenario takes priority, then --preset, then baseline default
    let mut scenario = if let Some(ref path) = cli.scenario {
        ScenarioConfig::from_toml_file(path)?
    } else if let Some(ref name) = cli.preset {
        ScenarioConfig::from_preset(name)?
    } else {
        ScenarioConfig::baseline()
    };

    if let Some(kind) = cli.controller {
        scenario.controller.kind = kind;
    }
    if let Some(seed) = cli.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(steps) = cli.steps {
        scenario.simulation.total_steps = steps;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        process::exit(1);
    }

    info!(
        controller = ?scenario.controller.kind,
        steps = scenario.simulation.total_steps,
        dt_s = scenario.simulation.dt_s,
        seed = scenario.simulation.seed,
        "scenario loaded"
    );
    let (results, kpi) = run_simulation(&scenario)?;

    if !cli.quiet {
        for r in &results {
            println!("{r}");
        }
    }
    println!("\n{kpi}");

    if let Some(ref path) = cli.telemetry_out {
        export_csv(&results, path)
            .with_context(|| format!("failed to write CSV to {}", path.display()))?;
        info!(path = %path.display(), rows = results.len(), "telemetry written");
    }

    Ok(())
}
