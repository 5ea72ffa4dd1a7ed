//! Model predictive controller over the battery and cooling models.
//!
//! Each planning call solves a finite-horizon NLP whose equality constraints
//! are the prediction models chained step by step. The problem layout and its
//! static bounds are built once; every solve only refreshes the measured
//! state, the SOC/current bounds, the demand window, and the initial guess.

use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::devices::battery::{BatteryPack, ThermalBattery};
use crate::devices::cooling::CoolingSystem;
use crate::devices::types::ControlAction;
use crate::nlp::{InteriorPointSolver, NlpProblem, NlpSolver, SolverError, fd};
use crate::tariff::PriceSchedule;
use crate::target::TargetSeries;

use super::controller::{ControlError, Controller};
use super::types::{HorizonTrajectory, Observation, PredictedState};

// Physical value = decision variable × scale.
const TEMP_SCALE: f64 = 1.0;
const SOC_SCALE: f64 = 0.01;
const COOLANT_SCALE: f64 = 1.0;
const ACTUATOR_SCALE: f64 = 1000.0;
const CURRENT_SCALE: f64 = 10.0;
const INCREMENT_SCALE: f64 = 100.0;

/// Sharpness of the smooth `max(x, 0)` used on kilowatt quantities (1/kW).
const SOFTPLUS_SHARPNESS: f64 = 10.0;

/// Output term of the objective.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    /// Penalize the gap between delivered power and demand.
    Tracking,
    /// Price the energy exchanged with the grid to cover the gap.
    Economic { weight: f64 },
}

/// How the actuator range enters the problem.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorBoundMode {
    /// Variable bounds.
    Hard,
    /// Unbounded variable with a smooth quadratic penalty outside the range.
    Soft { weight: f64 },
}

/// Formulation parameters of the horizon problem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MpcConfig {
    /// Number of steps in the horizon.
    pub horizon: usize,
    /// Temperature the controller regulates toward (°C).
    pub temp_opt_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub actuator_min_w: f64,
    pub actuator_max_w: f64,
    /// Largest actuator change per step (W). `None` leaves increments free.
    pub rate_limit_w: Option<f64>,
    /// `Q` on `(T − T_opt)²`.
    pub weight_temperature: f64,
    /// `R` on `(u + P_aux)²`.
    pub weight_actuator: f64,
    /// `S` on `Δu²`.
    pub weight_increment: f64,
    /// `H` on the normalized tracking error.
    pub weight_output: f64,
    /// Normalization of the tracking error (W).
    pub power_scale_w: f64,
    pub objective: ObjectiveMode,
    pub actuator_bounds: ActuatorBoundMode,
    /// Fall back to the retry ladder when the first solve fails.
    pub use_retry: bool,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: 24,
            temp_opt_c: 25.0,
            temp_min_c: 15.0,
            temp_max_c: 45.0,
            actuator_min_w: 0.0,
            actuator_max_w: 3000.0,
            rate_limit_w: None,
            weight_temperature: 1.0,
            weight_actuator: 5e-7,
            weight_increment: 5e-6,
            weight_output: 1.0,
            power_scale_w: 1000.0,
            objective: ObjectiveMode::Tracking,
            actuator_bounds: ActuatorBoundMode::Hard,
            use_retry: true,
        }
    }
}

/// Constants of the warm-start retry ladder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryHeuristics {
    /// Margin above `temp_opt_c` beyond which the ramp heads for `hot_target_w` (°C).
    pub hot_margin_c: f64,
    pub hot_target_w: f64,
    /// Below this command an idle compressor ramps to `idle_target_w` (W).
    pub idle_threshold_w: f64,
    pub idle_target_w: f64,
    /// Slew of the ramp guess per step (W).
    pub ramp_step_w: f64,
    /// Fraction of each bound interval trimmed off both ends for the last attempt.
    pub interior_margin: f64,
}

impl Default for RetryHeuristics {
    fn default() -> Self {
        Self {
            hot_margin_c: 1.0,
            hot_target_w: 3000.0,
            idle_threshold_w: 500.0,
            idle_target_w: 750.0,
            ramp_step_w: 300.0,
            interior_margin: 0.05,
        }
    }
}

impl RetryHeuristics {
    /// Actuator level the ramp guess heads for.
    pub fn ramp_target(&self, temperature_c: f64, temp_opt_c: f64, actuator_w: f64) -> f64 {
        if temperature_c > temp_opt_c + self.hot_margin_c {
            self.hot_target_w
        } else if actuator_w < self.idle_threshold_w {
            self.idle_target_w
        } else {
            actuator_w
        }
    }
}

/// Initial-guess strategies tried in order after a failed solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Linear actuator ramp toward a heuristic target.
    Ramp,
    /// Last iterate clipped into the bounds.
    IterateClipped,
    /// Upcoming demand min-max normalized into the actuator range.
    NormalizedDemand,
    /// Last iterate clipped into the bounds shrunk by the interior margin.
    IterateInterior,
}

impl RetryStrategy {
    pub const LADDER: [RetryStrategy; 4] = [
        RetryStrategy::Ramp,
        RetryStrategy::IterateClipped,
        RetryStrategy::NormalizedDemand,
        RetryStrategy::IterateInterior,
    ];
}

/// Lifecycle of the controller's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpcState {
    Idle,
    Built,
    Solving,
    Solved,
    Failed,
}

/// Index arithmetic of the decision vector.
///
/// `[T, SOC, T_c] × (N+1)` followed by `[u, I, Δu] × N`.
#[derive(Debug, Clone, Copy)]
struct Layout {
    horizon: usize,
}

impl Layout {
    fn n_vars(&self) -> usize {
        6 * self.horizon + 3
    }

    fn n_cons(&self) -> usize {
        4 * self.horizon + 3
    }

    fn temp(&self, i: usize) -> usize {
        3 * i
    }

    fn soc(&self, i: usize) -> usize {
        3 * i + 1
    }

    fn coolant(&self, i: usize) -> usize {
        3 * i + 2
    }

    fn actuator(&self, i: usize) -> usize {
        3 * (self.horizon + 1) + 3 * i
    }

    fn current(&self, i: usize) -> usize {
        self.actuator(i) + 1
    }

    fn increment(&self, i: usize) -> usize {
        self.actuator(i) + 2
    }

    fn increment_row(&self, i: usize) -> usize {
        3 + 3 * self.horizon + i
    }
}

/// Per-solve data of the horizon problem.
#[derive(Debug, Clone)]
struct HorizonParams {
    initial: PredictedState,
    previous_actuator_w: f64,
    demand_w: Vec<f64>,
    prices: Vec<(f64, f64)>,
}

/// The horizon NLP in scaled variables.
#[derive(Debug, Clone)]
pub struct HorizonProblem {
    config: MpcConfig,
    layout: Layout,
    battery: BatteryPack,
    cooling: CoolingSystem,
    aux_base_power_w: f64,
    dt_s: f64,
    lower: DVector<f64>,
    upper: DVector<f64>,
    params: HorizonParams,
}

impl HorizonProblem {
    /// Lays out the variables and the static bounds.
    ///
    /// # Panics
    ///
    /// Panics if the horizon is zero.
    pub fn new(
        config: MpcConfig,
        battery: BatteryPack,
        cooling: CoolingSystem,
        aux_base_power_w: f64,
    ) -> Self {
        assert!(config.horizon > 0, "horizon must be > 0");
        let layout = Layout {
            horizon: config.horizon,
        };
        let n = layout.n_vars();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);

        for i in 1..=config.horizon {
            lower[layout.temp(i)] = config.temp_min_c / TEMP_SCALE;
            upper[layout.temp(i)] = config.temp_max_c / TEMP_SCALE;
        }
        for i in 0..config.horizon {
            if config.actuator_bounds == ActuatorBoundMode::Hard {
                lower[layout.actuator(i)] = config.actuator_min_w / ACTUATOR_SCALE;
                upper[layout.actuator(i)] = config.actuator_max_w / ACTUATOR_SCALE;
            }
            if let Some(rate) = config.rate_limit_w {
                lower[layout.increment(i)] = -rate / INCREMENT_SCALE;
                upper[layout.increment(i)] = rate / INCREMENT_SCALE;
            }
        }

        let dt_s = battery.dt_s();
        let params = HorizonParams {
            initial: PredictedState {
                temperature_c: battery.state().temperature_c,
                soc: battery.state().soc,
                coolant_temp_c: cooling.coolant_temperature_c(),
            },
            previous_actuator_w: config.actuator_min_w,
            demand_w: vec![0.0; config.horizon],
            prices: vec![(0.0, 0.0); config.horizon],
        };
        Self {
            config,
            layout,
            battery,
            cooling,
            aux_base_power_w,
            dt_s,
            lower,
            upper,
            params,
        }
    }

    /// Refreshes the measured state, the SOC and current bounds, and the windows.
    fn update(&mut self, obs: &Observation, demand_w: Vec<f64>, prices: Vec<(f64, f64)>) {
        self.battery.observe(obs.temperature_c, obs.soc);
        self.params = HorizonParams {
            initial: PredictedState {
                temperature_c: obs.temperature_c,
                soc: obs.soc,
                coolant_temp_c: obs.coolant_temp_c,
            },
            previous_actuator_w: obs.actuator_w,
            demand_w,
            prices,
        };

        // A measured SOC already under soc_min must not make the horizon infeasible.
        let soc_min = self.battery.limits().soc_min.min(obs.soc);
        let l = self.layout;
        for i in 1..=l.horizon {
            self.lower[l.soc(i)] = soc_min / SOC_SCALE;
            self.upper[l.soc(i)] = 1.0 / SOC_SCALE;
        }
        self.refresh_current_bounds();
    }

    /// Current bounds per horizon step.
    ///
    /// Step 0 takes the model's limits, SOC headroom included, so the applied
    /// action is one the plant accepts. Later steps take the voltage-cutoff
    /// limits at the SOC predicted by holding the present actuator command;
    /// their SOC headroom is left to the state bounds.
    fn refresh_current_bounds(&mut self) {
        let l = self.layout;
        let limits = self.battery.limits();
        let cycles = self.battery.state().cycles;
        let actuator_w = self.clip_actuator(self.params.previous_actuator_w);
        let mut state = self.params.initial;

        for i in 0..l.horizon {
            let ocv = self.battery.config().ocv_v(state.soc.clamp(0.0, 1.0), cycles);
            let (lo, hi) = if i == 0 {
                (limits.current_min_a, limits.current_max_a)
            } else {
                self.battery.config().current_limits(ocv)
            };
            self.lower[l.current(i)] = lo / CURRENT_SCALE;
            self.upper[l.current(i)] = hi / CURRENT_SCALE;

            let demand = self.params.demand_w[i] + actuator_w + self.aux_base_power_w;
            let current = self
                .battery
                .config()
                .current_for_power_at(demand, ocv)
                .clamp(lo, hi.max(lo));
            state = self.stage(state, actuator_w, current);
        }
    }

    fn state_at(&self, z: &DVector<f64>, i: usize) -> PredictedState {
        PredictedState {
            temperature_c: z[self.layout.temp(i)] * TEMP_SCALE,
            soc: z[self.layout.soc(i)] * SOC_SCALE,
            coolant_temp_c: z[self.layout.coolant(i)] * COOLANT_SCALE,
        }
    }

    /// `(u, I, Δu)` in watts, amperes, watts.
    fn control_at(&self, z: &DVector<f64>, i: usize) -> (f64, f64, f64) {
        (
            z[self.layout.actuator(i)] * ACTUATOR_SCALE,
            z[self.layout.current(i)] * CURRENT_SCALE,
            z[self.layout.increment(i)] * INCREMENT_SCALE,
        )
    }

    /// One step of the embedded dynamics in physical units.
    fn stage(&self, state: PredictedState, actuator_w: f64, current_a: f64) -> PredictedState {
        let cool = self
            .cooling
            .predict(state.temperature_c, actuator_w, state.coolant_temp_c);
        let out = self
            .battery
            .predict(cool.heat_j, current_a, state.temperature_c, state.soc);
        PredictedState {
            temperature_c: out.temperature_c,
            soc: out.soc,
            coolant_temp_c: cool.coolant_out_c,
        }
    }

    /// Stage map on scaled `[T, SOC, T_c, u, I]`, returning scaled next state.
    fn scaled_stage(&self, v: [f64; 5]) -> [f64; 3] {
        let next = self.stage(
            PredictedState {
                temperature_c: v[0] * TEMP_SCALE,
                soc: v[1] * SOC_SCALE,
                coolant_temp_c: v[2] * COOLANT_SCALE,
            },
            v[3] * ACTUATOR_SCALE,
            v[4] * CURRENT_SCALE,
        );
        [
            next.temperature_c / TEMP_SCALE,
            next.soc / SOC_SCALE,
            next.coolant_temp_c / COOLANT_SCALE,
        ]
    }

    /// Actuator, increment, output, and soft-bound terms of stage `i`.
    fn stage_cost(
        &self,
        i: usize,
        soc: f64,
        actuator_w: f64,
        current_a: f64,
        increment_w: f64,
    ) -> f64 {
        let cfg = &self.config;
        let aux = self.aux_base_power_w;
        let mut cost = cfg.weight_actuator * (actuator_w + aux).powi(2)
            + cfg.weight_increment * increment_w.powi(2);

        let delivered_w = self.battery.config().power_response_w(
            current_a,
            soc,
            self.battery.state().cycles,
        );
        let demand_w = self.params.demand_w[i] + actuator_w + aux;
        match cfg.objective {
            ObjectiveMode::Tracking => {
                cost += cfg.weight_output * ((delivered_w - demand_w) / cfg.power_scale_w).powi(2);
            }
            ObjectiveMode::Economic { weight } => {
                let grid_kw = (demand_w - delivered_w) / 1000.0;
                let (buy, sell) = self.params.prices[i];
                let hours = self.dt_s / 3600.0;
                cost += weight * (buy * softplus(grid_kw) - sell * softplus(-grid_kw)) * hours;
            }
        }

        if let ActuatorBoundMode::Soft { weight } = cfg.actuator_bounds {
            let below = softplus((cfg.actuator_min_w - actuator_w) / 1000.0);
            let above = softplus((actuator_w - cfg.actuator_max_w) / 1000.0);
            cost += weight * (below * below + above * above);
        }
        cost
    }

    /// Clamps a current into the bounds of the current solve.
    fn clamp_current(&self, i: usize, current_a: f64) -> f64 {
        let idx = self.layout.current(i);
        current_a.clamp(self.lower[idx] * CURRENT_SCALE, self.upper[idx] * CURRENT_SCALE)
    }

    /// Decision vector obtained by simulating the dynamics under given controls.
    ///
    /// Without explicit currents, each step draws the current that serves
    /// the demand at the predicted SOC.
    fn rollout(&self, actuator_w: &[f64], currents_a: Option<&[f64]>) -> DVector<f64> {
        let l = self.layout;
        let mut z = DVector::zeros(l.n_vars());
        let mut state = self.params.initial;
        let mut previous = self.params.previous_actuator_w;
        let battery_cfg = self.battery.config();
        let cycles = self.battery.state().cycles;

        for i in 0..l.horizon {
            z[l.temp(i)] = state.temperature_c / TEMP_SCALE;
            z[l.soc(i)] = state.soc / SOC_SCALE;
            z[l.coolant(i)] = state.coolant_temp_c / COOLANT_SCALE;

            let u = actuator_w[i];
            let current = match currents_a {
                Some(c) => c[i],
                None => {
                    let demand = self.params.demand_w[i] + u + self.aux_base_power_w;
                    battery_cfg.current_for_power_at(demand, battery_cfg.ocv_v(state.soc, cycles))
                }
            };
            let current = self.clamp_current(i, current);
            z[l.actuator(i)] = u / ACTUATOR_SCALE;
            z[l.current(i)] = current / CURRENT_SCALE;
            z[l.increment(i)] = (u - previous) / INCREMENT_SCALE;
            previous = u;
            state = self.stage(state, u, current);
        }
        z[l.temp(l.horizon)] = state.temperature_c / TEMP_SCALE;
        z[l.soc(l.horizon)] = state.soc / SOC_SCALE;
        z[l.coolant(l.horizon)] = state.coolant_temp_c / COOLANT_SCALE;
        z
    }

    fn clip_actuator(&self, actuator_w: f64) -> f64 {
        actuator_w.clamp(self.config.actuator_min_w, self.config.actuator_max_w)
    }

    /// Holds the present actuator command over the horizon.
    fn hold_guess(&self) -> DVector<f64> {
        let u = vec![self.clip_actuator(self.params.previous_actuator_w); self.layout.horizon];
        self.rollout(&u, None)
    }

    /// Clips `z` into the bounds shrunk by `margin`, re-pinning the initial state.
    ///
    /// Non-finite entries, or a vector of the wrong length, fall back to the hold guess.
    fn clip_to_bounds(&self, z: &DVector<f64>, margin: f64) -> DVector<f64> {
        let fallback = self.hold_guess();
        if z.len() != fallback.len() {
            return fallback;
        }
        let mut out = DVector::from_iterator(
            z.len(),
            z.iter()
                .zip(fallback.iter())
                .map(|(v, f)| if v.is_finite() { *v } else { *f }),
        );
        for j in 0..out.len() {
            let (lo, hi) = (self.lower[j], self.upper[j]);
            let (lo, hi) = match (lo.is_finite(), hi.is_finite()) {
                (true, true) => {
                    let trim = margin * (hi - lo);
                    (lo + trim, hi - trim)
                }
                (true, false) => (lo + margin * lo.abs().max(1.0), hi),
                (false, true) => (lo, hi - margin * hi.abs().max(1.0)),
                (false, false) => (lo, hi),
            };
            out[j] = out[j].clamp(lo, hi.max(lo));
        }
        let l = self.layout;
        let initial = self.params.initial;
        out[l.temp(0)] = initial.temperature_c / TEMP_SCALE;
        out[l.soc(0)] = initial.soc / SOC_SCALE;
        out[l.coolant(0)] = initial.coolant_temp_c / COOLANT_SCALE;
        out
    }

    /// Physical trajectory encoded in `z`.
    fn decode(&self, z: &DVector<f64>) -> HorizonTrajectory {
        let n = self.layout.horizon;
        let states = (0..=n).map(|i| self.state_at(z, i)).collect();
        let actions = (0..n)
            .map(|i| {
                let (u, current, _) = self.control_at(z, i);
                ControlAction::new(u, current)
            })
            .collect();
        HorizonTrajectory { actions, states }
    }
}

/// Smooth `max(x, 0)`, accurate to a few hundredths away from zero.
fn softplus(x: f64) -> f64 {
    let y = SOFTPLUS_SHARPNESS * x;
    (y.max(0.0) + (-y.abs()).exp().ln_1p()) / SOFTPLUS_SHARPNESS
}

impl NlpProblem for HorizonProblem {
    fn num_variables(&self) -> usize {
        self.layout.n_vars()
    }

    fn num_constraints(&self) -> usize {
        self.layout.n_cons()
    }

    fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        (self.lower.clone(), self.upper.clone())
    }

    fn objective(&self, z: &DVector<f64>) -> f64 {
        let cfg = &self.config;
        let mut total = 0.0;
        for i in 0..self.layout.horizon {
            let soc = z[self.layout.soc(i)] * SOC_SCALE;
            let (u, current, du) = self.control_at(z, i);
            total += self.stage_cost(i, soc, u, current, du);
        }
        for i in 1..=self.layout.horizon {
            let t = z[self.layout.temp(i)] * TEMP_SCALE;
            total += cfg.weight_temperature * (t - cfg.temp_opt_c).powi(2);
        }
        total
    }

    fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
        let l = self.layout;
        let init = self.params.initial;
        let mut r = DVector::zeros(l.n_cons());
        r[0] = z[l.temp(0)] - init.temperature_c / TEMP_SCALE;
        r[1] = z[l.soc(0)] - init.soc / SOC_SCALE;
        r[2] = z[l.coolant(0)] - init.coolant_temp_c / COOLANT_SCALE;

        for i in 0..l.horizon {
            let next = self.scaled_stage([
                z[l.temp(i)],
                z[l.soc(i)],
                z[l.coolant(i)],
                z[l.actuator(i)],
                z[l.current(i)],
            ]);
            let row = 3 + 3 * i;
            r[row] = z[l.temp(i + 1)] - next[0];
            r[row + 1] = z[l.soc(i + 1)] - next[1];
            r[row + 2] = z[l.coolant(i + 1)] - next[2];
        }

        for i in 0..l.horizon {
            let u = z[l.actuator(i)] * ACTUATOR_SCALE;
            let previous = if i == 0 {
                self.params.previous_actuator_w
            } else {
                z[l.actuator(i - 1)] * ACTUATOR_SCALE
            };
            r[l.increment_row(i)] = z[l.increment(i)] - (u - previous) / INCREMENT_SCALE;
        }
        r
    }

    /// Exact entries for the linear rows, stage-wise differences for the dynamics.
    fn jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let l = self.layout;
        let mut jac = DMatrix::zeros(l.n_cons(), l.n_vars());
        jac[(0, l.temp(0))] = 1.0;
        jac[(1, l.soc(0))] = 1.0;
        jac[(2, l.coolant(0))] = 1.0;

        for i in 0..l.horizon {
            let row = 3 + 3 * i;
            jac[(row, l.temp(i + 1))] = 1.0;
            jac[(row + 1, l.soc(i + 1))] = 1.0;
            jac[(row + 2, l.coolant(i + 1))] = 1.0;

            let cols = [l.temp(i), l.soc(i), l.coolant(i), l.actuator(i), l.current(i)];
            let base = cols.map(|c| z[c]);
            for (k, &col) in cols.iter().enumerate() {
                let h = fd::step_size(base[k]);
                let mut forward = base;
                forward[k] += h;
                let mut backward = base;
                backward[k] -= h;
                let f = self.scaled_stage(forward);
                let b = self.scaled_stage(backward);
                for r in 0..3 {
                    jac[(row + r, col)] = -(f[r] - b[r]) / (2.0 * h);
                }
            }
        }

        let ratio = ACTUATOR_SCALE / INCREMENT_SCALE;
        for i in 0..l.horizon {
            let row = l.increment_row(i);
            jac[(row, l.increment(i))] = 1.0;
            jac[(row, l.actuator(i))] = -ratio;
            if i > 0 {
                jac[(row, l.actuator(i - 1))] = ratio;
            }
        }
        jac
    }
}

/// Rolling-horizon optimal controller.
///
/// Generic over the NLP solver so the retry ladder can be exercised with a
/// scripted solver.
#[derive(Debug)]
pub struct MpcController<S: NlpSolver = InteriorPointSolver> {
    retry: RetryHeuristics,
    solver: S,
    problem: HorizonProblem,
    target: TargetSeries,
    prices: PriceSchedule,
    state: MpcState,
    warm_start: Option<(Vec<f64>, Vec<f64>)>,
}

impl<S: NlpSolver> MpcController<S> {
    /// Creates an idle controller.
    ///
    /// # Arguments
    ///
    /// * `config` - Horizon formulation
    /// * `retry` - Retry ladder constants
    /// * `solver` - NLP solver
    /// * `battery` - Prediction copy of the pack
    /// * `cooling` - Prediction copy of the cooling loop
    /// * `target` - Demand series, windowed per solve
    /// * `prices` - Price schedule for the economic objective
    /// * `aux_base_power_w` - Pump and fan load added to the compressor
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: MpcConfig,
        retry: RetryHeuristics,
        solver: S,
        battery: BatteryPack,
        cooling: CoolingSystem,
        target: TargetSeries,
        prices: PriceSchedule,
        aux_base_power_w: f64,
    ) -> Self {
        Self {
            retry,
            solver,
            problem: HorizonProblem::new(config, battery, cooling, aux_base_power_w),
            target,
            prices,
            state: MpcState::Idle,
            warm_start: None,
        }
    }

    pub fn state(&self) -> MpcState {
        self.state
    }

    pub fn config(&self) -> &MpcConfig {
        &self.problem.config
    }

    pub fn problem(&self) -> &HorizonProblem {
        &self.problem
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Marks the problem structure ready; later solves only update parameters.
    pub fn build(&mut self) {
        if self.state == MpcState::Idle {
            debug!(
                horizon = self.problem.layout.horizon,
                variables = self.problem.layout.n_vars(),
                constraints = self.problem.layout.n_cons(),
                "mpc problem built"
            );
            self.state = MpcState::Built;
        }
    }

    fn prepare(&mut self, obs: &Observation) {
        self.build();
        let horizon = self.problem.layout.horizon;
        let demand = self.target.window(obs.step, horizon);
        let prices = (0..horizon).map(|i| self.prices.price(obs.step + i)).collect();
        self.problem.update(obs, demand, prices);
    }

    /// Warm start from the previous plan shifted by one step, else hold the actuator.
    fn default_guess(&self) -> DVector<f64> {
        match &self.warm_start {
            Some((actuator, current)) => {
                let shift = |v: &[f64]| {
                    let mut out: Vec<f64> = v.iter().skip(1).copied().collect();
                    out.push(v.last().copied().unwrap_or(0.0));
                    out
                };
                let actuator: Vec<f64> = shift(actuator.as_slice())
                    .into_iter()
                    .map(|u| self.problem.clip_actuator(u))
                    .collect();
                let current = shift(current.as_slice());
                self.problem.rollout(&actuator, Some(&current))
            }
            None => self.problem.hold_guess(),
        }
    }

    /// Initial guess for one rung of the retry ladder.
    fn retry_guess(&self, strategy: RetryStrategy, last_iterate: &DVector<f64>) -> DVector<f64> {
        let p = &self.problem;
        let horizon = p.layout.horizon;
        match strategy {
            RetryStrategy::Ramp => {
                let start = p.clip_actuator(p.params.previous_actuator_w);
                let target = p.clip_actuator(self.retry.ramp_target(
                    p.params.initial.temperature_c,
                    p.config.temp_opt_c,
                    start,
                ));
                let step = self.retry.ramp_step_w.abs();
                let mut u = start;
                let ramp: Vec<f64> = (0..horizon)
                    .map(|_| {
                        u += (target - u).clamp(-step, step);
                        u
                    })
                    .collect();
                p.rollout(&ramp, None)
            }
            RetryStrategy::IterateClipped => p.clip_to_bounds(last_iterate, 0.0),
            RetryStrategy::NormalizedDemand => {
                let demand = &p.params.demand_w;
                let lo = demand.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = demand.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let (u_min, u_max) = (p.config.actuator_min_w, p.config.actuator_max_w);
                let u: Vec<f64> = demand
                    .iter()
                    .map(|d| {
                        let frac = if hi - lo > 1e-9 { (d - lo) / (hi - lo) } else { 0.5 };
                        u_min + frac * (u_max - u_min)
                    })
                    .collect();
                p.rollout(&u, None)
            }
            RetryStrategy::IterateInterior => p.clip_to_bounds(last_iterate, self.retry.interior_margin),
        }
    }

    fn attempt(&mut self, x0: &DVector<f64>) -> Result<HorizonTrajectory, SolverError> {
        self.state = MpcState::Solving;
        match self.solver.solve(&self.problem, x0) {
            Ok(sol) => {
                self.state = MpcState::Solved;
                debug!(
                    iterations = sol.iterations,
                    objective = sol.objective,
                    status = ?sol.status,
                    "mpc solve finished"
                );
                let trajectory = self.problem.decode(&sol.x);
                self.warm_start = Some((
                    trajectory.actions.iter().map(|a| a.actuator_w).collect(),
                    trajectory.actions.iter().map(|a| a.current_a).collect(),
                ));
                Ok(trajectory)
            }
            Err(e) => {
                self.state = MpcState::Failed;
                Err(e)
            }
        }
    }

    /// Solves once from the default initial guess.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Solver`] if the solver fails.
    pub fn solve(&mut self, obs: &Observation) -> Result<HorizonTrajectory, ControlError> {
        self.prepare(obs);
        let x0 = self.default_guess();
        Ok(self.attempt(&x0)?)
    }

    /// Solves with the retry ladder behind the default initial guess.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Exhausted`] when every attempt fails.
    pub fn multi_solve(&mut self, obs: &Observation) -> Result<HorizonTrajectory, ControlError> {
        self.prepare(obs);
        let x0 = self.default_guess();
        let mut last = match self.attempt(&x0) {
            Ok(trajectory) => return Ok(trajectory),
            Err(e) => e,
        };
        let mut attempts = 1;

        for strategy in RetryStrategy::LADDER {
            attempts += 1;
            debug!(step = obs.step, ?strategy, error = %last, "mpc retrying");
            let x0 = self.retry_guess(strategy, last.last_iterate());
            match self.attempt(&x0) {
                Ok(trajectory) => {
                    debug!(step = obs.step, ?strategy, attempts, "mpc recovered");
                    return Ok(trajectory);
                }
                Err(e) => last = e,
            }
        }
        warn!(step = obs.step, attempts, error = %last, "mpc retry ladder exhausted");
        self.warm_start = None;
        Err(ControlError::Exhausted { attempts, last })
    }
}

impl<S: NlpSolver> Controller for MpcController<S> {
    fn plan(&mut self, obs: &Observation) -> Result<HorizonTrajectory, ControlError> {
        if self.problem.config.use_retry {
            self.multi_solve(obs)
        } else {
            self.solve(obs)
        }
    }

    fn name(&self) -> &'static str {
        "mpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::battery::BatteryPackConfig;
    use crate::devices::cooling::{CoefficientTable, CoolingConfig};
    use approx::assert_relative_eq;

    fn observation(soc: f64) -> Observation {
        Observation {
            step: 0,
            temperature_c: 30.0,
            soc,
            actuator_w: 1000.0,
            coolant_temp_c: 28.0,
        }
    }

    fn problem_with(config: MpcConfig) -> HorizonProblem {
        let horizon = config.horizon;
        let battery = BatteryPack::new(BatteryPackConfig::default(), 30.0, 0.5, 60.0);
        let cooling = CoolingSystem::new(CoolingConfig::default(), &CoefficientTable::default(), 35.0, 60.0);
        let mut p = HorizonProblem::new(config, battery, cooling, 200.0);
        p.update(&observation(0.5), vec![500.0; horizon], vec![(1.0, 0.8); horizon]);
        p
    }

    fn problem(horizon: usize) -> HorizonProblem {
        problem_with(MpcConfig {
            horizon,
            ..MpcConfig::default()
        })
    }

    #[test]
    fn layout_sizes() {
        let l = Layout { horizon: 24 };
        assert_eq!(l.n_vars(), 147);
        assert_eq!(l.n_cons(), 99);
        assert_eq!(l.actuator(0), 75);
        assert_eq!(l.increment(23), 146);
    }

    #[test]
    fn rollout_satisfies_constraints() {
        let p = problem(6);
        let z = p.hold_guess();
        let r = p.constraints(&z);
        assert!(r.iter().all(|v| v.abs() < 1e-9), "residuals: {r}");
    }

    #[test]
    fn structured_jacobian_matches_differences() {
        let p = problem(4);
        let z = p.hold_guess();
        let exact = p.jacobian(&z);
        let numeric = fd::jacobian(&|v: &DVector<f64>| p.constraints(v), &z, p.num_constraints());
        assert_relative_eq!(exact, numeric, epsilon = 1e-5);
    }

    #[test]
    fn clip_repins_initial_state_and_respects_bounds() {
        let p = problem(4);
        let wild = DVector::from_element(p.num_variables(), 1e6);
        let clipped = p.clip_to_bounds(&wild, 0.05);
        let (lo, hi) = p.bounds();
        for j in 0..clipped.len() {
            assert!(clipped[j] >= lo[j] && clipped[j] <= hi[j]);
        }
        assert_relative_eq!(clipped[p.layout.temp(0)], 30.0);
    }

    #[test]
    fn soft_mode_leaves_actuator_unbounded() {
        let battery = BatteryPack::new(BatteryPackConfig::default(), 30.0, 0.5, 60.0);
        let cooling = CoolingSystem::new(CoolingConfig::default(), &CoefficientTable::default(), 35.0, 60.0);
        let config = MpcConfig {
            horizon: 3,
            actuator_bounds: ActuatorBoundMode::Soft { weight: 10.0 },
            ..MpcConfig::default()
        };
        let p = HorizonProblem::new(config, battery, cooling, 200.0);
        let (lo, hi) = p.bounds();
        assert!(lo[p.layout.actuator(0)].is_infinite());
        assert!(hi[p.layout.actuator(0)].is_infinite());
        // Penalty grows past the range.
        assert!(p.stage_cost(0, 0.5, 4000.0, 0.0, 0.0) > p.stage_cost(0, 0.5, 3000.0, 0.0, 0.0));
    }

    #[test]
    fn economic_cost_follows_prices() {
        let mut p = problem_with(MpcConfig {
            horizon: 2,
            objective: ObjectiveMode::Economic { weight: 1.0 },
            ..MpcConfig::default()
        });
        // Zero current: 500 W demand + 1000 W compressor + 200 W aux are imported.
        let cheap = p.stage_cost(0, 0.5, 1000.0, 0.0, 0.0);
        p.params.prices[0] = (2.0, 1.6);
        let dear = p.stage_cost(0, 0.5, 1000.0, 0.0, 0.0);
        assert!(dear > cheap);
        assert_relative_eq!(dear - cheap, 1.7 / 60.0, epsilon = 1e-6);

        // 100 A delivers far more than the demand: the surplus is sold.
        p.params.prices[0] = (1.0, 0.8);
        let low_sell = p.stage_cost(0, 0.5, 1000.0, 100.0, 0.0);
        p.params.prices[0] = (1.0, 0.95);
        let high_sell = p.stage_cost(0, 0.5, 1000.0, 100.0, 0.0);
        assert!(high_sell < low_sell);
    }

    #[test]
    fn current_bounds_follow_predicted_soc() {
        let mut p = problem(6);
        p.update(&observation(0.5), vec![50_000.0; 6], vec![(1.0, 0.8); 6]);
        let (_, hi) = p.bounds();
        let upper: Vec<f64> = (0..6).map(|i| hi[p.layout.current(i)] * CURRENT_SCALE).collect();
        assert_relative_eq!(upper[0], p.battery.limits().current_max_a, epsilon = 1e-9);
        // Discharging lowers the predicted OCV and with it the discharge limit.
        for w in upper.windows(2) {
            assert!(w[1] < w[0], "upper bounds not decreasing: {upper:?}");
        }
    }

    #[test]
    fn first_current_bound_keeps_soc_headroom() {
        let mut p = problem(4);
        p.update(&observation(0.999), vec![-50_000.0; 4], vec![(1.0, 0.8); 4]);
        let (lo, _) = p.bounds();
        let amps_per_soc = p.battery.config().pack_capacity_ah() * 3600.0 / 60.0;
        assert!(lo[p.layout.current(0)] * CURRENT_SCALE >= -0.001 * amps_per_soc - 1e-9);
    }

    #[test]
    fn soc_below_minimum_stays_feasible() {
        let mut p = problem(3);
        p.update(&observation(0.01), vec![0.0; 3], vec![(1.0, 0.8); 3]);
        let (lo, _) = p.bounds();
        assert!(lo[p.layout.soc(1)] * SOC_SCALE <= 0.01 + 1e-12);
    }

    #[test]
    fn softplus_approximates_relu() {
        assert!(softplus(-1.0) < 1e-4);
        assert_relative_eq!(softplus(2.0), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn ramp_target_heuristic() {
        let h = RetryHeuristics::default();
        assert_eq!(h.ramp_target(27.0, 25.0, 0.0), 3000.0);
        assert_eq!(h.ramp_target(25.0, 25.0, 100.0), 750.0);
        assert_eq!(h.ramp_target(25.0, 25.0, 1500.0), 1500.0);
    }
}
