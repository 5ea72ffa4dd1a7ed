use serde::Deserialize;

use crate::devices::types::OperatingLimits;

/// Offset between Celsius and Kelvin.
const KELVIN_OFFSET: f64 = 273.15;

/// Smallest discriminant admitted by [`BatteryPack::current_for_power`].
///
/// Demands beyond the maximum-power point collapse onto the floor instead of
/// producing a NaN, so the function stays defined inside the optimizer.
const DISCRIMINANT_FLOOR: f64 = 1e-6;

/// Immutable electro-thermal parameters of a battery pack.
///
/// A single cell is modeled with `n_series = n_parallel = 1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryPackConfig {
    /// Cells in series.
    pub n_series: u32,
    /// Parallel strings.
    pub n_parallel: u32,
    /// Nominal cell capacity (Ah).
    pub ah_cell: f64,
    /// State-of-health capacity factor (0.0–1.0] applied to the nominal capacity.
    pub soh: f64,
    /// Cell internal resistance (Ω).
    pub r_cell_ohm: f64,
    /// Entropic heat coefficient (V/K).
    pub entropy_coefficient_v_per_k: f64,
    /// Lumped pack thermal mass (kg).
    pub thermal_mass_kg: f64,
    /// Pack specific heat (J/kg·K).
    pub specific_heat_j_per_kg_k: f64,
    /// Heat exchange coefficient with ambient air (W/K).
    pub ambient_exchange_w_per_k: f64,
    /// Ambient air temperature (°C).
    pub ambient_temp_c: f64,
    /// Cell charge cutoff voltage (V).
    pub charge_cutoff_v: f64,
    /// Cell discharge cutoff voltage (V).
    pub discharge_cutoff_v: f64,
    /// Cell OCV at zero SOC (V).
    pub ocv_base_v: f64,
    /// OCV slope versus SOC for a fresh cell (V).
    pub ocv_slope_v: f64,
    /// Loss of OCV slope per equivalent cycle (V/cycle).
    pub ocv_fade_per_cycle_v: f64,
    /// Equivalent cycles already accumulated at construction.
    pub initial_cycles: f64,
}

impl Default for BatteryPackConfig {
    fn default() -> Self {
        Self {
            n_series: 100,
            n_parallel: 20,
            ah_cell: 3.0,
            soh: 1.0,
            r_cell_ohm: 0.02,
            entropy_coefficient_v_per_k: 2e-4,
            thermal_mass_kg: 300.0,
            specific_heat_j_per_kg_k: 1350.0,
            ambient_exchange_w_per_k: 20.0,
            ambient_temp_c: 35.0,
            charge_cutoff_v: 4.2,
            discharge_cutoff_v: 2.5,
            ocv_base_v: 3.3,
            ocv_slope_v: 0.882,
            ocv_fade_per_cycle_v: 9.5e-5,
            initial_cycles: 300.0,
        }
    }
}

impl BatteryPackConfig {
    /// Total number of cells.
    pub fn n_cells(&self) -> f64 {
        f64::from(self.n_series) * f64::from(self.n_parallel)
    }

    /// Usable pack capacity after state-of-health fade (Ah).
    pub fn pack_capacity_ah(&self) -> f64 {
        self.ah_cell * self.soh * f64::from(self.n_parallel)
    }

    /// Heat capacity of the pack (J/K).
    pub fn heat_capacity_j_per_k(&self) -> f64 {
        self.thermal_mass_kg * self.specific_heat_j_per_kg_k
    }

    /// Cell open-circuit voltage for a given SOC and cycle count.
    pub fn ocv_v(&self, soc: f64, cycles: f64) -> f64 {
        (self.ocv_slope_v - self.ocv_fade_per_cycle_v * cycles) * soc + self.ocv_base_v
    }

    /// Minimum SOC imposed by the temperature-dependent discharge capacity.
    ///
    /// `Ah_max(T) = -0.0002·T² + 0.014·T + 2.69`, scaled to this cell's
    /// nominal capacity.
    pub fn soc_min(&self, temperature_c: f64) -> f64 {
        let reference_ah = -0.0002 * temperature_c.powi(2) + 0.014 * temperature_c + 2.69;
        let ah_max = reference_ah * self.ah_cell / 3.0;
        (1.0 - ah_max / (self.ah_cell * self.soh)).max(0.0)
    }

    /// Pack current limits implied by the cutoff voltages at a cell OCV.
    pub fn current_limits(&self, ocv_v: f64) -> (f64, f64) {
        let n_par = f64::from(self.n_parallel);
        let i_min = (ocv_v - self.charge_cutoff_v) / self.r_cell_ohm * n_par;
        let i_max = (ocv_v - self.discharge_cutoff_v) / self.r_cell_ohm * n_par;
        (i_min, i_max)
    }

    /// Pack current limits that keep one step of `dt_s` inside `[soc_min, 1]`.
    ///
    /// A SOC already outside the range yields a zero limit on that side, so
    /// the pack may only move back toward the range.
    pub fn headroom_limits(&self, soc: f64, soc_min: f64, dt_s: f64) -> (f64, f64) {
        let amps_per_soc = self.pack_capacity_ah() * 3600.0 / dt_s;
        let i_min = -(1.0 - soc).max(0.0) * amps_per_soc;
        let i_max = (soc - soc_min).max(0.0) * amps_per_soc;
        (i_min, i_max)
    }

    /// Pack current that delivers `power_w` at a given cell OCV.
    ///
    /// Solves `P_cell = I·(OCV − I·R)` for the root continuous through zero
    /// power, with the discriminant clamped to a small positive floor.
    pub fn current_for_power_at(&self, power_w: f64, ocv_v: f64) -> f64 {
        let r = self.r_cell_ohm;
        let p_cell = power_w / self.n_cells();
        let discriminant = (ocv_v * ocv_v - 4.0 * r * p_cell).max(DISCRIMINANT_FLOOR);
        let i_cell = (ocv_v - discriminant.sqrt()) / (2.0 * r);
        i_cell * f64::from(self.n_parallel)
    }

    /// Terminal power (W) delivered at a pack current, SOC and cycle count.
    pub fn power_response_w(&self, current_a: f64, soc: f64, cycles: f64) -> f64 {
        let i_cell = current_a / f64::from(self.n_parallel);
        i_cell * (self.ocv_v(soc, cycles) - i_cell * self.r_cell_ohm) * self.n_cells()
    }

    /// Pure single-step electro-thermal transition.
    ///
    /// `q_cool_j` is the heat extracted by the cooling loop over the step.
    /// Does not touch any model state, so it can be embedded in a predictor.
    pub fn transition(
        &self,
        q_cool_j: f64,
        current_a: f64,
        temperature_c: f64,
        soc: f64,
        cycles: f64,
        dt_s: f64,
    ) -> StepOutcome {
        let n_cells = self.n_cells();
        let i_cell = current_a / f64::from(self.n_parallel);
        let ocv = self.ocv_v(soc, cycles);

        // Discharge (positive current) lowers generation through the entropic term.
        let heat_generation_w = (i_cell * i_cell * self.r_cell_ohm
            - i_cell * (temperature_c + KELVIN_OFFSET) * self.entropy_coefficient_v_per_k)
            * n_cells;
        let ambient_exchange_w =
            self.ambient_exchange_w_per_k * (self.ambient_temp_c - temperature_c);

        let next_temperature_c = temperature_c
            + (-q_cool_j + heat_generation_w * dt_s + ambient_exchange_w * dt_s)
                / self.heat_capacity_j_per_k();

        let delta_soc = -(current_a * dt_s / 3600.0) / self.pack_capacity_ah();
        let next_soc = soc + delta_soc;

        let terminal_cell_v = ocv - i_cell * self.r_cell_ohm;
        let power_w = self.power_response_w(current_a, soc, cycles);

        StepOutcome {
            temperature_c: next_temperature_c,
            power_w,
            soc: next_soc,
            heat_generation_w,
            ambient_exchange_w,
            terminal_voltage_v: terminal_cell_v * f64::from(self.n_series),
            delta_soc,
        }
    }
}

/// Mutable state of one battery pack instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryState {
    /// Pack temperature (°C).
    pub temperature_c: f64,
    /// State of charge (0.0–1.0).
    pub soc: f64,
    /// Cell open-circuit voltage (V).
    pub ocv_v: f64,
    /// Cell internal resistance (Ω).
    pub r_cell_ohm: f64,
    /// Equivalent cycles, accumulated as `Σ|ΔSOC|`.
    pub cycles: f64,
}

/// Result of one electro-thermal step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Temperature after the step (°C).
    pub temperature_c: f64,
    /// Terminal power delivered by the pack (W, positive = discharge).
    pub power_w: f64,
    /// SOC after the step.
    pub soc: f64,
    /// Internal heat generation rate (W).
    pub heat_generation_w: f64,
    /// Heat exchange rate with ambient air (W, positive = heating the pack).
    pub ambient_exchange_w: f64,
    /// Pack terminal voltage during the step (V).
    pub terminal_voltage_v: f64,
    /// SOC change over the step.
    pub delta_soc: f64,
}

/// Capability interface of a steppable electro-thermal battery.
pub trait ThermalBattery {
    /// Advances the battery by one step from the given temperature and SOC.
    fn step(&mut self, q_cool_j: f64, current_a: f64, temperature_c: f64, soc: f64)
    -> StepOutcome;

    /// Pack current needed to deliver `power_w` at the present OCV.
    fn current_for_power(&self, power_w: f64) -> f64;

    /// Limits valid for the next step.
    fn limits(&self) -> OperatingLimits;

    /// Current state.
    fn state(&self) -> &BatteryState;
}

/// Lumped electro-thermal battery pack.
///
/// Pack-level scaling (`n_series`, `n_parallel`) lives in the configuration,
/// so cell and pack variants share this one type.
#[derive(Debug, Clone)]
pub struct BatteryPack {
    config: BatteryPackConfig,
    state: BatteryState,
    limits: OperatingLimits,
    dt_s: f64,
}

impl BatteryPack {
    /// Creates a pack at the given temperature and SOC.
    ///
    /// # Panics
    ///
    /// Panics if the cell counts, capacity, resistance, heat capacity or `dt_s`
    /// are not positive, or if `soc` is outside `[0, 1]`.
    pub fn new(config: BatteryPackConfig, temperature_c: f64, soc: f64, dt_s: f64) -> Self {
        assert!(config.n_series > 0 && config.n_parallel > 0);
        assert!(config.ah_cell > 0.0 && config.soh > 0.0);
        assert!(config.r_cell_ohm > 0.0);
        assert!(config.heat_capacity_j_per_k() > 0.0);
        assert!(dt_s > 0.0);
        assert!((0.0..=1.0).contains(&soc));

        let cycles = config.initial_cycles;
        let ocv_v = config.ocv_v(soc, cycles);
        let state = BatteryState {
            temperature_c,
            soc,
            ocv_v,
            r_cell_ohm: config.r_cell_ohm,
            cycles,
        };
        let limits = Self::compute_limits(&config, &state, dt_s);
        Self {
            config,
            state,
            limits,
            dt_s,
        }
    }

    /// Parameters of this pack.
    pub fn config(&self) -> &BatteryPackConfig {
        &self.config
    }

    /// Step duration (s).
    pub fn dt_s(&self) -> f64 {
        self.dt_s
    }

    /// Re-anchors this instance on a measured temperature and SOC.
    ///
    /// Used by prediction copies: the SOC movement since the previous
    /// observation is accumulated into the cycle counter, then OCV and limits
    /// are recomputed. The instance this is called on is never the one
    /// holding simulation truth.
    pub fn observe(&mut self, temperature_c: f64, soc: f64) {
        self.state.cycles += (soc - self.state.soc).abs();
        self.state.temperature_c = temperature_c;
        self.state.soc = soc;
        self.state.ocv_v = self.config.ocv_v(soc, self.state.cycles);
        self.limits = Self::compute_limits(&self.config, &self.state, self.dt_s);
    }

    /// Pure transition from this pack's cycle count; leaves the state untouched.
    pub fn predict(
        &self,
        q_cool_j: f64,
        current_a: f64,
        temperature_c: f64,
        soc: f64,
    ) -> StepOutcome {
        self.config.transition(
            q_cool_j,
            current_a,
            temperature_c,
            soc,
            self.state.cycles,
            self.dt_s,
        )
    }

    /// Voltage cutoffs intersected with the SOC headroom of the next step.
    fn compute_limits(config: &BatteryPackConfig, state: &BatteryState, dt_s: f64) -> OperatingLimits {
        let soc_min = config.soc_min(state.temperature_c);
        let (v_min, v_max) = config.current_limits(state.ocv_v);
        let (h_min, h_max) = config.headroom_limits(state.soc, soc_min, dt_s);
        OperatingLimits {
            current_min_a: v_min.max(h_min).min(0.0),
            current_max_a: v_max.min(h_max).max(0.0),
            soc_min,
        }
    }
}

impl ThermalBattery for BatteryPack {
    fn step(
        &mut self,
        q_cool_j: f64,
        current_a: f64,
        temperature_c: f64,
        soc: f64,
    ) -> StepOutcome {
        let outcome = self.predict(q_cool_j, current_a, temperature_c, soc);

        self.state.temperature_c = outcome.temperature_c;
        self.state.soc = outcome.soc;
        self.state.cycles += outcome.delta_soc.abs();
        self.state.ocv_v = self.config.ocv_v(outcome.soc, self.state.cycles);
        self.limits = Self::compute_limits(&self.config, &self.state, self.dt_s);

        outcome
    }

    fn current_for_power(&self, power_w: f64) -> f64 {
        self.config.current_for_power_at(power_w, self.state.ocv_v)
    }

    fn limits(&self) -> OperatingLimits {
        self.limits
    }

    fn state(&self) -> &BatteryState {
        &self.state
    }
}
