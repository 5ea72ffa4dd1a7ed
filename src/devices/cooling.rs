use serde::Deserialize;

/// Evaporator-duty fit coefficients at one operating point.
///
/// `duty = λ1·P + λ2·P² + λ3·T_out + λ4·T_amb·ṁ_air + λ5·T_out·ṁ_clnt + λ6`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCoefficients {
    pub power: f64,
    pub power_sq: f64,
    pub outlet: f64,
    pub ambient_air: f64,
    pub outlet_coolant: f64,
    pub offset: f64,
}

impl DutyCoefficients {
    fn as_array(&self) -> [f64; 6] {
        [
            self.power,
            self.power_sq,
            self.outlet,
            self.ambient_air,
            self.outlet_coolant,
            self.offset,
        ]
    }

    fn from_array(v: [f64; 6]) -> Self {
        Self {
            power: v[0],
            power_sq: v[1],
            outlet: v[2],
            ambient_air: v[3],
            outlet_coolant: v[4],
            offset: v[5],
        }
    }
}

/// Immutable lookup of duty coefficients over coolant mass flow × ambient temperature.
///
/// Queries outside the grid are clamped to its edges.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    mass_flows: Vec<f64>,
    ambient_temps: Vec<f64>,
    /// Row-major: `entries[i * ambient_temps.len() + j]` for mass flow `i`, ambient `j`.
    entries: Vec<DutyCoefficients>,
}

impl CoefficientTable {
    /// Builds a table from its axes and row-major entries.
    ///
    /// # Panics
    ///
    /// Panics if an axis is empty or not strictly increasing, or if the entry
    /// count does not match the grid size.
    pub fn new(
        mass_flows: Vec<f64>,
        ambient_temps: Vec<f64>,
        entries: Vec<DutyCoefficients>,
    ) -> Self {
        assert!(!mass_flows.is_empty() && !ambient_temps.is_empty());
        assert!(mass_flows.windows(2).all(|w| w[0] < w[1]));
        assert!(ambient_temps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(entries.len(), mass_flows.len() * ambient_temps.len());
        Self {
            mass_flows,
            ambient_temps,
            entries,
        }
    }

    /// Bilinear interpolation at `(mass_flow, ambient_temp_c)`.
    pub fn lookup(&self, mass_flow: f64, ambient_temp_c: f64) -> DutyCoefficients {
        let (i0, i1, wi) = bracket(&self.mass_flows, mass_flow);
        let (j0, j1, wj) = bracket(&self.ambient_temps, ambient_temp_c);
        let cols = self.ambient_temps.len();
        let corner = |i: usize, j: usize| self.entries[i * cols + j].as_array();

        let (c00, c01, c10, c11) = (corner(i0, j0), corner(i0, j1), corner(i1, j0), corner(i1, j1));
        let mut out = [0.0; 6];
        for k in 0..6 {
            let low = c00[k] * (1.0 - wj) + c01[k] * wj;
            let high = c10[k] * (1.0 - wj) + c11[k] * wj;
            out[k] = low * (1.0 - wi) + high * wi;
        }
        DutyCoefficients::from_array(out)
    }
}

/// Returns the bracketing indices and the weight of the upper one, clamped to the axis.
fn bracket(axis: &[f64], x: f64) -> (usize, usize, f64) {
    let last = axis.len() - 1;
    if last == 0 || x <= axis[0] {
        return (0, 0, 0.0);
    }
    if x >= axis[last] {
        return (last, last, 0.0);
    }
    let hi = axis.partition_point(|&a| a <= x).min(last);
    let lo = hi - 1;
    let w = (x - axis[lo]) / (axis[hi] - axis[lo]);
    (lo, hi, w)
}

impl Default for CoefficientTable {
    fn default() -> Self {
        let at = |power: f64| DutyCoefficients {
            power,
            power_sq: -1.2e-4,
            outlet: 15.0,
            ambient_air: -150.0,
            outlet_coolant: 20.0,
            offset: -300.0,
        };
        Self::new(
            vec![0.10, 0.20],
            vec![20.0, 40.0],
            vec![at(2.45), at(2.05), at(2.55), at(2.15)],
        )
    }
}

/// Parameters of the liquid cooling loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoolingConfig {
    /// Coolant mass flow (kg/s).
    pub coolant_mass_flow_kg_s: f64,
    /// Condenser air mass flow (kg/s).
    pub air_mass_flow_kg_s: f64,
    /// Coolant specific heat (J/kg·K).
    pub coolant_specific_heat: f64,
    /// Pack-to-coolant heat transfer coefficient (W/m²·K).
    pub heat_transfer_coefficient: f64,
    /// Pack cooling surface (m²).
    pub surface_area_m2: f64,
    /// Compressor power at which the evaporator engages (W).
    pub activation_power_w: f64,
    /// Width of the logistic gate around the activation power (W).
    pub gate_width_w: f64,
    /// Coolant outlet temperature at start (°C).
    pub initial_coolant_temp_c: f64,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            coolant_mass_flow_kg_s: 0.144,
            air_mass_flow_kg_s: 0.10065,
            coolant_specific_heat: 3330.0,
            heat_transfer_coefficient: 300.0,
            surface_area_m2: 12.0,
            activation_power_w: 500.0,
            gate_width_w: 50.0,
            initial_coolant_temp_c: 20.0,
        }
    }
}

impl CoolingConfig {
    /// Coolant heat capacity flow `ṁ·c` (W/K).
    pub fn capacity_flow_w_per_k(&self) -> f64 {
        self.coolant_mass_flow_kg_s * self.coolant_specific_heat
    }
}

/// Heat extracted over one step and the resulting coolant outlet temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolingOutcome {
    /// Heat removed from the pack over the step (J).
    pub heat_j: f64,
    /// Coolant outlet temperature after the step (°C).
    pub coolant_out_c: f64,
}

/// Liquid cooling loop driven by a compressor power command.
///
/// The coolant outlet temperature is a first-order lag carried between calls,
/// so [`CoolingSystem::cooling_heat`] must be called in time order.
#[derive(Debug, Clone)]
pub struct CoolingSystem {
    config: CoolingConfig,
    coefficients: DutyCoefficients,
    ambient_temp_c: f64,
    coolant_out_c: f64,
    dt_s: f64,
}

impl CoolingSystem {
    /// Creates a cooling loop with coefficients interpolated from `table`.
    ///
    /// # Arguments
    ///
    /// * `config` - Loop parameters
    /// * `table` - Duty coefficient lookup, sampled once at the configured mass flow
    /// * `ambient_temp_c` - Ambient air temperature
    /// * `dt_s` - Step duration in seconds
    ///
    /// # Panics
    ///
    /// Panics if the coolant capacity flow, gate width or `dt_s` is not positive.
    pub fn new(
        config: CoolingConfig,
        table: &CoefficientTable,
        ambient_temp_c: f64,
        dt_s: f64,
    ) -> Self {
        assert!(config.capacity_flow_w_per_k() > 0.0);
        assert!(config.gate_width_w > 0.0);
        assert!(dt_s > 0.0);
        let coefficients = table.lookup(config.coolant_mass_flow_kg_s, ambient_temp_c);
        let coolant_out_c = config.initial_coolant_temp_c;
        Self {
            config,
            coefficients,
            ambient_temp_c,
            coolant_out_c,
            dt_s,
        }
    }

    /// Returns a copy starting from the given coolant outlet temperature.
    pub fn with_coolant_temperature(mut self, coolant_out_c: f64) -> Self {
        self.coolant_out_c = coolant_out_c;
        self
    }

    pub fn config(&self) -> &CoolingConfig {
        &self.config
    }

    /// Coolant outlet temperature carried from the previous call (°C).
    pub fn coolant_temperature_c(&self) -> f64 {
        self.coolant_out_c
    }

    /// Evaporator duty (W) for a compressor command at a coolant outlet temperature.
    pub fn evaporator_duty_w(&self, actuator_w: f64, coolant_out_c: f64) -> f64 {
        let c = &self.coefficients;
        let cfg = &self.config;
        let fit = c.power * actuator_w
            + c.power_sq * actuator_w * actuator_w
            + c.outlet * coolant_out_c
            + c.ambient_air * self.ambient_temp_c * cfg.air_mass_flow_kg_s
            + c.outlet_coolant * coolant_out_c * cfg.coolant_mass_flow_kg_s
            + c.offset;
        let z = (actuator_w - cfg.activation_power_w) / cfg.gate_width_w;
        fit / (1.0 + (-z).exp())
    }

    /// Pure form of the cooling law with the coolant temperature as explicit state.
    pub fn predict(&self, battery_temp_c: f64, actuator_w: f64, coolant_out_c: f64) -> CoolingOutcome {
        let mc = self.config.capacity_flow_w_per_k();
        let duty = self.evaporator_duty_w(actuator_w, coolant_out_c);
        let inlet = coolant_out_c - duty / mc;
        let decay = (-(self.config.heat_transfer_coefficient * self.config.surface_area_m2) / mc).exp();
        let outlet = (inlet - battery_temp_c) * decay + battery_temp_c;
        CoolingOutcome {
            heat_j: mc * (outlet - inlet) * self.dt_s,
            coolant_out_c: outlet,
        }
    }

    /// Heat removed from the pack over one step (J); advances the coolant state.
    pub fn cooling_heat(&mut self, battery_temp_c: f64, actuator_w: f64) -> f64 {
        let outcome = self.predict(battery_temp_c, actuator_w, self.coolant_out_c);
        self.coolant_out_c = outcome.coolant_out_c;
        outcome.heat_j
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn system() -> CoolingSystem {
        CoolingSystem::new(CoolingConfig::default(), &CoefficientTable::default(), 35.0, 1.0)
    }

    #[test]
    fn lookup_hits_grid_corners() {
        let table = CoefficientTable::default();
        assert_relative_eq!(table.lookup(0.10, 20.0).power, 2.45);
        assert_relative_eq!(table.lookup(0.20, 40.0).power, 2.15);
    }

    #[test]
    fn lookup_interpolates_bilinearly() {
        let table = CoefficientTable::default();
        let mid = table.lookup(0.15, 30.0).power;
        assert_relative_eq!(mid, (2.45 + 2.05 + 2.55 + 2.15) / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn lookup_clamps_outside_grid() {
        let table = CoefficientTable::default();
        assert_eq!(table.lookup(0.05, 0.0), table.lookup(0.10, 20.0));
        assert_eq!(table.lookup(1.0, 60.0), table.lookup(0.20, 40.0));
    }

    #[test]
    fn gate_suppresses_duty_below_activation() {
        let cs = system();
        assert!(cs.evaporator_duty_w(0.0, 25.0).abs() < 1.0);
        assert!(cs.evaporator_duty_w(3000.0, 25.0) > 1000.0);
    }

    #[test]
    fn more_power_removes_more_heat() {
        let cs = system();
        let low = cs.predict(30.0, 1000.0, 25.0).heat_j;
        let high = cs.predict(30.0, 3000.0, 25.0).heat_j;
        assert!(high > low);
        assert!(low > 0.0);
    }

    #[test]
    fn outlet_relaxes_toward_battery_temperature() {
        let cs = system();
        let out = cs.predict(30.0, 0.0, 20.0);
        assert!(out.coolant_out_c > 20.0 && out.coolant_out_c <= 30.0);
    }

    #[test]
    fn cooling_heat_matches_predict_and_advances_state() {
        let mut cs = system();
        let expected = cs.predict(28.0, 2000.0, cs.coolant_temperature_c());
        let q = cs.cooling_heat(28.0, 2000.0);
        assert_relative_eq!(q, expected.heat_j);
        assert_relative_eq!(cs.coolant_temperature_c(), expected.coolant_out_c);
    }

    #[test]
    fn with_coolant_temperature_overrides_state() {
        let cs = system().with_coolant_temperature(31.0);
        assert_eq!(cs.coolant_temperature_c(), 31.0);
    }

    #[test]
    fn heat_scales_with_step_length() {
        let one = system();
        let ten = CoolingSystem::new(CoolingConfig::default(), &CoefficientTable::default(), 35.0, 10.0);
        let a = one.predict(30.0, 2000.0, 25.0).heat_j;
        let b = ten.predict(30.0, 2000.0, 25.0).heat_j;
        assert_relative_eq!(b, 10.0 * a, max_relative = 1e-12);
    }
}
