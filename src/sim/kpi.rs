//! Post-hoc KPI computation from simulation results.

use std::fmt;

use super::types::StepResult;

/// Aggregate key performance indicators derived from a complete simulation run.
///
/// Computed post-hoc from `Vec<StepResult>` to ensure consistency between
/// step data and reported metrics. Temperature statistics use the measured
/// temperature the controller saw.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiReport {
    pub mean_temp_c: f64,
    pub max_temp_c: f64,
    pub min_temp_c: f64,
    /// Population standard deviation of the temperature (°C).
    pub std_temp_c: f64,
    /// Share of steps above the upper comfort temperature (%).
    pub time_above_high_pct: f64,
    /// Share of steps below the lower comfort temperature (%).
    pub time_below_low_pct: f64,
    /// Compressor energy over the run (kWh).
    pub compressor_energy_kwh: f64,
    pub final_soc: f64,
    pub mean_soc: f64,
    /// Health loss accumulated over the run (%).
    pub total_health_loss_pct: f64,
    /// Root-mean-square gap between delivered and demanded power (W).
    pub rmse_tracking_w: f64,
    /// Steps where the controller failed and the previous action was held.
    pub fallback_count: usize,
}

impl KpiReport {
    /// Computes all KPIs from the complete step record vector.
    ///
    /// # Arguments
    ///
    /// * `results` - Complete simulation step results
    /// * `dt_s` - Step duration in seconds
    /// * `temp_low_c` - Lower edge of the comfort band
    /// * `temp_high_c` - Upper edge of the comfort band
    pub fn from_results(results: &[StepResult], dt_s: f64, temp_low_c: f64, temp_high_c: f64) -> Self {
        let Some(last) = results.last() else {
            return Self {
                mean_temp_c: 0.0,
                max_temp_c: 0.0,
                min_temp_c: 0.0,
                std_temp_c: 0.0,
                time_above_high_pct: 0.0,
                time_below_low_pct: 0.0,
                compressor_energy_kwh: 0.0,
                final_soc: 0.0,
                mean_soc: 0.0,
                total_health_loss_pct: 0.0,
                rmse_tracking_w: 0.0,
                fallback_count: 0,
            };
        };

        let n = results.len() as f64;
        let mut temp_sum = 0.0;
        let mut max_temp = f64::NEG_INFINITY;
        let mut min_temp = f64::INFINITY;
        let mut above = 0_usize;
        let mut below = 0_usize;
        let mut comp_j = 0.0;
        let mut soc_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut fallbacks = 0_usize;

        for r in results {
            let t = r.temperature_c;
            temp_sum += t;
            max_temp = max_temp.max(t);
            min_temp = min_temp.min(t);
            if t > temp_high_c {
                above += 1;
            }
            if t < temp_low_c {
                below += 1;
            }
            comp_j += r.actuator_w * dt_s;
            soc_sum += r.soc;
            let err = r.power_w - r.demand_w;
            sq_sum += err * err;
            if r.fallback {
                fallbacks += 1;
            }
        }

        let mean_temp = temp_sum / n;
        let var = results
            .iter()
            .map(|r| (r.temperature_c - mean_temp).powi(2))
            .sum::<f64>()
            / n;

        Self {
            mean_temp_c: mean_temp,
            max_temp_c: max_temp,
            min_temp_c: min_temp,
            std_temp_c: var.sqrt(),
            time_above_high_pct: 100.0 * above as f64 / n,
            time_below_low_pct: 100.0 * below as f64 / n,
            compressor_energy_kwh: comp_j / 3.6e6,
            final_soc: last.soc,
            mean_soc: soc_sum / n,
            total_health_loss_pct: last.cumulative_health_loss_pct,
            rmse_tracking_w: (sq_sum / n).sqrt(),
            fallback_count: fallbacks,
        }
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(
            f,
            "Temperature:           mean {:.2} °C, min {:.2}, max {:.2}, std {:.3}",
            self.mean_temp_c, self.min_temp_c, self.max_temp_c, self.std_temp_c
        )?;
        writeln!(
            f,
            "Outside comfort band:  {:.1}% above, {:.1}% below",
            self.time_above_high_pct, self.time_below_low_pct
        )?;
        writeln!(f, "Compressor energy:     {:.3} kWh", self.compressor_energy_kwh)?;
        writeln!(
            f,
            "SOC:                   final {:.1}%, mean {:.1}%",
            self.final_soc * 100.0,
            self.mean_soc * 100.0
        )?;
        writeln!(f, "Health loss:           {:.5}%", self.total_health_loss_pct)?;
        writeln!(f, "RMSE tracking error:   {:.1} W", self.rmse_tracking_w)?;
        write!(f, "Fallback steps:        {}", self.fallback_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_result(temperature_c: f64, actuator_w: f64, power_w: f64, demand_w: f64) -> StepResult {
        StepResult {
            step: 0,
            time_s: 0.0,
            actuator_w,
            current_a: 0.0,
            temperature_c,
            true_temperature_c: temperature_c,
            soc: 0.5,
            health_loss_pct: 0.0,
            cumulative_health_loss_pct: 0.0,
            power_w,
            demand_w,
            coolant_temp_c: 20.0,
            fallback: false,
        }
    }

    #[test]
    fn temperature_statistics() {
        let results: Vec<StepResult> = [23.0, 25.0, 27.0, 25.0]
            .iter()
            .map(|&t| make_result(t, 0.0, 0.0, 0.0))
            .collect();
        let kpi = KpiReport::from_results(&results, 1.0, 24.0, 26.0);
        assert_relative_eq!(kpi.mean_temp_c, 25.0);
        assert_eq!(kpi.max_temp_c, 27.0);
        assert_eq!(kpi.min_temp_c, 23.0);
        assert_relative_eq!(kpi.std_temp_c, 2.0_f64.sqrt());
        assert_relative_eq!(kpi.time_above_high_pct, 25.0);
        assert_relative_eq!(kpi.time_below_low_pct, 25.0);
    }

    #[test]
    fn compressor_energy() {
        // 3000 W for 1200 s = 1 kWh
        let results = vec![make_result(25.0, 3000.0, 0.0, 0.0); 20];
        let kpi = KpiReport::from_results(&results, 60.0, 24.0, 26.0);
        assert_relative_eq!(kpi.compressor_energy_kwh, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn rmse_computation() {
        // errors: [100, -100, 200, -200], mean square 25000
        let results: Vec<StepResult> = [100.0, -100.0, 200.0, -200.0]
            .iter()
            .map(|&e| make_result(25.0, 0.0, 1000.0 + e, 1000.0))
            .collect();
        let kpi = KpiReport::from_results(&results, 1.0, 24.0, 26.0);
        assert_relative_eq!(kpi.rmse_tracking_w, 25_000.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn fallbacks_and_final_values() {
        let mut results = vec![make_result(25.0, 0.0, 0.0, 0.0); 5];
        results[1].fallback = true;
        results[3].fallback = true;
        results[4].soc = 0.4;
        results[4].cumulative_health_loss_pct = 0.003;
        let kpi = KpiReport::from_results(&results, 1.0, 24.0, 26.0);
        assert_eq!(kpi.fallback_count, 2);
        assert_eq!(kpi.final_soc, 0.4);
        assert_relative_eq!(kpi.mean_soc, 0.48);
        assert_eq!(kpi.total_health_loss_pct, 0.003);
    }

    #[test]
    fn empty_results() {
        let kpi = KpiReport::from_results(&[], 1.0, 24.0, 26.0);
        assert_eq!(kpi.rmse_tracking_w, 0.0);
        assert_eq!(kpi.fallback_count, 0);
    }
}
