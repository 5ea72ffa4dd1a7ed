//! CSV export for simulation step results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::StepResult;

/// Column header shared by both controllers.
pub const HEADER: &str = "Time(s),Comp_Power(W),Temperature(℃),SOH_Loss(%),Current(A),SOC";

/// Exports simulation results to a CSV file at the given path.
///
/// Writes a header row followed by one data row per step. `Time(s)` is the
/// start of the step, `SOH_Loss(%)` the loss reported at that step (zero
/// between estimator calls) and `Temperature(℃)` the measured temperature.
/// Produces deterministic output for identical inputs.
///
/// # Arguments
///
/// * `results` - Complete simulation step results
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(results: &[StepResult], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(results, buf)
}

/// Writes simulation results as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(results: &[StepResult], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(','))?;

    for r in results {
        wtr.write_record(&[
            format!("{:.1}", r.time_s),
            format!("{:.3}", r.actuator_w),
            format!("{:.4}", r.temperature_c),
            format!("{:.8}", r.health_loss_pct),
            format!("{:.4}", r.current_a),
            format!("{:.6}", r.soc),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_step(t: usize) -> StepResult {
        StepResult {
            step: t,
            time_s: t as f64,
            actuator_w: 300.0 * t as f64,
            current_a: 1.25,
            temperature_c: 25.5,
            true_temperature_c: 25.4,
            soc: 0.2,
            health_loss_pct: if t % 5 == 4 { 2e-5 } else { 0.0 },
            cumulative_health_loss_pct: 2e-5 * ((t + 1) / 5) as f64,
            power_w: 500.0,
            demand_w: 500.0,
            coolant_temp_c: 22.0,
            fallback: false,
        }
    }

    #[test]
    fn header_matches_schema() {
        let results = vec![make_step(0)];
        let mut buf = Vec::new();
        write_csv(&results, &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let first_line = output.as_deref().unwrap_or("").lines().next().unwrap_or("");
        assert_eq!(
            first_line,
            "Time(s),Comp_Power(W),Temperature(℃),SOH_Loss(%),Current(A),SOC"
        );
    }

    #[test]
    fn row_count_matches_step_count() {
        let results: Vec<StepResult> = (0..24).map(make_step).collect();
        let mut buf = Vec::new();
        write_csv(&results, &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let lines: Vec<&str> = output.as_deref().unwrap_or("").lines().collect();
        // 1 header + 24 data rows
        assert_eq!(lines.len(), 25);
    }

    #[test]
    fn deterministic_output() {
        let results: Vec<StepResult> = (0..5).map(make_step).collect();
        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        write_csv(&results, &mut buf1).ok();
        write_csv(&results, &mut buf2).ok();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn health_column_is_per_step_loss() {
        let results: Vec<StepResult> = (0..10).map(make_step).collect();
        let mut buf = Vec::new();
        write_csv(&results, &mut buf).ok();

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let rows: Vec<(f64, f64)> = rdr
            .records()
            .filter_map(Result::ok)
            .map(|rec| {
                let time = rec.get(0).and_then(|v| v.parse().ok()).unwrap_or(f64::NAN);
                let loss = rec.get(3).and_then(|v| v.parse().ok()).unwrap_or(f64::NAN);
                (time, loss)
            })
            .collect();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].0, 0.0);
        assert_eq!(rows[9].0, 9.0);
        let reported: Vec<usize> = (0..10).filter(|&i| rows[i].1 > 0.0).collect();
        assert_eq!(reported, vec![4, 9]);
        assert!((rows[4].1 - 2e-5).abs() < 1e-12);
        assert!((rows[9].1 - 2e-5).abs() < 1e-12);
    }

    #[test]
    fn rows_parse_as_numbers() {
        let results: Vec<StepResult> = (0..3).map(make_step).collect();
        let mut buf = Vec::new();
        write_csv(&results, &mut buf).ok();

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let headers = rdr.headers().cloned().ok();
        assert_eq!(headers.as_ref().map(csv::StringRecord::len), Some(6));

        let mut row_count = 0;
        for record in rdr.records() {
            let rec = record.ok();
            assert!(rec.is_some(), "every row should parse");
            for field in rec.iter().flat_map(|r| r.iter()) {
                assert!(field.parse::<f64>().is_ok(), "{field} should parse as f64");
            }
            row_count += 1;
        }
        assert_eq!(row_count, 3);
    }
}
