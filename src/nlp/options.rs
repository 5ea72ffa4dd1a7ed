use serde::Deserialize;

/// Tuning knobs of the interior-point solver.
///
/// Field names follow the usual interior-point vocabulary so a configuration
/// written for another solver of that family reads the same way.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverOptions {
    /// Iteration cap. Reaching it fails the solve with the last iterate attached.
    pub max_iter: usize,
    /// Scaled KKT error at which the solve is reported as converged.
    pub tol: f64,
    /// Looser KKT error accepted after `acceptable_iter` consecutive iterations.
    pub acceptable_tol: f64,
    /// Consecutive acceptable iterations required before stopping early.
    pub acceptable_iter: usize,
    /// Relative objective change below which an acceptable iterate may stop the solve.
    pub acceptable_obj_change_tol: f64,
    /// Initial barrier parameter.
    pub mu_init: f64,
    /// Absolute push of the starting point away from a bound, relative to `max(1, |bound|)`.
    pub bound_push: f64,
    /// Push of the starting point as a fraction of the bound interval (at most 0.5).
    pub bound_frac: f64,
    /// Relative relaxation applied to every finite bound before solving.
    pub bound_relax_factor: f64,
    /// Maximum number of step halvings in the line search.
    pub max_line_search: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 2000,
            tol: 1e-6,
            acceptable_tol: 1e-4,
            acceptable_iter: 10,
            acceptable_obj_change_tol: 1e-6,
            mu_init: 0.1,
            bound_push: 1e-2,
            bound_frac: 1e-2,
            bound_relax_factor: 1e-8,
            max_line_search: 40,
        }
    }
}

impl SolverOptions {
    /// Returns a description of every invalid field, empty when usable.
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.max_iter == 0 {
            out.push(("max_iter", "must be > 0".to_string()));
        }
        if self.tol <= 0.0 {
            out.push(("tol", "must be > 0".to_string()));
        }
        if self.acceptable_tol < self.tol {
            out.push(("acceptable_tol", "must be >= tol".to_string()));
        }
        if self.mu_init <= 0.0 {
            out.push(("mu_init", "must be > 0".to_string()));
        }
        if self.bound_push <= 0.0 {
            out.push(("bound_push", "must be > 0".to_string()));
        }
        if self.bound_frac <= 0.0 || self.bound_frac > 0.5 {
            out.push(("bound_frac", "must be in (0, 0.5]".to_string()));
        }
        if self.bound_relax_factor < 0.0 {
            out.push(("bound_relax_factor", "must be >= 0".to_string()));
        }
        if self.max_line_search == 0 {
            out.push(("max_line_search", "must be > 0".to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SolverOptions::default().problems().is_empty());
    }

    #[test]
    fn bound_frac_above_half_is_rejected() {
        let opts = SolverOptions {
            bound_frac: 0.7,
            ..SolverOptions::default()
        };
        let problems = opts.problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, "bound_frac");
    }

    #[test]
    fn parses_partial_toml() {
        let opts: SolverOptions = toml::from_str("max_iter = 50\ntol = 1e-5").unwrap_or_default();
        assert_eq!(opts.max_iter, 50);
        assert_eq!(opts.tol, 1e-5);
        assert_eq!(opts.mu_init, 0.1);
    }
}
