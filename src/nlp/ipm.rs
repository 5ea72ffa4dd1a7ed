use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use super::{NlpProblem, NlpSolution, NlpSolver, SolveStatus, SolverError, SolverOptions};

/// Largest gradient entry tolerated before the objective or a constraint row is scaled down.
const MAX_GRADIENT: f64 = 100.0;
/// Multiplier magnitude above which the optimality error is scaled.
const MULTIPLIER_SCALE_MAX: f64 = 100.0;
/// Barrier is decreased once the barrier error drops below `KAPPA_EPSILON·μ`.
const KAPPA_EPSILON: f64 = 10.0;
const KAPPA_MU: f64 = 0.2;
const THETA_MU: f64 = 1.5;
const TAU_MIN: f64 = 0.99;
/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO_ETA: f64 = 1e-4;
/// Bound multipliers are kept within a factor of `KAPPA_SIGMA` of `μ/s`.
const KAPPA_SIGMA: f64 = 1e10;
const MAX_REGULARIZATIONS: usize = 10;
const PENALTY_MARGIN: f64 = 1e-4;

/// Primal-dual interior-point solver with a damped-BFGS Hessian.
///
/// Bounds enter through a logarithmic barrier; equality constraints through
/// the primal-dual KKT system, factored densely at every iteration. Steps
/// are globalized with a backtracking line search on an ℓ1 merit function.
/// Derivatives come from the problem, which defaults to finite differences.
#[derive(Debug, Clone, Default)]
pub struct InteriorPointSolver {
    options: SolverOptions,
}

impl InteriorPointSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }
}

/// The problem with objective and constraint rows scaled by constant factors.
struct Scaled<'a> {
    problem: &'a dyn NlpProblem,
    obj_scale: f64,
    con_scale: DVector<f64>,
}

impl Scaled<'_> {
    fn objective(&self, x: &DVector<f64>) -> f64 {
        self.obj_scale * self.problem.objective(x)
    }

    fn constraints(&self, x: &DVector<f64>) -> DVector<f64> {
        self.problem.constraints(x).component_mul(&self.con_scale)
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        self.problem.gradient(x) * self.obj_scale
    }

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut jac = self.problem.jacobian(x);
        scale_rows(&mut jac, &self.con_scale);
        jac
    }
}

fn scale_rows(jac: &mut DMatrix<f64>, factors: &DVector<f64>) {
    for (r, &factor) in factors.iter().enumerate() {
        let mut row = jac.row_mut(r);
        row *= factor;
    }
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

fn l1_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Largest `α ∈ (0, 1]` keeping `v + α·d >= (1 − τ)·v`.
fn fraction_to_boundary(values: &DVector<f64>, deltas: &DVector<f64>, tau: f64) -> f64 {
    values
        .iter()
        .zip(deltas.iter())
        .filter(|(_, d)| **d < 0.0)
        .fold(1.0, |alpha: f64, (v, d)| alpha.min(-tau * v / d))
}

/// Indices of finite bounds and the relaxed bound vectors.
struct BoundSet {
    lower: DVector<f64>,
    upper: DVector<f64>,
    lower_idx: Vec<usize>,
    upper_idx: Vec<usize>,
}

impl BoundSet {
    fn new(lower: DVector<f64>, upper: DVector<f64>, relax: f64) -> Self {
        let mut lower = lower;
        let mut upper = upper;
        let mut lower_idx = Vec::new();
        let mut upper_idx = Vec::new();
        for i in 0..lower.len() {
            if lower[i].is_finite() {
                lower[i] -= relax * lower[i].abs().max(1.0);
                lower_idx.push(i);
            }
            if upper[i].is_finite() {
                upper[i] += relax * upper[i].abs().max(1.0);
                upper_idx.push(i);
            }
        }
        Self {
            lower,
            upper,
            lower_idx,
            upper_idx,
        }
    }

    /// Moves `x` strictly inside the bounds.
    fn push_interior(&self, x: &mut DVector<f64>, push: f64, frac: f64) {
        for i in 0..x.len() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            let width = hi - lo;
            if lo.is_finite() {
                let p = if width.is_finite() {
                    (push * lo.abs().max(1.0)).min(frac * width)
                } else {
                    push * lo.abs().max(1.0)
                };
                x[i] = x[i].max(lo + p);
            }
            if hi.is_finite() {
                let p = if width.is_finite() {
                    (push * hi.abs().max(1.0)).min(frac * width)
                } else {
                    push * hi.abs().max(1.0)
                };
                x[i] = x[i].min(hi - p);
            }
        }
    }

    fn slacks(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let sl = DVector::from_iterator(
            self.lower_idx.len(),
            self.lower_idx.iter().map(|&i| x[i] - self.lower[i]),
        );
        let su = DVector::from_iterator(
            self.upper_idx.len(),
            self.upper_idx.iter().map(|&i| self.upper[i] - x[i]),
        );
        (sl, su)
    }

    fn slack_steps(&self, dx: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let dl = DVector::from_iterator(self.lower_idx.len(), self.lower_idx.iter().map(|&i| dx[i]));
        let du = DVector::from_iterator(self.upper_idx.len(), self.upper_idx.iter().map(|&i| -dx[i]));
        (dl, du)
    }

    /// `g − μ/s_L + μ/s_U`, the gradient of the barrier objective.
    fn barrier_gradient(
        &self,
        g: &DVector<f64>,
        sl: &DVector<f64>,
        su: &DVector<f64>,
        mu: f64,
    ) -> DVector<f64> {
        let mut out = g.clone();
        for (k, &i) in self.lower_idx.iter().enumerate() {
            out[i] -= mu / sl[k];
        }
        for (k, &i) in self.upper_idx.iter().enumerate() {
            out[i] += mu / su[k];
        }
        out
    }

    /// `−z_L + z_U` scattered into variable space.
    fn multiplier_term(&self, n: usize, zl: &DVector<f64>, zu: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(n);
        for (k, &i) in self.lower_idx.iter().enumerate() {
            out[i] -= zl[k];
        }
        for (k, &i) in self.upper_idx.iter().enumerate() {
            out[i] += zu[k];
        }
        out
    }

    /// `Σ = Z_L·S_L⁻¹ + Z_U·S_U⁻¹` as a diagonal.
    fn sigma(
        &self,
        n: usize,
        sl: &DVector<f64>,
        su: &DVector<f64>,
        zl: &DVector<f64>,
        zu: &DVector<f64>,
    ) -> DVector<f64> {
        let mut out = DVector::zeros(n);
        for (k, &i) in self.lower_idx.iter().enumerate() {
            out[i] += zl[k] / sl[k];
        }
        for (k, &i) in self.upper_idx.iter().enumerate() {
            out[i] += zu[k] / su[k];
        }
        out
    }
}

fn barrier_merit(f: f64, sl: &DVector<f64>, su: &DVector<f64>, c: &DVector<f64>, mu: f64, nu: f64) -> f64 {
    let log_sum: f64 = sl.iter().chain(su.iter()).map(|s| s.ln()).sum();
    f - mu * log_sum + nu * l1_norm(c)
}

/// Keeps each bound multiplier within `[μ/(κ·s), κ·μ/s]`.
fn safeguard_multipliers(z: &mut DVector<f64>, s: &DVector<f64>, mu: f64) {
    for (zk, sk) in z.iter_mut().zip(s.iter()) {
        let lo = mu / (KAPPA_SIGMA * sk);
        let hi = KAPPA_SIGMA * mu / sk;
        *zk = zk.clamp(lo, hi.max(lo));
    }
}

/// Powell-damped BFGS update of the Lagrangian Hessian approximation.
///
/// The first update after a reset rescales the identity by `yᵀy / sᵀy`.
fn damped_bfgs_update(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>, fresh: &mut bool) {
    if s.dot(s) < 1e-24 || !all_finite(y) {
        return;
    }
    if *fresh {
        let sy = s.dot(y);
        if sy > 0.0 {
            let scale = (y.dot(y) / sy).clamp(1e-6, 1e6);
            *b = DMatrix::identity(s.len(), s.len()) * scale;
        }
        *fresh = false;
    }
    let bs = &*b * s;
    let sbs = s.dot(&bs);
    if sbs <= 0.0 {
        return;
    }
    let sy = s.dot(y);
    let r = if sy >= 0.2 * sbs {
        y.clone()
    } else {
        let theta = 0.8 * sbs / (sbs - sy);
        y * theta + &bs * (1.0 - theta)
    };
    let sr = s.dot(&r);
    if sr <= 1e-16 {
        return;
    }
    *b += (&r * r.transpose()) / sr - (&bs * bs.transpose()) / sbs;
}

/// Scaled optimality measures at one iterate.
struct KktError {
    dual: f64,
    primal: f64,
    complementarity_scale: f64,
}

impl KktError {
    fn complementarity(&self, sl: &DVector<f64>, su: &DVector<f64>, zl: &DVector<f64>, zu: &DVector<f64>, mu: f64) -> f64 {
        let worst = sl
            .iter()
            .zip(zl.iter())
            .chain(su.iter().zip(zu.iter()))
            .fold(0.0, |acc: f64, (s, z)| acc.max((s * z - mu).abs()));
        worst / self.complementarity_scale
    }
}

impl NlpSolver for InteriorPointSolver {
    fn solve(
        &mut self,
        problem: &dyn NlpProblem,
        x0: &DVector<f64>,
    ) -> Result<NlpSolution, SolverError> {
        let opts = &self.options;
        let n = problem.num_variables();
        let m = problem.num_constraints();
        if x0.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                got: x0.len(),
                last_iterate: x0.clone(),
            });
        }

        let (lower, upper) = problem.bounds();
        let bounds = BoundSet::new(lower, upper, opts.bound_relax_factor);
        let mut x = x0.clone();
        bounds.push_interior(&mut x, opts.bound_push, opts.bound_frac);
        let (sl0, su0) = bounds.slacks(&x);
        if !all_finite(&x) || sl0.iter().chain(su0.iter()).any(|s| *s <= 0.0) {
            return Err(SolverError::NonFinite {
                iteration: 0,
                last_iterate: x,
            });
        }

        // Gradient-based scaling, fixed for the whole solve.
        let raw_g = problem.gradient(&x);
        let raw_jac = problem.jacobian(&x);
        let g_norm = inf_norm(&raw_g);
        let obj_scale = if g_norm > MAX_GRADIENT { MAX_GRADIENT / g_norm } else { 1.0 };
        let con_scale = DVector::from_iterator(
            m,
            (0..m).map(|r| {
                let row_norm = raw_jac.row(r).iter().fold(0.0, |a: f64, v| a.max(v.abs()));
                if row_norm > MAX_GRADIENT { MAX_GRADIENT / row_norm } else { 1.0 }
            }),
        );
        let scaled = Scaled {
            problem,
            obj_scale,
            con_scale,
        };

        let mut f = scaled.objective(&x);
        let mut c = scaled.constraints(&x);
        let mut g = raw_g * obj_scale;
        let mut jac = raw_jac;
        scale_rows(&mut jac, &scaled.con_scale);
        if !f.is_finite() || !all_finite(&c) || !all_finite(&g) {
            return Err(SolverError::NonFinite {
                iteration: 0,
                last_iterate: x,
            });
        }

        let n_l = bounds.lower_idx.len();
        let n_u = bounds.upper_idx.len();
        let mut lam = DVector::<f64>::zeros(m);
        let mut zl = DVector::<f64>::from_element(n_l, 1.0);
        let mut zu = DVector::<f64>::from_element(n_u, 1.0);
        let mut mu = opts.mu_init;
        let mut tau = TAU_MIN.max(1.0 - mu);
        let mut hessian = DMatrix::<f64>::identity(n, n);
        let mut hessian_fresh = true;
        let mut nu = 1.0;
        let mut acceptable_count = 0usize;
        let mut prev_f = f;

        for iteration in 0..opts.max_iter {
            let (sl, su) = bounds.slacks(&x);

            let n_mult = m + n_l + n_u;
            let dual_scale = if n_mult == 0 {
                1.0
            } else {
                let avg = (l1_norm(&lam) + l1_norm(&zl) + l1_norm(&zu)) / n_mult as f64;
                MULTIPLIER_SCALE_MAX.max(avg) / MULTIPLIER_SCALE_MAX
            };
            let complementarity_scale = if n_l + n_u == 0 {
                1.0
            } else {
                let avg = (l1_norm(&zl) + l1_norm(&zu)) / (n_l + n_u) as f64;
                MULTIPLIER_SCALE_MAX.max(avg) / MULTIPLIER_SCALE_MAX
            };
            let grad_lag = &g + jac.transpose() * &lam + bounds.multiplier_term(n, &zl, &zu);
            let err = KktError {
                dual: inf_norm(&grad_lag) / dual_scale,
                primal: inf_norm(&c),
                complementarity_scale,
            };
            let err_0 = err
                .dual
                .max(err.primal)
                .max(err.complementarity(&sl, &su, &zl, &zu, 0.0));
            trace!(iteration, f, mu, err_0, primal = err.primal, dual = err.dual, "ipm iterate");

            if err_0 <= opts.tol {
                debug!(iterations = iteration, objective = f / obj_scale, "ipm converged");
                return Ok(self.solution(x, &lam, f, &scaled, iteration, SolveStatus::Converged));
            }
            if err_0 <= opts.acceptable_tol {
                acceptable_count += 1;
            } else {
                acceptable_count = 0;
            }
            let obj_change = (f - prev_f).abs() / f.abs().max(1.0);
            if acceptable_count >= opts.acceptable_iter && obj_change <= opts.acceptable_obj_change_tol {
                debug!(iterations = iteration, objective = f / obj_scale, err_0, "ipm stopped at acceptable point");
                return Ok(self.solution(x, &lam, f, &scaled, iteration, SolveStatus::Acceptable));
            }

            // Monotone barrier update, possibly several times per iteration.
            let mu_floor = opts.tol / 10.0;
            while mu > mu_floor {
                let err_mu = err
                    .dual
                    .max(err.primal)
                    .max(err.complementarity(&sl, &su, &zl, &zu, mu));
                if err_mu > KAPPA_EPSILON * mu {
                    break;
                }
                mu = mu_floor.max((KAPPA_MU * mu).min(mu.powf(THETA_MU)));
                tau = TAU_MIN.max(1.0 - mu);
            }

            // Primal-dual KKT system with inertia-free regularization.
            let sigma = bounds.sigma(n, &sl, &su, &zl, &zu);
            let barrier_grad = bounds.barrier_gradient(&g, &sl, &su, mu);
            let mut rhs = DVector::<f64>::zeros(n + m);
            rhs.rows_mut(0, n).copy_from(&(-&barrier_grad));
            rhs.rows_mut(n, m).copy_from(&(-&c));

            let mut delta_w = 0.0;
            let mut delta_c = 0.0;
            let mut factored = None;
            for _ in 0..MAX_REGULARIZATIONS {
                let mut kkt = DMatrix::<f64>::zeros(n + m, n + m);
                kkt.view_mut((0, 0), (n, n)).copy_from(&hessian);
                for i in 0..n {
                    kkt[(i, i)] += sigma[i] + delta_w;
                }
                kkt.view_mut((0, n), (n, m)).copy_from(&jac.transpose());
                kkt.view_mut((n, 0), (m, n)).copy_from(&jac);
                for r in 0..m {
                    kkt[(n + r, n + r)] = -delta_c;
                }
                let lu = kkt.lu();
                match lu.solve(&rhs) {
                    Some(sol) if all_finite(&sol) => {
                        factored = Some((lu, sol));
                        break;
                    }
                    _ => {
                        delta_w = if delta_w == 0.0 { 1e-4 } else { delta_w * 8.0 };
                        delta_c = 1e-8 * mu.powf(0.25);
                    }
                }
            }
            let Some((lu, sol)) = factored else {
                return Err(SolverError::SingularKkt {
                    iteration,
                    last_iterate: x,
                });
            };
            let dx = sol.rows(0, n).into_owned();
            let lam_plus = sol.rows(n, m).into_owned();

            let (dsl, dsu) = bounds.slack_steps(&dx);
            let dzl = DVector::from_iterator(
                n_l,
                (0..n_l).map(|k| mu / sl[k] - zl[k] - zl[k] / sl[k] * dsl[k]),
            );
            let dzu = DVector::from_iterator(
                n_u,
                (0..n_u).map(|k| mu / su[k] - zu[k] - zu[k] / su[k] * dsu[k]),
            );
            let alpha_max = fraction_to_boundary(&sl, &dsl, tau).min(fraction_to_boundary(&su, &dsu, tau));
            let alpha_z = fraction_to_boundary(&zl, &dzl, tau).min(fraction_to_boundary(&zu, &dzu, tau));

            let required = inf_norm(&lam_plus) * 1.1 + PENALTY_MARGIN;
            if nu < required {
                nu = required;
            }
            let merit_0 = barrier_merit(f, &sl, &su, &c, mu, nu);
            let slope = barrier_grad.dot(&dx) - nu * l1_norm(&c);

            let mut accepted: Option<(DVector<f64>, f64, f64, DVector<f64>)> = None;
            let mut last_trial: Option<(DVector<f64>, f64, f64, DVector<f64>)> = None;
            let mut alpha = alpha_max;
            for ls in 0..opts.max_line_search {
                let x_trial = &x + &dx * alpha;
                let (sl_t, su_t) = bounds.slacks(&x_trial);
                let f_t = scaled.objective(&x_trial);
                let c_t = scaled.constraints(&x_trial);
                let valid = f_t.is_finite()
                    && all_finite(&c_t)
                    && sl_t.iter().chain(su_t.iter()).all(|s| *s > 0.0);
                if valid {
                    let merit_t = barrier_merit(f_t, &sl_t, &su_t, &c_t, mu, nu);
                    if merit_t <= merit_0 + ARMIJO_ETA * alpha * slope {
                        accepted = Some((x_trial, alpha, f_t, c_t));
                        break;
                    }
                    // Second-order correction on the first rejected trial.
                    if ls == 0 && m > 0 {
                        let mut rhs_soc = DVector::<f64>::zeros(n + m);
                        rhs_soc.rows_mut(n, m).copy_from(&(-&c_t));
                        if let Some(corr) = lu.solve(&rhs_soc).filter(all_finite) {
                            let step = &dx * alpha + corr.rows(0, n);
                            let (dsl_c, dsu_c) = bounds.slack_steps(&step);
                            let shrink = fraction_to_boundary(&sl, &dsl_c, tau)
                                .min(fraction_to_boundary(&su, &dsu_c, tau));
                            let x_soc = &x + step * shrink;
                            let (sl_c, su_c) = bounds.slacks(&x_soc);
                            let f_c = scaled.objective(&x_soc);
                            let c_c = scaled.constraints(&x_soc);
                            if f_c.is_finite() && all_finite(&c_c) && sl_c.iter().chain(su_c.iter()).all(|s| *s > 0.0) {
                                let merit_c = barrier_merit(f_c, &sl_c, &su_c, &c_c, mu, nu);
                                if merit_c <= merit_0 + ARMIJO_ETA * alpha * slope {
                                    accepted = Some((x_soc, alpha, f_c, c_c));
                                    break;
                                }
                            }
                        }
                    }
                    last_trial = (merit_t < merit_0).then_some((x_trial, alpha, f_t, c_t));
                } else {
                    last_trial = None;
                }
                alpha *= 0.5;
            }
            // Tiny steps that still lower the merit are taken.
            let accepted = accepted.or(last_trial);

            let Some((x_new, alpha, f_new, c_new)) = accepted else {
                if !hessian_fresh {
                    debug!(iteration, "ipm line search failed, resetting Hessian approximation");
                    hessian = DMatrix::identity(n, n);
                    hessian_fresh = true;
                    continue;
                }
                return Err(SolverError::LineSearch {
                    iteration,
                    last_iterate: x,
                });
            };

            let lam_step = (&lam_plus - &lam) * alpha;
            lam += lam_step;
            zl += &dzl * alpha_z;
            zu += &dzu * alpha_z;
            let (sl_new, su_new) = bounds.slacks(&x_new);
            safeguard_multipliers(&mut zl, &sl_new, mu);
            safeguard_multipliers(&mut zu, &su_new, mu);

            let g_new = scaled.gradient(&x_new);
            let jac_new = scaled.jacobian(&x_new);
            if !all_finite(&g_new) || jac_new.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::NonFinite {
                    iteration,
                    last_iterate: x_new,
                });
            }

            let s = &x_new - &x;
            let y = (&g_new + jac_new.transpose() * &lam) - (&g + jac.transpose() * &lam);
            damped_bfgs_update(&mut hessian, &s, &y, &mut hessian_fresh);

            prev_f = f;
            x = x_new;
            f = f_new;
            c = c_new;
            g = g_new;
            jac = jac_new;
        }

        debug!(max_iter = opts.max_iter, "ipm hit iteration limit");
        Err(SolverError::MaxIterations {
            iterations: opts.max_iter,
            last_iterate: x,
        })
    }
}

impl InteriorPointSolver {
    fn solution(
        &self,
        x: DVector<f64>,
        lam: &DVector<f64>,
        f: f64,
        scaled: &Scaled<'_>,
        iterations: usize,
        status: SolveStatus,
    ) -> NlpSolution {
        let multipliers = lam.component_mul(&scaled.con_scale) / scaled.obj_scale;
        NlpSolution {
            x,
            multipliers,
            objective: f / scaled.obj_scale,
            iterations,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `min (x − 3)² + (y + 1)²` with `0 ≤ x ≤ 2`.
    struct BoxedQuadratic;

    impl NlpProblem for BoxedQuadratic {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            0
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (
                DVector::from_vec(vec![0.0, f64::NEG_INFINITY]),
                DVector::from_vec(vec![2.0, f64::INFINITY]),
            )
        }
        fn objective(&self, x: &DVector<f64>) -> f64 {
            (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2)
        }
        fn constraints(&self, _x: &DVector<f64>) -> DVector<f64> {
            DVector::zeros(0)
        }
    }

    /// `min x² + y²` subject to `x + y = 1`.
    struct LinearEquality;

    impl NlpProblem for LinearEquality {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (
                DVector::from_element(2, f64::NEG_INFINITY),
                DVector::from_element(2, f64::INFINITY),
            )
        }
        fn objective(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0] + x[1] * x[1]
        }
        fn constraints(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![x[0] + x[1] - 1.0])
        }
    }

    /// `min x² + y²` subject to `x·y = 1`, `x, y ≥ 0`.
    struct Hyperbola;

    impl NlpProblem for Hyperbola {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (DVector::zeros(2), DVector::from_element(2, f64::INFINITY))
        }
        fn objective(&self, x: &DVector<f64>) -> f64 {
            x[0] * x[0] + x[1] * x[1]
        }
        fn constraints(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![x[0] * x[1] - 1.0])
        }
    }

    #[test]
    fn active_upper_bound_is_found() {
        let mut solver = InteriorPointSolver::default();
        let sol = solver
            .solve(&BoxedQuadratic, &DVector::from_vec(vec![1.0, 0.0]))
            .ok();
        assert!(sol.is_some());
        if let Some(sol) = sol {
            assert_relative_eq!(sol.x[0], 2.0, epsilon = 1e-4);
            assert_relative_eq!(sol.x[1], -1.0, epsilon = 1e-4);
            assert_relative_eq!(sol.objective, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn linear_equality_solution_and_multiplier() {
        let mut solver = InteriorPointSolver::default();
        let sol = solver
            .solve(&LinearEquality, &DVector::from_vec(vec![3.0, -2.0]))
            .ok();
        assert!(sol.is_some());
        if let Some(sol) = sol {
            assert_relative_eq!(sol.x[0], 0.5, epsilon = 1e-4);
            assert_relative_eq!(sol.x[1], 0.5, epsilon = 1e-4);
            // ∇f + λ∇c = 0 at the optimum.
            assert_relative_eq!(sol.multipliers[0], -1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn nonlinear_equality_with_bounds() {
        let mut solver = InteriorPointSolver::default();
        let sol = solver
            .solve(&Hyperbola, &DVector::from_vec(vec![2.0, 0.5]))
            .ok();
        assert!(sol.is_some());
        if let Some(sol) = sol {
            assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-3);
            assert_relative_eq!(sol.x[1], 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn iteration_cap_reports_last_iterate() {
        let mut solver = InteriorPointSolver::new(SolverOptions {
            max_iter: 1,
            ..SolverOptions::default()
        });
        match solver.solve(&Hyperbola, &DVector::from_vec(vec![3.0, 3.0])) {
            Err(err @ SolverError::MaxIterations { .. }) => {
                assert_eq!(err.last_iterate().len(), 2);
            }
            other => panic!("expected iteration limit, got {other:?}"),
        }
    }

    #[test]
    fn wrong_initial_guess_length_is_rejected() {
        let mut solver = InteriorPointSolver::default();
        let result = solver.solve(&LinearEquality, &DVector::zeros(3));
        assert!(matches!(
            result,
            Err(SolverError::DimensionMismatch { expected: 2, got: 3, .. })
        ));
    }

    #[test]
    fn start_outside_bounds_is_pushed_inside() {
        let bounds = BoundSet::new(
            DVector::from_vec(vec![0.0, -1.0]),
            DVector::from_vec(vec![1.0, f64::INFINITY]),
            0.0,
        );
        let mut x = DVector::from_vec(vec![5.0, -10.0]);
        bounds.push_interior(&mut x, 1e-2, 1e-2);
        assert!(x[0] < 1.0 && x[0] > 0.0);
        assert!(x[1] > -1.0);
    }

    #[test]
    fn fraction_to_boundary_limits_step() {
        let v = DVector::from_vec(vec![1.0, 2.0]);
        let d = DVector::from_vec(vec![-2.0, 1.0]);
        assert_relative_eq!(fraction_to_boundary(&v, &d, 0.99), 0.495);
    }

    #[test]
    fn damped_update_keeps_hessian_positive_definite() {
        let mut b = DMatrix::identity(2, 2);
        let mut fresh = true;
        // Negative curvature pair: damping must keep B positive definite.
        let s = DVector::from_vec(vec![1.0, 0.0]);
        let y = DVector::from_vec(vec![-1.0, 0.0]);
        damped_bfgs_update(&mut b, &s, &y, &mut fresh);
        assert!(b.clone().cholesky().is_some());
    }
}
