//! Nonlinear programming: problem interface and an interior-point solver.
//!
//! Problems have the form
//!
//! ```text
//! minimize    f(x)
//! subject to  c(x) = 0
//!             x_L <= x <= x_U
//! ```
//!
//! where infinite entries of `x_L`/`x_U` mark unbounded variables.

use nalgebra::{DMatrix, DVector};

/// Finite-difference derivatives used by the default trait methods.
pub mod fd;
/// Primal-dual interior-point method.
pub mod ipm;
pub mod options;

pub use ipm::InteriorPointSolver;
pub use options::SolverOptions;

/// A smooth equality- and bound-constrained problem.
pub trait NlpProblem {
    fn num_variables(&self) -> usize;

    fn num_constraints(&self) -> usize;

    /// Lower and upper variable bounds; `±∞` for none.
    fn bounds(&self) -> (DVector<f64>, DVector<f64>);

    fn objective(&self, x: &DVector<f64>) -> f64;

    /// Equality constraint residuals, length [`NlpProblem::num_constraints`].
    fn constraints(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Objective gradient. Defaults to central differences.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        fd::gradient(&|v: &DVector<f64>| self.objective(v), x)
    }

    /// Constraint Jacobian (`m × n`). Defaults to central differences.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        fd::jacobian(&|v: &DVector<f64>| self.constraints(v), x, self.num_constraints())
    }
}

/// How a successful solve terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// KKT error below `tol`.
    Converged,
    /// KKT error below `acceptable_tol` for `acceptable_iter` consecutive iterations.
    Acceptable,
}

/// Primal-dual solution of a successful solve.
#[derive(Debug, Clone)]
pub struct NlpSolution {
    pub x: DVector<f64>,
    /// Equality constraint multipliers.
    pub multipliers: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub status: SolveStatus,
}

/// Failure of a solve. Every variant carries the iterate the solver stopped at.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SolverError {
    #[error("iteration limit reached after {iterations} iterations")]
    MaxIterations {
        iterations: usize,
        last_iterate: DVector<f64>,
    },
    #[error("line search failed at iteration {iteration}")]
    LineSearch {
        iteration: usize,
        last_iterate: DVector<f64>,
    },
    #[error("KKT system singular at iteration {iteration}")]
    SingularKkt {
        iteration: usize,
        last_iterate: DVector<f64>,
    },
    #[error("non-finite problem evaluation at iteration {iteration}")]
    NonFinite {
        iteration: usize,
        last_iterate: DVector<f64>,
    },
    #[error("initial guess has {got} entries, problem has {expected} variables")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        last_iterate: DVector<f64>,
    },
}

impl SolverError {
    /// The iterate the solver stopped at, for warm-starting a retry.
    pub fn last_iterate(&self) -> &DVector<f64> {
        match self {
            SolverError::MaxIterations { last_iterate, .. }
            | SolverError::LineSearch { last_iterate, .. }
            | SolverError::SingularKkt { last_iterate, .. }
            | SolverError::NonFinite { last_iterate, .. }
            | SolverError::DimensionMismatch { last_iterate, .. } => last_iterate,
        }
    }
}

/// Anything that can solve an [`NlpProblem`] from a starting point.
pub trait NlpSolver {
    fn solve(
        &mut self,
        problem: &dyn NlpProblem,
        x0: &DVector<f64>,
    ) -> Result<NlpSolution, SolverError>;
}
