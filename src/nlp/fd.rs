//! Central finite-difference derivatives.

use nalgebra::{DMatrix, DVector};

/// Relative perturbation used for every partial derivative.
const RELATIVE_STEP: f64 = 6e-6;

/// Perturbation for a coordinate with value `xi`.
pub fn step_size(xi: f64) -> f64 {
    RELATIVE_STEP * xi.abs().max(1.0)
}

/// Gradient of a scalar function by central differences.
pub fn gradient(f: &dyn Fn(&DVector<f64>) -> f64, x: &DVector<f64>) -> DVector<f64> {
    let mut shifted = x.clone();
    let mut grad = DVector::zeros(x.len());
    for j in 0..x.len() {
        let h = step_size(x[j]);
        shifted[j] = x[j] + h;
        let forward = f(&shifted);
        shifted[j] = x[j] - h;
        let backward = f(&shifted);
        shifted[j] = x[j];
        grad[j] = (forward - backward) / (2.0 * h);
    }
    grad
}

/// Jacobian of a vector function with `m` outputs by central differences.
pub fn jacobian(
    c: &dyn Fn(&DVector<f64>) -> DVector<f64>,
    x: &DVector<f64>,
    m: usize,
) -> DMatrix<f64> {
    let mut shifted = x.clone();
    let mut jac = DMatrix::zeros(m, x.len());
    for j in 0..x.len() {
        let h = step_size(x[j]);
        shifted[j] = x[j] + h;
        let forward = c(&shifted);
        shifted[j] = x[j] - h;
        let backward = c(&shifted);
        shifted[j] = x[j];
        let column = (forward - backward) / (2.0 * h);
        jac.set_column(j, &column);
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gradient_of_quadratic() {
        let f = |x: &DVector<f64>| x[0] * x[0] + 3.0 * x[0] * x[1];
        let x = DVector::from_vec(vec![2.0, -1.0]);
        let g = gradient(&f, &x);
        assert_relative_eq!(g[0], 2.0 * 2.0 + 3.0 * -1.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], 6.0, epsilon = 1e-6);
    }

    #[test]
    fn jacobian_of_nonlinear_map() {
        let c = |x: &DVector<f64>| DVector::from_vec(vec![x[0].exp() - x[1], x[0] * x[1]]);
        let x = DVector::from_vec(vec![0.5, 2.0]);
        let jac = jacobian(&c, &x, 2);
        assert_relative_eq!(jac[(0, 0)], 0.5f64.exp(), epsilon = 1e-6);
        assert_relative_eq!(jac[(0, 1)], -1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 1)], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn step_grows_with_magnitude() {
        assert_eq!(step_size(0.0), step_size(1.0));
        assert!(step_size(1000.0) > step_size(1.0));
    }
}
