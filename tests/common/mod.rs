//! Shared model database for the integration tests
//!
//! All models follow the layout of the solver: `xplusd` has one observation
//! per row, responses fill an `n x nq` output, analytic Jacobians use the
//! stacked `n*nq x np` / `n*nq x m` layouts.

extern crate nalgebra;

use nalgebra::{DMatrix, DVector};
use odr_solver::model::ModelFromFunc;

/// `f(β, x) = β₀ + β₁ x`
pub fn line_model() -> ModelFromFunc<impl FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>)>
{
    ModelFromFunc::new(2, 1, |beta, xplusd, out| {
        for i in 0..xplusd.nrows() {
            out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
        }
    })
}

/// `f(β, x) = β₀ exp(β₁ x)`
pub fn exponential_model(
) -> ModelFromFunc<impl FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>)> {
    ModelFromFunc::new(2, 1, |beta, xplusd, out| {
        for i in 0..xplusd.nrows() {
            out[(i, 0)] = beta[0] * (beta[1] * xplusd[(i, 0)]).exp();
        }
    })
}

/// Line with a duplicated slope column, `f = β₀ + β₁ x + β₂ x`
pub fn duplicated_column_model(
) -> ModelFromFunc<impl FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>)> {
    ModelFromFunc::new(3, 1, |beta, xplusd, out| {
        for i in 0..xplusd.nrows() {
            out[(i, 0)] = beta[0] + (beta[1] + beta[2]) * xplusd[(i, 0)];
        }
    })
}

/// Implicit circle, `f(β, (x₁, x₂)) = (x₁−β₀)² + (x₂−β₁)² − β₂²`
pub fn circle_model() -> ModelFromFunc<impl FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>)>
{
    ModelFromFunc::new(3, 1, |beta, xplusd, out| {
        for i in 0..xplusd.nrows() {
            let dx = xplusd[(i, 0)] - beta[0];
            let dy = xplusd[(i, 1)] - beta[1];
            out[(i, 0)] = dx * dx + dy * dy - beta[2] * beta[2];
        }
    })
}

/// Exact straight-line data: `x = 1..5`, `y = 2x + 1`
pub fn exact_line_data() -> (DMatrix<f64>, DMatrix<f64>) {
    let x = DMatrix::from_vec(5, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let y = DMatrix::from_vec(5, 1, vec![3.0, 5.0, 7.0, 9.0, 11.0]);
    (x, y)
}

/// Point set symmetric under swapping the axes: the orthogonal fit is
/// exactly `y = x`
pub fn symmetric_line_data() -> (DMatrix<f64>, DMatrix<f64>) {
    let points = [
        (0.9, 1.1),
        (1.1, 0.9),
        (1.8, 2.2),
        (2.2, 1.8),
        (2.95, 3.05),
        (3.05, 2.95),
    ];
    let x = DMatrix::from_fn(points.len(), 1, |i, _| points[i].0);
    let y = DMatrix::from_fn(points.len(), 1, |i, _| points[i].1);
    (x, y)
}

/// Noisy exponential data around `β = (2, 0.5)`
pub fn exponential_data() -> (DMatrix<f64>, DMatrix<f64>) {
    let x_values: [f64; 8] = [0.0, 0.4, 0.8, 1.2, 1.6, 2.0, 2.4, 2.8];
    let noise = [0.01, -0.02, 0.015, 0.005, -0.01, 0.02, -0.005, 0.01];
    let x = DMatrix::from_fn(x_values.len(), 1, |i, _| x_values[i]);
    let y = DMatrix::from_fn(x_values.len(), 1, |i, _| {
        2.0 * (0.5 * x_values[i]).exp() + noise[i]
    });
    (x, y)
}

/// Points on the circle of center `(1, 2)` and radius `3`
pub fn circle_data() -> DMatrix<f64> {
    let angles: [f64; 8] = [0.1, 0.9, 1.7, 2.5, 3.3, 4.1, 4.9, 5.7];
    DMatrix::from_fn(angles.len(), 2, |i, j| {
        if j == 0 {
            1.0 + 3.0 * angles[i].cos()
        } else {
            2.0 + 3.0 * angles[i].sin()
        }
    })
}
