use nalgebra::{DMatrix, DVector};

/// Solve `R x = b` over the leading `k x k` block of the upper-triangular `R`
///
/// Equations with a zero diagonal entry set their unknown to zero instead of
/// failing; dependent columns detected by the rank loop end up with a zero
/// pivot and a zero step component, which is the behaviour the step solver
/// relies on.
pub fn solve_upper_k(r: &DMatrix<f64>, b: &DVector<f64>, k: usize) -> DVector<f64> {
    let mut x = DVector::zeros(k);
    for i in (0..k).rev() {
        let mut v = b[i];
        for j in (i + 1)..k {
            v -= r[(i, j)] * x[j];
        }
        x[i] = if r[(i, i)] == 0.0 { 0.0 } else { v / r[(i, i)] };
    }
    x
}

/// Solve `R x = b` with `R` upper triangular, zero-pivot policy as
/// [`solve_upper_k`]
pub fn solve_upper(r: &DMatrix<f64>, b: &DVector<f64>) -> DVector<f64> {
    solve_upper_k(r, b, r.nrows())
}

/// Solve `Rᵀ x = b` with `R` upper triangular (forward substitution)
pub fn solve_lower_from_upper_transpose(r: &DMatrix<f64>, b: &DVector<f64>) -> DVector<f64> {
    let n = r.nrows();
    let mut x = DVector::zeros(n);
    for i in 0..n {
        let mut v = b[i];
        for j in 0..i {
            v -= r[(j, i)] * x[j];
        }
        x[i] = if r[(i, i)] == 0.0 { 0.0 } else { v / r[(i, i)] };
    }
    x
}
