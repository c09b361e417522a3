use std::error::Error;
use std::fmt;

use nalgebra::DMatrix;

/// Definiteness requirement of a Cholesky factorization
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Definiteness {
    /// Every pivot must be strictly positive
    Positive,
    /// Zero pivots are accepted, the corresponding row of the factor is zeroed
    PositiveSemi,
}

/// Failure raised when the input matrix does not satisfy the requested
/// definiteness
#[derive(Debug, Clone, PartialEq)]
pub struct NotPositiveDefinite {
    /// Column at which the factorization broke down
    pub column: usize,
}

impl fmt::Display for NotPositiveDefinite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "matrix is not positive definite (breakdown at column {})",
            self.column
        )
    }
}

impl Error for NotPositiveDefinite {}

/// In-place Cholesky factorization of a symmetric matrix
///
/// On success the upper triangle of `a` holds the factor `R` with
/// `RᵀR = A`; the strict lower triangle is zeroed.
///
/// Under [`Definiteness::PositiveSemi`], a pivot that vanishes within the
/// round-off of the accumulated diagonal is treated as exactly zero: its row
/// of the factor is zeroed, which requires the remainder of that row to be
/// negligible as well, otherwise the matrix is indefinite and the
/// factorization fails.
pub fn cholesky_upper(
    a: &mut DMatrix<f64>,
    definiteness: Definiteness,
) -> Result<(), NotPositiveDefinite> {
    let n = a.nrows();
    if a.ncols() != n {
        panic!(
            "Dimension mismatch: cholesky of a {} x {} matrix",
            a.nrows(),
            a.ncols()
        );
    }

    let max_diag = (0..n).fold(0.0_f64, |acc, j| acc.max(a[(j, j)].abs()));
    let tol = (n as f64) * f64::EPSILON * max_diag;

    for j in 0..n {
        let mut d = a[(j, j)];
        for k in 0..j {
            d -= a[(k, j)] * a[(k, j)];
        }

        if d > tol {
            let r = d.sqrt();
            a[(j, j)] = r;
            for i in (j + 1)..n {
                let mut v = a[(j, i)];
                for k in 0..j {
                    v -= a[(k, j)] * a[(k, i)];
                }
                a[(j, i)] = v / r;
            }
        } else {
            if definiteness == Definiteness::Positive || d < -tol {
                return Err(NotPositiveDefinite { column: j });
            }
            // Semidefinite zero pivot: the rest of the row must vanish too.
            a[(j, j)] = 0.0;
            for i in (j + 1)..n {
                let mut v = a[(j, i)];
                for k in 0..j {
                    v -= a[(k, j)] * a[(k, i)];
                }
                if v.abs() > tol.max(f64::EPSILON * max_diag) * (n as f64) {
                    return Err(NotPositiveDefinite { column: j });
                }
                a[(j, i)] = 0.0;
            }
        }
    }

    for i in 1..n {
        for j in 0..i {
            a[(i, j)] = 0.0;
        }
    }

    Ok(())
}
