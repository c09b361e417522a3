use std::error::Error;
use std::fmt;

use nalgebra::{DMatrix, DVector};

/// Weight specification for one residual block
///
/// The broadcast variants avoid storing `n` copies of a shared weight:
/// a scalar applies to every component of every observation, a diagonal or
/// full matrix can be shared across observations or given per observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Weights {
    /// One non-negative factor for every component of every observation
    Scalar(f64),
    /// Shared diagonal, one entry per component
    Diagonal(DVector<f64>),
    /// Per-observation diagonals, row `i` holding the diagonal of observation `i`
    DiagonalPerObservation(DMatrix<f64>),
    /// One symmetric matrix shared by every observation
    Matrix(DMatrix<f64>),
    /// One symmetric matrix per observation
    MatrixPerObservation(Vec<DMatrix<f64>>),
}

/// Rejection reasons surfaced while validating or factoring weights
#[derive(Debug, Clone, PartialEq)]
pub enum WeightError {
    /// A negative entry or an indefinite matrix in `we` (info 30010)
    NotSemidefinite { observation: usize },
    /// Fewer observations with non-zero `we` than estimated parameters
    /// (info 30020)
    TooFewNonZero { nnzw: usize, npp: usize },
    /// A `wd` matrix that is not strictly positive definite (info 30030)
    NotPositiveDefinite { observation: usize },
    /// Broadcast shape inconsistent with `(n, dim)` (info 20002)
    ShapeMismatch { expected: (usize, usize), details: String },
}

impl fmt::Display for WeightError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotSemidefinite { observation } => write!(
                f,
                "observation-error weight of observation {} is not positive semidefinite",
                observation
            ),
            Self::TooFewNonZero { nnzw, npp } => write!(
                f,
                "only {} observations carry non-zero error weights, fewer than the {} estimated parameters",
                nnzw, npp
            ),
            Self::NotPositiveDefinite { observation } => write!(
                f,
                "delta weight of observation {} is not strictly positive definite",
                observation
            ),
            Self::ShapeMismatch { expected, details } => write!(
                f,
                "weight shape does not broadcast to {} observations of dimension {}: {}",
                expected.0, expected.1, details
            ),
        }
    }
}

impl Error for WeightError {}

impl Weights {
    /// Unit weights
    pub fn unit() -> Self {
        Weights::Scalar(1.0)
    }

    /// Check that the specification broadcasts to `n` observations of
    /// dimension `dim`
    pub fn validate(&self, n: usize, dim: usize) -> Result<(), WeightError> {
        let mismatch = |details: String| WeightError::ShapeMismatch {
            expected: (n, dim),
            details,
        };
        match self {
            Weights::Scalar(_) => Ok(()),
            Weights::Diagonal(d) => {
                if d.len() != dim {
                    return Err(mismatch(format!("diagonal of length {}", d.len())));
                }
                Ok(())
            }
            Weights::DiagonalPerObservation(d) => {
                if d.nrows() != n || d.ncols() != dim {
                    return Err(mismatch(format!("{} x {} diagonal table", d.nrows(), d.ncols())));
                }
                Ok(())
            }
            Weights::Matrix(w) => {
                if w.nrows() != dim || w.ncols() != dim {
                    return Err(mismatch(format!("{} x {} matrix", w.nrows(), w.ncols())));
                }
                Ok(())
            }
            Weights::MatrixPerObservation(ws) => {
                if ws.len() != n {
                    return Err(mismatch(format!("{} matrices", ws.len())));
                }
                for (i, w) in ws.iter().enumerate() {
                    if w.nrows() != dim || w.ncols() != dim {
                        return Err(mismatch(format!(
                            "matrix {} is {} x {}",
                            i,
                            w.nrows(),
                            w.ncols()
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Materialize the weight matrix of observation `i` into `out`
    /// (`dim x dim`), scaled by `factor`
    pub fn write_observation(&self, i: usize, dim: usize, factor: f64, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        match self {
            Weights::Scalar(v) => {
                for j in 0..dim {
                    out[(j, j)] = factor * v;
                }
            }
            Weights::Diagonal(d) => {
                for j in 0..dim {
                    out[(j, j)] = factor * d[j];
                }
            }
            Weights::DiagonalPerObservation(d) => {
                for j in 0..dim {
                    out[(j, j)] = factor * d[(i, j)];
                }
            }
            Weights::Matrix(w) => {
                for c in 0..dim {
                    for r in 0..dim {
                        out[(r, c)] = factor * w[(r, c)];
                    }
                }
            }
            Weights::MatrixPerObservation(ws) => {
                let w = &ws[i];
                for c in 0..dim {
                    for r in 0..dim {
                        out[(r, c)] = factor * w[(r, c)];
                    }
                }
            }
        }
    }

    /// Whether the weight of observation `i` is identically zero
    pub fn observation_is_zero(&self, i: usize, dim: usize) -> bool {
        match self {
            Weights::Scalar(v) => *v == 0.0,
            Weights::Diagonal(d) => d.iter().all(|&v| v == 0.0),
            Weights::DiagonalPerObservation(d) => (0..dim).all(|j| d[(i, j)] == 0.0),
            Weights::Matrix(w) => w.iter().all(|&v| v == 0.0),
            Weights::MatrixPerObservation(ws) => ws[i].iter().all(|&v| v == 0.0),
        }
    }

    /// Whether every observation shares the same weight matrix
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            Weights::Scalar(_) | Weights::Diagonal(_) | Weights::Matrix(_)
        )
    }
}
