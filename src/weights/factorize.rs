use nalgebra::{DMatrix, DVector};

use super::{WeightError, Weights};
use crate::linalg::{cholesky_upper, Definiteness};

#[derive(Debug)]
enum Factors {
    Shared(DMatrix<f64>),
    PerObservation(Vec<DMatrix<f64>>),
}

/// Factored observation-error weights
///
/// Holds `we1_i` with `we1_iᵀ we1_i = we_i` for every observation, plus the
/// count of observations whose weight is not identically zero. Only norms of
/// weighted quantities matter downstream, so the triangular Cholesky factor
/// serves as the square root.
#[derive(Debug)]
pub struct ResponseWeights {
    factors: Factors,
    zero: Vec<bool>,
    pub nnzw: usize,
    dim: usize,
}

impl ResponseWeights {
    /// The factor of observation `i`
    pub fn factor(&self, i: usize) -> &DMatrix<f64> {
        match &self.factors {
            Factors::Shared(f) => f,
            Factors::PerObservation(fs) => &fs[i],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether observation `i` carries an identically zero weight
    pub fn is_zero(&self, i: usize) -> bool {
        self.zero[i]
    }

    /// `out = we1_i * v`
    pub fn weigh(&self, i: usize, v: &DVector<f64>, out: &mut DVector<f64>) {
        let f = self.factor(i);
        for r in 0..self.dim {
            let mut acc = 0.0;
            for c in r..self.dim {
                acc += f[(r, c)] * v[c];
            }
            out[r] = acc;
        }
    }
}

fn sqrt_factor(
    w: &Weights,
    i: usize,
    dim: usize,
) -> Result<DMatrix<f64>, WeightError> {
    let mut m = DMatrix::zeros(dim, dim);
    w.write_observation(i, dim, 1.0, &mut m);
    match w {
        Weights::Scalar(_) | Weights::Diagonal(_) | Weights::DiagonalPerObservation(_) => {
            for j in 0..dim {
                let d = m[(j, j)];
                if d < 0.0 {
                    return Err(WeightError::NotSemidefinite { observation: i });
                }
                m[(j, j)] = d.sqrt();
            }
            Ok(m)
        }
        _ => {
            cholesky_upper(&mut m, Definiteness::PositiveSemi)
                .map_err(|_| WeightError::NotSemidefinite { observation: i })?;
            Ok(m)
        }
    }
}

/// Factor the observation-error weights into their square roots
///
/// Fails when any weight is negative or indefinite. The `nnzw < npp` check
/// belongs to the caller, which knows the number of estimated parameters.
pub fn factor_response_weights(
    we: &Weights,
    n: usize,
    nq: usize,
) -> Result<ResponseWeights, WeightError> {
    we.validate(n, nq)?;

    let mut zero = vec![false; n];
    for (i, flag) in zero.iter_mut().enumerate() {
        *flag = we.observation_is_zero(i, nq);
    }
    let nnzw = zero.iter().filter(|z| !**z).count();

    let factors = if we.is_shared() {
        Factors::Shared(sqrt_factor(we, 0, nq)?)
    } else {
        let mut fs = Vec::with_capacity(n);
        for i in 0..n {
            fs.push(sqrt_factor(we, i, nq)?);
        }
        Factors::PerObservation(fs)
    };

    Ok(ResponseWeights {
        factors,
        zero,
        nnzw,
        dim: nq,
    })
}

/// Validated delta weights with their penalty multiplier
///
/// Orthogonal distance problems require every `wd_i` strictly positive
/// definite; the implicit-model continuation scales the whole block by a
/// growing penalty without re-validating.
#[derive(Debug)]
pub struct DeltaWeights {
    spec: Weights,
    penalty: f64,
    dim: usize,
}

impl DeltaWeights {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn set_penalty(&mut self, penalty: f64) {
        self.penalty = penalty;
    }

    /// Materialize `penalty * wd_i` into `out`
    pub fn write_observation(&self, i: usize, out: &mut DMatrix<f64>) {
        self.spec.write_observation(i, self.dim, self.penalty, out);
    }

    /// `out = penalty * wd_i * v`
    pub fn multiply(&self, i: usize, v: &DVector<f64>, out: &mut DVector<f64>) {
        match &self.spec {
            Weights::Scalar(s) => {
                for j in 0..self.dim {
                    out[j] = self.penalty * s * v[j];
                }
            }
            Weights::Diagonal(d) => {
                for j in 0..self.dim {
                    out[j] = self.penalty * d[j] * v[j];
                }
            }
            Weights::DiagonalPerObservation(d) => {
                for j in 0..self.dim {
                    out[j] = self.penalty * d[(i, j)] * v[j];
                }
            }
            Weights::Matrix(w) => {
                for r in 0..self.dim {
                    let mut acc = 0.0;
                    for c in 0..self.dim {
                        acc += w[(r, c)] * v[c];
                    }
                    out[r] = self.penalty * acc;
                }
            }
            Weights::MatrixPerObservation(ws) => {
                let w = &ws[i];
                for r in 0..self.dim {
                    let mut acc = 0.0;
                    for c in 0..self.dim {
                        acc += w[(r, c)] * v[c];
                    }
                    out[r] = self.penalty * acc;
                }
            }
        }
    }

    /// `vᵀ (penalty * wd_i) v`, the delta contribution to the sum of squares
    pub fn quadratic(&self, i: usize, v: &DVector<f64>) -> f64 {
        let mut wv = DVector::zeros(self.dim);
        self.multiply(i, v, &mut wv);
        v.dot(&wv)
    }
}

/// Validate the delta weights for an orthogonal distance problem
///
/// Every observation's matrix must be strictly positive definite.
pub fn factor_delta_weights(
    wd: &Weights,
    n: usize,
    m: usize,
) -> Result<DeltaWeights, WeightError> {
    wd.validate(n, m)?;

    let check = |i: usize| -> Result<(), WeightError> {
        let mut w = DMatrix::zeros(m, m);
        wd.write_observation(i, m, 1.0, &mut w);
        cholesky_upper(&mut w, Definiteness::Positive)
            .map_err(|_| WeightError::NotPositiveDefinite { observation: i })
    };

    if wd.is_shared() {
        check(0)?;
    } else {
        for i in 0..n {
            check(i)?;
        }
    }

    Ok(DeltaWeights {
        spec: wd.clone(),
        penalty: 1.0,
        dim: m,
    })
}
