//! Weighted Jacobian production
//!
//! At every outer iteration the solver needs the two stacked derivative
//! matrices at the current iterate, already multiplied by the square root of
//! the observation-error weights:
//! - `jacb` (`n*nq x npp`): `∂f_l/∂β_k` for the *estimated* parameters only,
//!   fixed components compacted out,
//! - `jacd` (`n*nq x m`): `∂f_l/∂δ_j`, zeroed where the fix mask pins a
//!   delta component.
//!
//! Row `i + n*l` carries observation `i`, response `l`. The derivatives come
//! either from the model's analytic Jacobians or from forward/central
//! finite differences.

mod accuracy;
mod check;
mod finite_difference;

pub use accuracy::estimate_function_precision;
pub use check::{check_derivatives, DerivativeCheck};

use nalgebra::{DMatrix, DVector};

use crate::model::{ModelStop, OdrModel};
use crate::weights::ResponseWeights;

/// How the Jacobians are obtained
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JacobianMethod {
    ForwardDifference,
    CentralDifference,
    Analytic,
    /// Analytic, verified against finite differences at initialization
    AnalyticChecked,
}

impl JacobianMethod {
    pub fn is_analytic(&self) -> bool {
        matches!(self, Self::Analytic | Self::AnalyticChecked)
    }
}

/// Which delta components are pinned to their input values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixPattern {
    /// Nothing fixed
    Free,
    /// One mask shared by every observation (`true` = fixed)
    SharedRow(Vec<bool>),
    /// One mask per observation
    PerObservation(Vec<Vec<bool>>),
}

impl FixPattern {
    pub fn is_fixed(&self, i: usize, j: usize) -> bool {
        match self {
            Self::Free => false,
            Self::SharedRow(row) => row[j],
            Self::PerObservation(rows) => rows[i][j],
        }
    }
}

/// The two weighted Jacobians of the current iterate
pub struct Jacobians {
    pub jacb: DMatrix<f64>,
    pub jacd: DMatrix<f64>,
}

impl Jacobians {
    pub fn zeros(n: usize, nq: usize, npp: usize, m: usize) -> Self {
        Jacobians {
            jacb: DMatrix::zeros(n * nq, npp),
            jacd: DMatrix::zeros(n * nq, m),
        }
    }
}

/// Scratch buffers reused by every Jacobian evaluation
pub struct JacobianScratch {
    pub f_plus: DMatrix<f64>,
    pub f_minus: DMatrix<f64>,
    pub beta_work: DVector<f64>,
    pub step_work: DVector<f64>,
    pub x_work: DMatrix<f64>,
    pub raw_b: DMatrix<f64>,
    pub raw_d: DMatrix<f64>,
    pub block: DMatrix<f64>,
}

impl JacobianScratch {
    pub fn new(n: usize, m: usize, np: usize, nq: usize) -> Self {
        JacobianScratch {
            f_plus: DMatrix::zeros(n, nq),
            f_minus: DMatrix::zeros(n, nq),
            beta_work: DVector::zeros(np),
            step_work: DVector::zeros(n),
            x_work: DMatrix::zeros(n, m),
            raw_b: DMatrix::zeros(n * nq, np),
            raw_d: DMatrix::zeros(n * nq, m),
            block: DMatrix::zeros(nq, np.max(m)),
        }
    }
}

/// Failures of the Jacobian engine
#[derive(Debug)]
pub enum EngineError {
    /// Propagated stop request from the model
    Stop(ModelStop),
    /// Ordinary least squares with a non-zero delta: the model most likely
    /// wrote into the delta derivatives it should have left alone
    NonZeroDeltaUnderOls,
}

impl From<ModelStop> for EngineError {
    fn from(stop: ModelStop) -> Self {
        EngineError::Stop(stop)
    }
}

/// Inputs shared by every Jacobian evaluation mode
pub struct JacobianRequest<'a> {
    pub beta: &'a DVector<f64>,
    pub xplusd: &'a DMatrix<f64>,
    /// Raw model values at the current iterate (forward differences)
    pub fn_current: &'a DMatrix<f64>,
    pub delta: &'a DMatrix<f64>,
    /// Indices of the estimated parameters, in order
    pub free_beta: &'a [usize],
    pub fixed_x: &'a FixPattern,
    /// Relative finite-difference steps, length `np`
    pub stpb: &'a DVector<f64>,
    /// Relative finite-difference steps, `n x m`
    pub stpd: &'a DMatrix<f64>,
    /// Typical magnitudes of the parameters (inverse scales)
    pub typb: &'a DVector<f64>,
    /// `false` for ordinary least squares: no delta derivatives at all
    pub with_delta: bool,
}

/// Evaluate both weighted Jacobians at the current iterate
pub fn evaluate<M: OdrModel>(
    model: &mut M,
    method: JacobianMethod,
    request: &JacobianRequest<'_>,
    weights: &ResponseWeights,
    out: &mut Jacobians,
    scratch: &mut JacobianScratch,
    nfev: &mut usize,
    njev: &mut usize,
) -> Result<(), EngineError> {
    let n = request.xplusd.nrows();
    let m = request.xplusd.ncols();
    let nq = weights.dim();
    let npp = request.free_beta.len();

    if !request.with_delta && request.delta.norm() != 0.0 {
        return Err(EngineError::NonZeroDeltaUnderOls);
    }

    if method.is_analytic() {
        model.jacobian_beta(request.beta, request.xplusd, &mut scratch.raw_b)?;
        *njev += 1;
        for (position, &k) in request.free_beta.iter().enumerate() {
            for r in 0..(n * nq) {
                out.jacb[(r, position)] = scratch.raw_b[(r, k)];
            }
        }
        if request.with_delta {
            model.jacobian_delta(request.beta, request.xplusd, &mut scratch.raw_d)?;
            out.jacd.copy_from(&scratch.raw_d);
        }
    } else {
        finite_difference::beta_columns(model, method, request, &mut out.jacb, scratch, nfev)?;
        if request.with_delta {
            finite_difference::delta_columns(model, method, request, &mut out.jacd, scratch, nfev)?;
        }
    }

    weigh_and_mask(request, weights, out, scratch, n, m, nq, npp);
    Ok(())
}

fn weigh_and_mask(
    request: &JacobianRequest<'_>,
    weights: &ResponseWeights,
    out: &mut Jacobians,
    scratch: &mut JacobianScratch,
    n: usize,
    m: usize,
    nq: usize,
    npp: usize,
) {
    for i in 0..n {
        // beta block
        for l in 0..nq {
            for c in 0..npp {
                scratch.block[(l, c)] = out.jacb[(i + n * l, c)];
            }
        }
        weigh_columns(weights, i, nq, npp, &mut scratch.block);
        for l in 0..nq {
            for c in 0..npp {
                out.jacb[(i + n * l, c)] = scratch.block[(l, c)];
            }
        }

        if !request.with_delta {
            continue;
        }

        // delta block, with the fix mask applied before weighting
        for l in 0..nq {
            for j in 0..m {
                scratch.block[(l, j)] = if request.fixed_x.is_fixed(i, j) {
                    0.0
                } else {
                    out.jacd[(i + n * l, j)]
                };
            }
        }
        weigh_columns(weights, i, nq, m, &mut scratch.block);
        for l in 0..nq {
            for j in 0..m {
                out.jacd[(i + n * l, j)] = scratch.block[(l, j)];
            }
        }
    }
}

fn weigh_columns(
    weights: &ResponseWeights,
    i: usize,
    nq: usize,
    ncols: usize,
    block: &mut DMatrix<f64>,
) {
    let f = weights.factor(i);
    for col in 0..ncols {
        for r in 0..nq {
            let mut acc = 0.0;
            for c in r..nq {
                acc += f[(r, c)] * block[(c, col)];
            }
            block[(r, col)] = acc;
        }
    }
}
