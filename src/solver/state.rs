use nalgebra::{DMatrix, DVector};

use super::step::StepWorkspace;
use crate::errors::Warning;
use crate::jacobian::{JacobianScratch, Jacobians};
use crate::weights::{DeltaWeights, ResponseWeights};

/// The owned workspace of one solve
///
/// Every logical array of the solver is a named field here; components
/// borrow what they need. The struct is created once per solve and survives
/// it, so a restart can continue from the saved iterate and a cancelled fit
/// leaves its last accepted state inspectable.
pub struct SolverState {
    // current iterate
    pub beta: DVector<f64>,
    pub delta: DMatrix<f64>,
    pub xplusd: DMatrix<f64>,
    /// Raw model values `f(β, x+δ)` (`n x nq`)
    pub fn_values: DMatrix<f64>,
    /// Weighted stacked residuals (`n*nq`)
    pub residuals: DVector<f64>,
    pub jac: Jacobians,
    /// `√S`, including the delta penalty term
    pub rnorm: f64,

    // trust region
    pub tau: f64,
    pub alpha: f64,

    // counters and diagnostics
    pub niter: usize,
    pub nfev: usize,
    pub njev: usize,
    pub irank: usize,
    pub rcond: f64,
    pub warnings: Vec<Warning>,
    /// Estimated parameters flagged out by the rank determination
    pub beta_fixed_by_pivot: Vec<bool>,
    pub msgb: Option<Vec<i8>>,
    pub msgd: Option<Vec<i8>>,

    // resolved configuration
    pub free_beta: Vec<usize>,
    pub sclb: DVector<f64>,
    pub scld: DMatrix<f64>,
    /// Scales of the estimated parameters, compacted to free order
    pub ssf: DVector<f64>,
    /// Typical magnitudes `1/sclb`
    pub typb: DVector<f64>,
    pub stpb: DVector<f64>,
    pub stpd: DMatrix<f64>,
    pub neta: usize,
    pub eta: f64,
    pub nnzw: usize,
    pub nrow: usize,

    // factored weights
    pub response_weights: ResponseWeights,
    pub delta_weights: Option<DeltaWeights>,

    // covariance preparation
    pub covariance: Option<super::step::CovarianceFactor>,

    // reusable buffers
    pub step_workspace: StepWorkspace,
    pub jacobian_scratch: JacobianScratch,
    pub trial: TrialBuffers,
    pub shadow: TrialBuffers,
}

/// One full trial iterate, also used as the shadow block that makes the
/// internal-doubling rollback safe
pub struct TrialBuffers {
    pub beta: DVector<f64>,
    pub delta: DMatrix<f64>,
    pub xplusd: DMatrix<f64>,
    pub fn_values: DMatrix<f64>,
    pub residuals: DVector<f64>,
    pub rnorm: f64,
}

impl TrialBuffers {
    pub fn new(n: usize, m: usize, np: usize, nq: usize) -> Self {
        TrialBuffers {
            beta: DVector::zeros(np),
            delta: DMatrix::zeros(n, m),
            xplusd: DMatrix::zeros(n, m),
            fn_values: DMatrix::zeros(n, nq),
            residuals: DVector::zeros(n * nq),
            rnorm: 0.0,
        }
    }

    pub fn copy_from(&mut self, other: &TrialBuffers) {
        self.beta.copy_from(&other.beta);
        self.delta.copy_from(&other.delta);
        self.xplusd.copy_from(&other.xplusd);
        self.fn_values.copy_from(&other.fn_values);
        self.residuals.copy_from(&other.residuals);
        self.rnorm = other.rnorm;
    }
}
