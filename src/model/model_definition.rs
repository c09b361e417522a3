use std::error::Error;
use std::fmt;

use nalgebra::{DMatrix, DVector};

/// Stop request raised by the user model
///
/// The solver distinguishes two situations:
/// - [`ModelStop::Retreat`]: the requested point cannot be evaluated (out of
///   a validity domain, intermediate overflow, ...). During the iterations
///   the trial step is scored as catastrophically bad so the trust region
///   shrinks and the solver retries closer to the current iterate.
/// - [`ModelStop::Cancel`]: the model asks for the whole fit to stop. The
///   solver unwinds cleanly, keeping the last accepted iterate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModelStop {
    Retreat,
    Cancel,
}

impl fmt::Display for ModelStop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Retreat => write!(f, "model requested a retreat from the trial point"),
            Self::Cancel => write!(f, "model cancelled the fit"),
        }
    }
}

impl Error for ModelStop {}

/// The minimal contract a fitted function must satisfy
///
/// The model computes `f(beta, x + delta)` for all observations at once:
/// `xplusd` has one observation per row (`n x m`), the output has one
/// response per row (`n x nq`).
///
/// # Analytic Jacobians
///
/// When [`OdrModel::jacobian_provided`] returns `true`, the solver calls
/// [`OdrModel::jacobian_beta`] and [`OdrModel::jacobian_delta`] instead of
/// building finite differences. Both write into a stacked matrix of
/// `n * nq` rows where the derivative of response `l` at observation `i`
/// occupies row `i + n * l`:
/// - `jacobian_beta`: column `k` holds `∂f_l/∂β_k` (`n*nq x np`),
/// - `jacobian_delta`: column `j` holds `∂f_l/∂δ_j` (`n*nq x m`).
///
/// The default implementations fill zeros and are never called as long as
/// `jacobian_provided` keeps its default of `false`.
///
/// The solver guarantees that components of `beta` declared fixed keep
/// their initial values on every call; the model must not mutate its
/// inputs.
pub trait OdrModel {
    /// Number of parameters `np`
    fn len_beta(&self) -> usize;

    /// Dimension of the response `nq`
    fn len_response(&self) -> usize;

    /// Evaluate `f(beta, x + delta)` into `out` (`n x nq`)
    fn evaluate(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop>;

    /// Whether analytic Jacobians are implemented
    fn jacobian_provided(&self) -> bool {
        false
    }

    /// Write `∂f/∂β` into `out` (`n*nq x np`, row `i + n*l`)
    fn jacobian_beta(
        &mut self,
        #[allow(unused_variables)] beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        let _ = xplusd;
        out.fill(0.0);
        Ok(())
    }

    /// Write `∂f/∂δ` into `out` (`n*nq x m`, row `i + n*l`)
    fn jacobian_delta(
        &mut self,
        #[allow(unused_variables)] beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        let _ = xplusd;
        out.fill(0.0);
        Ok(())
    }
}
