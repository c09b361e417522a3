use nalgebra::{DMatrix, DVector};
use odr_solver::errors::FitError;
use odr_solver::model::{ModelStop, OdrModel};
use odr_solver::solver::{OdrProblem, OdrSolver, SolverParameters};

/// Exponential model that cancels the fit after a fixed number of
/// evaluations
struct CancellingModel {
    calls: usize,
    cancel_after: usize,
}

impl OdrModel for CancellingModel {
    fn len_beta(&self) -> usize {
        2
    }

    fn len_response(&self) -> usize {
        1
    }

    fn evaluate(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        self.calls += 1;
        if self.calls > self.cancel_after {
            return Err(ModelStop::Cancel);
        }
        for i in 0..xplusd.nrows() {
            out[(i, 0)] = beta[0] * (beta[1] * xplusd[(i, 0)]).exp();
        }
        Ok(())
    }
}

/// Model that refuses exactly one evaluation, forcing a retreat
///
/// Under forward differences with two estimated parameters and one
/// explanatory column, the call pattern is deterministic: one startup
/// evaluation, four for the function-precision estimate, three Jacobian
/// columns, then the first trial point as call nine.
struct RetreatingModel {
    calls: usize,
    refuse_at: usize,
    refusals: usize,
}

impl OdrModel for RetreatingModel {
    fn len_beta(&self) -> usize {
        2
    }

    fn len_response(&self) -> usize {
        1
    }

    fn evaluate(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        self.calls += 1;
        if self.calls == self.refuse_at {
            self.refusals += 1;
            return Err(ModelStop::Retreat);
        }
        for i in 0..xplusd.nrows() {
            out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
        }
        Ok(())
    }
}

/// A cancel request mid-iteration stops the fit with the cancel code and
/// keeps the last accepted iterate in the solver state.
#[test]
fn cancel_keeps_last_accepted_iterate() {
    let x_values: [f64; 8] = [0.0, 0.4, 0.8, 1.2, 1.6, 2.0, 2.4, 2.8];
    let x = DMatrix::from_fn(8, 1, |i, _| x_values[i]);
    let y = DMatrix::from_fn(8, 1, |i, _| 2.0 * (0.5 * x_values[i]).exp());

    let mut model = CancellingModel {
        calls: 0,
        cancel_after: 20,
    };
    let beta0 = DVector::from_vec(vec![0.3, 2.0]);
    let mut solver = OdrSolver::new(OdrProblem::new(x, y), SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();

    assert!(matches!(err, FitError::UserCancelled), "got {:?}", err);
    assert_eq!(err.info(), 51000);

    let state = solver.state().expect("state survives a cancel");
    assert!(state.niter >= 1, "some iterations were accepted");
    assert!(state.beta.iter().all(|v| v.is_finite()));
    // The committed residual norm reflects an accepted step, never the
    // poisoned trial.
    assert!(state.rnorm.is_finite());
}

/// A refused trial point shrinks the region; the fit recovers and still
/// converges.
#[test]
fn retreat_is_recoverable() {
    let x = DMatrix::from_vec(5, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let y = DMatrix::from_vec(5, 1, vec![1.5, 2.5, 3.5, 4.5, 5.5]);

    let mut model = RetreatingModel {
        calls: 0,
        refuse_at: 9,
        refusals: 0,
    };
    let beta0 = DVector::from_vec(vec![0.0, 0.5]);
    let mut solver = OdrSolver::new(OdrProblem::new(x, y), SolverParameters::default(), beta0);
    let report = solver.solve(&mut model).unwrap();

    assert_eq!(model.refusals, 1, "the first trial point was refused");
    assert!((report.beta[0] - 0.5).abs() < 1e-5, "beta = {}", report.beta);
    assert!((report.beta[1] - 1.0).abs() < 1e-5, "beta = {}", report.beta);
}
