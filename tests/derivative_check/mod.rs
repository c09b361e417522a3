use crate::common;
use odr_solver::errors::Warning;
use odr_solver::jacobian::JacobianMethod;
use odr_solver::model::ModelFromFuncAndJacobians;
use odr_solver::solver::{OdrProblem, OdrSolver, RegressionMode, SolverParameters};

/// Line model whose `∂f/∂β₁` is supplied with the wrong sign
fn line_with_wrong_slope_derivative() -> ModelFromFuncAndJacobians<
    impl FnMut(&nalgebra::DVector<f64>, &nalgebra::DMatrix<f64>, &mut nalgebra::DMatrix<f64>),
    impl FnMut(&nalgebra::DVector<f64>, &nalgebra::DMatrix<f64>, &mut nalgebra::DMatrix<f64>),
    impl FnMut(&nalgebra::DVector<f64>, &nalgebra::DMatrix<f64>, &mut nalgebra::DMatrix<f64>),
> {
    ModelFromFuncAndJacobians::new(
        2,
        1,
        |beta, xplusd, out| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
            }
        },
        |_beta, xplusd, out| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = 1.0;
                out[(i, 1)] = -xplusd[(i, 0)];
            }
        },
        |beta, xplusd, out| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = beta[1];
            }
        },
    )
}

/// The startup verification catches the wrong sign and flags `∂f/∂β` as
/// incorrect; the fit proceeds regardless of whether it manages to
/// converge with the bad derivatives.
#[test]
fn wrong_sign_raises_the_derivative_warning() {
    let (x, y) = common::exact_line_data();
    let mut model = line_with_wrong_slope_derivative();
    let beta0 = nalgebra::DVector::from_vec(vec![0.9, 1.9]);

    let mut parameters = SolverParameters::new(
        RegressionMode::Explicit,
        JacobianMethod::AnalyticChecked,
    );
    parameters.set_maxit(10);

    let problem = OdrProblem::new(x, y);
    let mut solver = OdrSolver::new(problem, parameters, beta0);
    let outcome = solver.solve(&mut model);

    let state = solver.state().expect("the check runs before iterating");
    assert!(
        state
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::JacobianBetaSuspect)),
        "warnings = {:?}",
        state.warnings
    );
    let msgb = state.msgb.as_ref().expect("msgb recorded");
    assert_eq!(msgb[1], 3, "msgb = {:?}", msgb);
    assert!(msgb[0] <= 1);

    // When the fit does converge, the warning must surface in info.
    if let Ok(report) = outcome {
        assert!(report.info >= 41000, "info = {}", report.info);
    }
}

/// Correct analytic Jacobians pass the verification silently and drive the
/// fit to the exact solution.
#[test]
fn correct_jacobians_pass_silently() {
    let (x, y) = common::exact_line_data();
    let mut model = ModelFromFuncAndJacobians::new(
        2,
        1,
        |beta: &nalgebra::DVector<f64>,
         xplusd: &nalgebra::DMatrix<f64>,
         out: &mut nalgebra::DMatrix<f64>| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
            }
        },
        |_beta, xplusd, out| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = 1.0;
                out[(i, 1)] = xplusd[(i, 0)];
            }
        },
        |beta, xplusd, out| {
            for i in 0..xplusd.nrows() {
                out[(i, 0)] = beta[1];
            }
        },
    );
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);

    let parameters = SolverParameters::new(
        RegressionMode::Explicit,
        JacobianMethod::AnalyticChecked,
    );
    let problem = OdrProblem::new(x, y);
    let mut solver = OdrSolver::new(problem, parameters, beta0);
    let report = solver.solve(&mut model).unwrap();

    assert!(report.info < 10, "info = {}", report.info);
    assert!((report.beta[0] - 1.0).abs() < 1e-7);
    assert!((report.beta[1] - 2.0).abs() < 1e-7);
    assert!(report.njev >= 1);
}
