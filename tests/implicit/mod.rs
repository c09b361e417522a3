use crate::common;
use odr_solver::errors::ConvergenceKind;
use odr_solver::jacobian::JacobianMethod;
use odr_solver::solver::{OdrProblem, OdrSolver, RegressionMode, SolverParameters};

extern crate float_cmp;

/// Circle fit: the implicit model `(x₁−β₀)² + (x₂−β₁)² − β₂² = 0` has no
/// responses at all; the penalty continuation must recover center and
/// radius and report parameter convergence.
#[test]
fn circle_fit_converges_through_the_continuation() {
    let x = common::circle_data();
    let mut model = common::circle_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 2.5, 2.0]);

    let parameters = SolverParameters::new(
        RegressionMode::Implicit,
        JacobianMethod::ForwardDifference,
    );
    let problem = OdrProblem::implicit(x);
    let mut solver = OdrSolver::new(problem, parameters, beta0);
    let report = solver.solve(&mut model).unwrap();

    assert_eq!(report.convergence, ConvergenceKind::Parameter);
    assert_eq!(report.info % 10, 2, "info = {}", report.info);

    assert!(
        float_cmp::approx_eq!(f64, report.beta[0], 1.0, epsilon = 0.05),
        "center x = {}",
        report.beta[0]
    );
    assert!(
        float_cmp::approx_eq!(f64, report.beta[1], 2.0, epsilon = 0.05),
        "center y = {}",
        report.beta[1]
    );
    assert!(
        float_cmp::approx_eq!(f64, report.beta[2].abs(), 3.0, epsilon = 0.05),
        "radius = {}",
        report.beta[2]
    );
    // On-circle data: the converged objective is essentially zero.
    assert!(report.rnorm < 1e-6, "rnorm = {}", report.rnorm);
}

/// The implicit mode decodes from the job integer and never reads `y`.
#[test]
fn job_digit_selects_the_implicit_mode() {
    let parameters = SolverParameters::from_job(1);
    assert_eq!(parameters.get_mode(), RegressionMode::Implicit);
}
