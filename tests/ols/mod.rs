use crate::common;
use odr_solver::jacobian::{
    self, FixPattern, JacobianMethod, JacobianRequest, JacobianScratch, Jacobians,
};
use odr_solver::model::OdrModel;
use odr_solver::solver::{OdrProblem, OdrSolver, RegressionMode, SolverParameters};
use odr_solver::weights::factor_response_weights;
use odr_solver::weights::Weights;

extern crate float_cmp;

/// With the least-squares flag the deltas stay identically zero and the
/// parameters match the closed-form linear regression.
#[test]
fn least_squares_matches_closed_form() {
    // Slightly noisy line so the closed form is non-trivial.
    let x_values = [1.0, 2.0, 3.0, 4.0, 5.0];
    let y_values = [3.1, 4.9, 7.05, 9.0, 10.95];
    let x = nalgebra::DMatrix::from_fn(5, 1, |i, _| x_values[i]);
    let y = nalgebra::DMatrix::from_fn(5, 1, |i, _| y_values[i]);

    // Closed-form ordinary least squares for the line.
    let xbar: f64 = x_values.iter().sum::<f64>() / 5.0;
    let ybar: f64 = y_values.iter().sum::<f64>() / 5.0;
    let sxy: f64 = x_values
        .iter()
        .zip(y_values.iter())
        .map(|(xv, yv)| (xv - xbar) * (yv - ybar))
        .sum();
    let sxx: f64 = x_values.iter().map(|xv| (xv - xbar) * (xv - xbar)).sum();
    let slope = sxy / sxx;
    let intercept = ybar - slope * xbar;

    let mut parameters = SolverParameters::from_job(2);
    assert_eq!(parameters.get_mode(), RegressionMode::OrdinaryLeastSquares);
    parameters.set_maxit(50);

    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.0, 1.0]);
    let mut solver = OdrSolver::new(OdrProblem::new(x, y), parameters, beta0);
    let report = solver.solve(&mut model).unwrap();

    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[0],
        intercept,
        epsilon = 1e-6
    ));
    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[1],
        slope,
        epsilon = 1e-6
    ));
    assert_eq!(report.delta.norm(), 0.0);
}

/// Fixed parameters keep their starting values bit for bit, and their
/// columns never enter the reduced problem.
#[test]
fn fix_mask_is_honoured() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.75, 0.5]);

    let mut problem = OdrProblem::new(x, y);
    problem.set_fixed_beta(vec![true, false]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let report = solver.solve(&mut model).unwrap();

    // The intercept is frozen exactly; the slope still moves.
    assert_eq!(report.beta[0], 0.75);
    assert!((report.beta[1] - 2.0).abs() < 0.2);
}

/// The engine refuses to produce least-squares Jacobians when the deltas
/// were tampered with (info 50300 at the solver level).
#[test]
fn non_zero_delta_under_least_squares_is_detected() {
    let mut model = common::line_model();
    let beta = nalgebra::DVector::from_vec(vec![1.0, 2.0]);
    let x = nalgebra::DMatrix::from_vec(3, 1, vec![1.0, 2.0, 3.0]);
    let mut fn_current = nalgebra::DMatrix::zeros(3, 1);
    model.evaluate(&beta, &x, &mut fn_current).unwrap();

    let delta = nalgebra::DMatrix::from_element(3, 1, 0.25);
    let free = [0usize, 1];
    let fixed = FixPattern::Free;
    let stpb = nalgebra::DVector::from_element(2, 1e-7);
    let stpd = nalgebra::DMatrix::from_element(3, 1, 1e-7);
    let typb = nalgebra::DVector::from_element(2, 1.0);
    let request = JacobianRequest {
        beta: &beta,
        xplusd: &x,
        fn_current: &fn_current,
        delta: &delta,
        free_beta: &free,
        fixed_x: &fixed,
        stpb: &stpb,
        stpd: &stpd,
        typb: &typb,
        with_delta: false,
    };

    let weights = factor_response_weights(&Weights::unit(), 3, 1).unwrap();
    let mut out = Jacobians::zeros(3, 1, 2, 1);
    let mut scratch = JacobianScratch::new(3, 1, 2, 1);
    let (mut nfev, mut njev) = (0, 0);
    let err = jacobian::evaluate(
        &mut model,
        JacobianMethod::ForwardDifference,
        &request,
        &weights,
        &mut out,
        &mut scratch,
        &mut nfev,
        &mut njev,
    )
    .unwrap_err();
    assert!(matches!(err, jacobian::EngineError::NonZeroDeltaUnderOls));
}
