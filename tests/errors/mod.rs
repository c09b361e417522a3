use crate::common;
use odr_solver::errors::FitError;
use odr_solver::solver::{OdrProblem, OdrSolver, SolverParameters};
use odr_solver::weights::Weights;

/// Negative observation-error weights are rejected with the 30010 code.
#[test]
fn negative_response_weights_are_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let mut problem = OdrProblem::new(x, y);
    problem.set_response_weights(Weights::Scalar(-1.0));

    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert_eq!(err.info(), 30010, "got {:?}", err);
}

/// Too many zero-weight observations leave fewer usable rows than
/// estimated parameters (30020).
#[test]
fn too_few_nonzero_weights_are_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let mut problem = OdrProblem::new(x, y);
    let mut table = nalgebra::DMatrix::zeros(5, 1);
    table[(0, 0)] = 1.0;
    problem.set_response_weights(Weights::DiagonalPerObservation(table));

    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert_eq!(err.info(), 30020, "got {:?}", err);
}

/// Delta weights must be strictly positive definite for orthogonal
/// distance problems (30030).
#[test]
fn semidefinite_delta_weights_are_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let mut problem = OdrProblem::new(x, y);
    problem.set_delta_weights(Weights::Scalar(0.0));

    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert_eq!(err.info(), 30030, "got {:?}", err);
}

/// A starting vector of the wrong length is a shape error (2xxxx).
#[test]
fn wrong_beta_length_is_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let problem = OdrProblem::new(x, y);

    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert!(matches!(err, FitError::InvalidShape { .. }), "got {:?}", err);
    assert_eq!(err.info(), 20001);
}

/// Fixing every parameter leaves nothing to estimate (1xxxx).
#[test]
fn all_parameters_fixed_is_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let mut problem = OdrProblem::new(x, y);
    problem.set_fixed_beta(vec![true, true]);

    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert!(
        matches!(err, FitError::InvalidDimensions { .. }),
        "got {:?}",
        err
    );
    assert_eq!(err.info(), 10010);
}

/// Non-positive user scales are caught before iterating (30040).
#[test]
fn non_positive_scales_are_rejected() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let problem = OdrProblem::new(x, y);

    let mut parameters = SolverParameters::default();
    parameters.set_scales(Some(nalgebra::DVector::from_vec(vec![1.0, 0.0])), None);
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
    let mut solver = OdrSolver::new(problem, parameters, beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert_eq!(err.info(), 30040, "got {:?}", err);
}
