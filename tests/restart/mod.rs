use crate::common;
use odr_solver::errors::FitError;
use odr_solver::solver::{OdrProblem, OdrSolver, SolverParameters};

extern crate float_cmp;

/// Splitting the iteration budget across a restart reaches the same
/// solution as one uninterrupted run.
#[test]
fn restart_is_equivalent_to_one_run() {
    let (x, y) = common::exponential_data();
    let beta0 = nalgebra::DVector::from_vec(vec![0.2, 2.0]);

    // Uninterrupted reference run.
    let mut model = common::exponential_model();
    let mut reference_solver = OdrSolver::new(
        OdrProblem::new(x.clone(), y.clone()),
        SolverParameters::default(),
        beta0.clone(),
    );
    let reference = reference_solver.solve(&mut model).unwrap();

    // Interrupted run: a tiny budget first, then a restart.
    let mut model = common::exponential_model();
    let mut parameters = SolverParameters::default();
    parameters.set_maxit(2);
    let mut solver = OdrSolver::new(OdrProblem::new(x, y), parameters, beta0);
    let err = solver.solve(&mut model).unwrap_err();
    assert!(matches!(err, FitError::IterationLimit), "got {:?}", err);
    assert_eq!(err.info(), 4);
    let interrupted_niter = solver.state().unwrap().niter;
    assert_eq!(interrupted_niter, 2);

    let mut parameters = SolverParameters::default();
    parameters.set_restart(true);
    solver.set_parameters(parameters);
    let resumed = solver.solve(&mut model).unwrap();

    assert!(resumed.niter > interrupted_niter);
    let sstol = SolverParameters::default().get_sstol();
    for k in 0..2 {
        assert!(
            (resumed.beta[k] - reference.beta[k]).abs() <= sstol.sqrt(),
            "beta[{}]: {} vs {}",
            k,
            resumed.beta[k],
            reference.beta[k]
        );
    }
}
