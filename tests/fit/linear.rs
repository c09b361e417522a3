use crate::common;
use odr_solver::solver::{fit, OdrProblem, OdrSolver, SolverParameters};

extern crate float_cmp;

/// Exact straight line: the fit must land on `β = (1, 2)` with zero
/// residual, zero deltas and a clean convergence code.
#[test]
fn exact_line_short_call() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);

    let report = fit(&mut model, x, y, beta0).unwrap();

    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[0],
        1.0,
        epsilon = 1e-7
    ));
    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[1],
        2.0,
        epsilon = 1e-7
    ));
    assert!(report.rnorm < 1e-7, "rnorm = {}", report.rnorm);
    assert!(report.delta.norm() < 1e-7);
    assert!(matches!(report.info % 10, 1..=3), "info = {}", report.info);
    assert_eq!(report.irank, 0);
    assert!(report.niter >= 1);
    assert!(report.nfev > report.niter);
}

/// The accepted iterates decrease the objective: the final norm is below
/// the starting one
#[test]
fn objective_decreases() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![-3.0, 8.0]);

    // Starting residual by hand: Σ (y − f(β₀, x))².
    let mut initial_sq = 0.0;
    for i in 0..5 {
        let f = -3.0 + 8.0 * x[(i, 0)];
        initial_sq += (y[(i, 0)] - f) * (y[(i, 0)] - f);
    }

    let report = fit(&mut model, x, y, beta0).unwrap();
    assert!(report.rnorm < initial_sq.sqrt());
}

/// From a converged state, one more solve leaves the parameters unchanged
/// within the parameter tolerance
#[test]
fn convergence_is_idempotent() {
    let (x, y) = common::exact_line_data();
    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);

    let problem = OdrProblem::new(x, y);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let first = solver.solve(&mut model).unwrap();

    let again = SolverParameters::default();
    let partol = again.get_partol();
    let (x, y) = common::exact_line_data();
    let mut solver = OdrSolver::new(OdrProblem::new(x, y), again, first.beta.clone());
    let second = solver.solve(&mut model).unwrap();

    for k in 0..2 {
        assert!(
            (second.beta[k] - first.beta[k]).abs() <= partol.max(1e-10),
            "beta[{}] drifted from {} to {}",
            k,
            first.beta[k],
            second.beta[k]
        );
    }
}
