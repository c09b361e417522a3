use crate::common;
use odr_solver::solver::{OdrProblem, OdrSolver, SolverParameters};

extern crate float_cmp;

/// A duplicated slope column makes the reduced Jacobian rank deficient by
/// one: the solver must flag it, pivot one of the two columns out, and
/// still fit the line.
#[test]
fn duplicated_column_is_detected_and_pivoted_out() {
    let (x, y) = common::exact_line_data();
    let mut model = common::duplicated_column_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5, 0.5]);

    let problem = OdrProblem::new(x, y);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let report = solver.solve(&mut model).unwrap();

    assert_eq!(report.irank, 1, "info = {}", report.info);
    // The rank warning occupies the tens digit.
    assert_eq!((report.info / 10) % 10, 1, "info = {}", report.info);
    // Exactly one of the two dependent slope parameters is frozen by the
    // pivoting.
    let frozen: Vec<usize> = (0..3).filter(|&k| report.beta_fixed_by_pivot[k]).collect();
    assert_eq!(frozen.len(), 1);
    assert!(frozen[0] == 1 || frozen[0] == 2);

    // The fitted line is still exact: β₁ + β₂ = 2 and β₀ = 1.
    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[1] + report.beta[2],
        2.0,
        epsilon = 1e-6
    ));
    assert!(float_cmp::approx_eq!(
        f64,
        report.beta[0],
        1.0,
        epsilon = 1e-6
    ));
    // The frozen component never moved from its starting value.
    assert_eq!(report.beta[frozen[0]], 0.5);
}
