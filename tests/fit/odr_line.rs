use crate::common;
use odr_solver::solver::{fit, OdrProblem, OdrSolver, SolverParameters};
use odr_solver::weights::Weights;

extern crate float_cmp;

/// Classic errors-in-variables case: a point set symmetric under swapping
/// the axes has the orthogonal fit `y = x` exactly, with non-zero deltas.
#[test]
fn symmetric_noise_gives_unit_slope() {
    let (x, y) = common::symmetric_line_data();
    let mut model = common::line_model();
    let beta0 = nalgebra::DVector::from_vec(vec![0.2, 1.3]);

    let report = fit(&mut model, x, y, beta0).unwrap();

    assert!(
        float_cmp::approx_eq!(f64, report.beta[1], 1.0, epsilon = 1e-4),
        "slope = {}",
        report.beta[1]
    );
    assert!(
        report.beta[0].abs() < 1e-4,
        "intercept = {}",
        report.beta[0]
    );
    assert!(
        report.delta.norm() > 1e-6,
        "orthogonal fit must move the x coordinates"
    );
}

/// Scaling both weight blocks by the same constant rescales the objective
/// without moving its minimiser.
#[test]
fn uniform_weight_scaling_leaves_the_fit_unchanged() {
    let (x, y) = common::symmetric_line_data();
    let beta0 = nalgebra::DVector::from_vec(vec![0.2, 1.3]);

    let mut model = common::line_model();
    let baseline = fit(&mut model, x.clone(), y.clone(), beta0.clone()).unwrap();

    let c2 = 25.0;
    let mut problem = OdrProblem::new(x, y);
    problem.set_response_weights(Weights::Scalar(c2));
    problem.set_delta_weights(Weights::Scalar(c2));
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    let mut model = common::line_model();
    let scaled = solver.solve(&mut model).unwrap();

    let sstol = SolverParameters::default().get_sstol();
    for k in 0..2 {
        assert!(
            (scaled.beta[k] - baseline.beta[k]).abs() <= sstol.sqrt(),
            "beta[{}]: {} vs {}",
            k,
            scaled.beta[k],
            baseline.beta[k]
        );
    }
    // The objective itself scales by c.
    assert!(
        float_cmp::approx_eq!(
            f64,
            scaled.rnorm,
            5.0 * baseline.rnorm,
            epsilon = 1e-6
        ),
        "rnorm {} vs {}",
        scaled.rnorm,
        baseline.rnorm
    );
}
