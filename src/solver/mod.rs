//! Solver configuration and iteration machinery
//!
//! The solver is defined in the [`OdrSolver`] struct.
//!
//! To create a new solver, it is required to give the 3 following:
//! - The data through the [`OdrProblem`] struct
//! - The parameters through the [`SolverParameters`] struct
//! - The initial parameter guess
//!
//! # Features
//! 1. Fit log available for debugging, check the `activate_debug()` method
//! 2. Restart from the saved state, check the restart flag of the
//!    parameters
//!
//! ## Examples
//!
//! ```
//! use odr_solver::model::ModelFromFunc;
//! use odr_solver::solver::{OdrProblem, OdrSolver, SolverParameters};
//!
//! // Straight line y = β₀ + β₁ x through noiseless data.
//! let x = nalgebra::DMatrix::from_vec(5, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
//! let y = nalgebra::DMatrix::from_vec(5, 1, vec![3.0, 5.0, 7.0, 9.0, 11.0]);
//! let mut model = ModelFromFunc::new(2, 1, |beta, xplusd, out| {
//!     for i in 0..xplusd.nrows() {
//!         out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
//!     }
//! });
//!
//! let problem = OdrProblem::new(x, y);
//! let beta0 = nalgebra::DVector::from_vec(vec![0.5, 0.5]);
//! let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
//! let report = solver.solve(&mut model).unwrap();
//!
//! assert!((report.beta[0] - 1.0).abs() < 1e-6);
//! assert!((report.beta[1] - 2.0).abs() < 1e-6);
//! ```

mod driver;
mod log;
mod parameters;
mod problem;
mod state;
mod step;
mod trust_region;

pub use driver::{fit, FitReport, OdrSolver};
pub use parameters::{CovarianceMode, RegressionMode, SolverParameters};
pub use problem::OdrProblem;
pub use state::{SolverState, TrialBuffers};
pub use step::{CovarianceFactor, StepContext, StepResult, StepWorkspace};
pub use trust_region::{StepKind, TrustRegionStep};
