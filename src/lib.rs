//! Weighted orthogonal distance regression
//! ========================================================
//!
//! This crate fits a model `f(β, x + δ)` to observations `(x, y)` while
//! accounting for errors in *both* variables: it minimises
//!
//! ```text
//! S(β, δ) = Σ ‖we_i^(1/2) (y_i − f(β, x_i + δ_i))‖² + Σ δ_iᵀ wd_i δ_i
//! ```
//!
//! over the parameters `β` and the per-observation corrections `δ`
//! (orthogonal distance regression). Ordinary nonlinear least squares is
//! the special case `δ ≡ 0`, and an implicit mode drives `f(β, x+δ)` to
//! zero under a penalty continuation.
//!
//! The minimisation runs a trust-region Levenberg-Marquardt iteration on
//! the joint `(β, δ)` variable, exploiting the block structure of the
//! extended Jacobian: the deltas are eliminated observation by observation,
//! so the factored system never grows beyond the number of estimated
//! parameters.
//!
//! # Key features
//! 1. Works whether the Jacobians are provided or not (evaluating them with
//!    forward or central finite differences, with automatic step sizing
//!    from a measured function accuracy).
//! 2. Analytic Jacobians can be verified against finite differences at
//!    startup, with per-component diagnoses.
//! 3. Broadcastable weights (scalar, diagonal or full matrix, shared or
//!    per observation), parameter fixing, per-component delta pinning and
//!    automatic scaling.
//! 4. Rank-deficient Jacobians are handled by an updating pivoted QR.
//! 5. Debugging informations available through a .txt log file.
//! 6. Restart: a finished or stopped fit can resume from its saved state.
//!
//! # Examples
//!
//! ```
//! use odr_solver::model::ModelFromFunc;
//! use odr_solver::solver::fit;
//!
//! // Fit y = β₀ + β₁ x, with errors possible in x as well as y.
//! let x = nalgebra::DMatrix::from_vec(4, 1, vec![0.0, 1.0, 2.0, 3.0]);
//! let y = nalgebra::DMatrix::from_vec(4, 1, vec![0.1, 0.9, 2.1, 2.9]);
//! let mut model = ModelFromFunc::new(2, 1, |beta, xplusd, out| {
//!     for i in 0..xplusd.nrows() {
//!         out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
//!     }
//! });
//!
//! let beta0 = nalgebra::DVector::from_vec(vec![0.0, 1.0]);
//! let report = fit(&mut model, x, y, beta0).unwrap();
//!
//! assert!((report.beta[1] - 1.0).abs() < 0.1);
//! assert!(report.info < 10);
//! ```
//!
//! The long form goes through [`solver::OdrProblem`] and
//! [`solver::SolverParameters`], which expose weights, fix masks, scales,
//! finite-difference steps, tolerances and the packed job-integer decoding
//! of the classic interface.

pub mod errors;
pub mod jacobian;
pub mod linalg;
pub mod model;
pub mod scaling;
pub mod solver;
pub mod weights;

pub use errors::{ConvergenceKind, FitError, Warning};
pub use model::{ModelFromFunc, ModelFromFuncAndJacobians, ModelStop, OdrModel};
pub use solver::{
    fit, FitReport, OdrProblem, OdrSolver, RegressionMode, SolverParameters,
};
pub use weights::Weights;
