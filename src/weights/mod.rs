//! Weight matrices for the two residual blocks
//!
//! Both the observation-error weights `we` and the delta weights `wd` accept
//! the same broadcast forms: a single scalar, one diagonal or full matrix
//! shared by every observation, or one diagonal/full matrix per observation.
//! The solver factors them once before iterating: `we` into its symmetric
//! square root (positive semidefinite, zero rows allowed), `wd` into a
//! strict Cholesky factor (positive definite required for orthogonal
//! distance problems).

mod factorize;
mod spec;

pub use factorize::{factor_delta_weights, factor_response_weights, DeltaWeights, ResponseWeights};
pub use spec::{WeightError, Weights};
