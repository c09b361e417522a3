//! Dense linear-algebra primitives used by the step solver
//!
//! The factorizations needed here carry requirements that the decompositions
//! shipped with `nalgebra` do not expose:
//! - a Cholesky factorization that accepts positive *semidefinite* input,
//! - triangular solves with an explicit zero-pivot policy,
//! - a pivoted QR whose factorization can be updated in place when a
//!   column is judged dependent and moved to the tail.
//!
//! They are therefore implemented on top of `nalgebra` storage. Every routine
//! reports numerical failure through its return value; none of them
//! propagates NaN silently.

mod cholesky;
mod givens;
mod qr;
mod triangular;

pub use cholesky::{cholesky_upper, Definiteness, NotPositiveDefinite};
pub use givens::GivensRotation;
pub use qr::{rcond_estimate, remove_column, PivotedQr};
pub use triangular::{solve_lower_from_upper_transpose, solve_upper, solve_upper_k};
