use nalgebra::DMatrix;

use crate::jacobian::FixPattern;
use crate::weights::Weights;

/// The data side of a regression problem
///
/// Owns the observations, the weights and the fix masks. Everything except
/// the data itself is optional and defaults to the unconstrained, unit
/// weight case. Shapes are validated when the solve starts, against the
/// dimensions announced by the model.
pub struct OdrProblem {
    x: DMatrix<f64>,
    y: Option<DMatrix<f64>>,
    we: Weights,
    wd: Weights,
    fixed_beta: Option<Vec<bool>>,
    fixed_x: FixPattern,
    initial_delta: Option<DMatrix<f64>>,
}

impl OdrProblem {
    /// Explicit problem: observations `x` (`n x m`) and responses `y`
    /// (`n x nq`)
    pub fn new(x: DMatrix<f64>, y: DMatrix<f64>) -> Self {
        if x.nrows() != y.nrows() {
            panic!(
                "Dimension mismatch :\n x has {} observations and y has {}",
                x.nrows(),
                y.nrows()
            );
        }
        OdrProblem {
            x,
            y: Some(y),
            we: Weights::unit(),
            wd: Weights::unit(),
            fixed_beta: None,
            fixed_x: FixPattern::Free,
            initial_delta: None,
        }
    }

    /// Implicit problem: only observations, the model is driven to zero
    pub fn implicit(x: DMatrix<f64>) -> Self {
        OdrProblem {
            x,
            y: None,
            we: Weights::unit(),
            wd: Weights::unit(),
            fixed_beta: None,
            fixed_x: FixPattern::Free,
            initial_delta: None,
        }
    }

    pub fn n(&self) -> usize {
        self.x.nrows()
    }

    pub fn m(&self) -> usize {
        self.x.ncols()
    }

    pub fn get_x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn get_y(&self) -> Option<&DMatrix<f64>> {
        self.y.as_ref()
    }

    pub fn get_we(&self) -> &Weights {
        &self.we
    }

    pub fn get_wd(&self) -> &Weights {
        &self.wd
    }

    pub fn get_fixed_beta(&self) -> Option<&[bool]> {
        self.fixed_beta.as_deref()
    }

    pub fn get_fixed_x(&self) -> &FixPattern {
        &self.fixed_x
    }

    pub fn get_initial_delta(&self) -> Option<&DMatrix<f64>> {
        self.initial_delta.as_ref()
    }

    /// Observation-error weights (`we`)
    pub fn set_response_weights(&mut self, we: Weights) {
        self.we = we;
    }

    /// Delta weights (`wd`)
    pub fn set_delta_weights(&mut self, wd: Weights) {
        self.wd = wd;
    }

    /// Mask of parameters held at their starting values (`true` = fixed)
    pub fn set_fixed_beta(&mut self, fixed: Vec<bool>) {
        self.fixed_beta = Some(fixed);
    }

    /// Mask of pinned delta components
    pub fn set_fixed_x(&mut self, fixed: FixPattern) {
        self.fixed_x = fixed;
    }

    /// Starting deltas, used when the parameters ask for a supplied `δ`
    pub fn set_initial_delta(&mut self, delta: DMatrix<f64>) {
        if delta.nrows() != self.x.nrows() || delta.ncols() != self.x.ncols() {
            panic!(
                "Dimension mismatch :\n initial delta is {} x {} and x is {} x {}",
                delta.nrows(),
                delta.ncols(),
                self.x.nrows(),
                self.x.ncols()
            );
        }
        self.initial_delta = Some(delta);
    }
}
