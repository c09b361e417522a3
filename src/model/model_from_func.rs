use nalgebra::{DMatrix, DVector};

use super::{ModelStop, OdrModel};

/// Adapt a plain function to the [`OdrModel`] trait
///
/// The wrapped function receives `(beta, xplusd, out)` and fills `out`
/// (`n x nq`). The Jacobians are left to finite differences.
///
/// # Examples
///
/// ```
/// use odr_solver::model::{ModelFromFunc, OdrModel};
///
/// // Straight line through the data, one response component.
/// let mut model = ModelFromFunc::new(2, 1, |beta, xplusd, out| {
///     for i in 0..xplusd.nrows() {
///         out[(i, 0)] = beta[0] + beta[1] * xplusd[(i, 0)];
///     }
/// });
///
/// let beta = nalgebra::DVector::from_vec(vec![1.0, 2.0]);
/// let x = nalgebra::DMatrix::from_vec(3, 1, vec![0.0, 1.0, 2.0]);
/// let mut f = nalgebra::DMatrix::zeros(3, 1);
/// model.evaluate(&beta, &x, &mut f).unwrap();
/// assert_eq!(f[(2, 0)], 5.0);
/// ```
pub struct ModelFromFunc<F> {
    np: usize,
    nq: usize,
    func: F,
}

impl<F> ModelFromFunc<F>
where
    F: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
{
    pub fn new(np: usize, nq: usize, func: F) -> Self {
        ModelFromFunc { np, nq, func }
    }
}

impl<F> OdrModel for ModelFromFunc<F>
where
    F: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
{
    fn len_beta(&self) -> usize {
        self.np
    }

    fn len_response(&self) -> usize {
        self.nq
    }

    fn evaluate(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        (self.func)(beta, xplusd, out);
        Ok(())
    }
}

/// Adapt a function plus its two analytic Jacobians to [`OdrModel`]
///
/// `jac_beta` and `jac_delta` fill the stacked layouts documented on
/// [`OdrModel::jacobian_beta`] and [`OdrModel::jacobian_delta`].
pub struct ModelFromFuncAndJacobians<F, Jb, Jd> {
    np: usize,
    nq: usize,
    func: F,
    jac_beta: Jb,
    jac_delta: Jd,
}

impl<F, Jb, Jd> ModelFromFuncAndJacobians<F, Jb, Jd>
where
    F: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
    Jb: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
    Jd: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
{
    pub fn new(np: usize, nq: usize, func: F, jac_beta: Jb, jac_delta: Jd) -> Self {
        ModelFromFuncAndJacobians {
            np,
            nq,
            func,
            jac_beta,
            jac_delta,
        }
    }
}

impl<F, Jb, Jd> OdrModel for ModelFromFuncAndJacobians<F, Jb, Jd>
where
    F: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
    Jb: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
    Jd: FnMut(&DVector<f64>, &DMatrix<f64>, &mut DMatrix<f64>),
{
    fn len_beta(&self) -> usize {
        self.np
    }

    fn len_response(&self) -> usize {
        self.nq
    }

    fn evaluate(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        (self.func)(beta, xplusd, out);
        Ok(())
    }

    fn jacobian_provided(&self) -> bool {
        true
    }

    fn jacobian_beta(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        (self.jac_beta)(beta, xplusd, out);
        Ok(())
    }

    fn jacobian_delta(
        &mut self,
        beta: &DVector<f64>,
        xplusd: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelStop> {
        (self.jac_delta)(beta, xplusd, out);
        Ok(())
    }
}
