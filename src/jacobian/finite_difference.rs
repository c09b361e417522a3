use nalgebra::DMatrix;

use super::{JacobianMethod, JacobianRequest, JacobianScratch};
use crate::model::{ModelStop, OdrModel};
use crate::scaling::perturbation;

/// Fill the raw `∂f/∂β` columns by finite differences
///
/// One model evaluation per estimated parameter for forward differences,
/// two for central differences.
pub fn beta_columns<M: OdrModel>(
    model: &mut M,
    method: JacobianMethod,
    request: &JacobianRequest<'_>,
    jacb: &mut DMatrix<f64>,
    scratch: &mut JacobianScratch,
    nfev: &mut usize,
) -> Result<(), ModelStop> {
    let n = request.xplusd.nrows();
    let nq = request.fn_current.ncols();
    let central = method == JacobianMethod::CentralDifference;

    scratch.beta_work.copy_from(request.beta);

    for (position, &k) in request.free_beta.iter().enumerate() {
        let h = perturbation(request.beta[k], request.stpb[k], request.typb[k]);

        scratch.beta_work[k] = request.beta[k] + h;
        model.evaluate(&scratch.beta_work, request.xplusd, &mut scratch.f_plus)?;
        *nfev += 1;

        if central {
            scratch.beta_work[k] = request.beta[k] - h;
            model.evaluate(&scratch.beta_work, request.xplusd, &mut scratch.f_minus)?;
            *nfev += 1;
            for l in 0..nq {
                for i in 0..n {
                    jacb[(i + n * l, position)] =
                        (scratch.f_plus[(i, l)] - scratch.f_minus[(i, l)]) / (2.0 * h);
                }
            }
        } else {
            for l in 0..nq {
                for i in 0..n {
                    jacb[(i + n * l, position)] =
                        (scratch.f_plus[(i, l)] - request.fn_current[(i, l)]) / h;
                }
            }
        }

        scratch.beta_work[k] = request.beta[k];
    }

    Ok(())
}

/// Fill the raw `∂f/∂δ` columns by finite differences
///
/// Observations are independent, so one perturbed evaluation per explanatory
/// column serves every row at once; each row uses its own step size. Rows
/// whose delta component is pinned keep a zero derivative.
pub fn delta_columns<M: OdrModel>(
    model: &mut M,
    method: JacobianMethod,
    request: &JacobianRequest<'_>,
    jacd: &mut DMatrix<f64>,
    scratch: &mut JacobianScratch,
    nfev: &mut usize,
) -> Result<(), ModelStop> {
    let n = request.xplusd.nrows();
    let m = request.xplusd.ncols();
    let nq = request.fn_current.ncols();
    let central = method == JacobianMethod::CentralDifference;

    for j in 0..m {
        scratch.x_work.copy_from(request.xplusd);
        scratch.step_work.fill(0.0);
        for i in 0..n {
            if request.fixed_x.is_fixed(i, j) {
                continue;
            }
            let base = request.xplusd[(i, j)];
            let h = perturbation(base, request.stpd[(i, j)], base);
            scratch.step_work[i] = h;
            scratch.x_work[(i, j)] = base + h;
        }

        model.evaluate(request.beta, &scratch.x_work, &mut scratch.f_plus)?;
        *nfev += 1;

        if central {
            for i in 0..n {
                if scratch.step_work[i] != 0.0 {
                    scratch.x_work[(i, j)] = request.xplusd[(i, j)] - scratch.step_work[i];
                }
            }
            model.evaluate(request.beta, &scratch.x_work, &mut scratch.f_minus)?;
            *nfev += 1;
            for l in 0..nq {
                for i in 0..n {
                    jacd[(i + n * l, j)] = if scratch.step_work[i] == 0.0 {
                        0.0
                    } else {
                        (scratch.f_plus[(i, l)] - scratch.f_minus[(i, l)]) / (2.0 * scratch.step_work[i])
                    };
                }
            }
        } else {
            for l in 0..nq {
                for i in 0..n {
                    jacd[(i + n * l, j)] = if scratch.step_work[i] == 0.0 {
                        0.0
                    } else {
                        (scratch.f_plus[(i, l)] - request.fn_current[(i, l)]) / scratch.step_work[i]
                    };
                }
            }
        }
    }

    Ok(())
}
