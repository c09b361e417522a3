use nalgebra::{DMatrix, DVector};

use super::{FixPattern, JacobianScratch};
use crate::model::{ModelStop, OdrModel};

/// Per-component diagnoses of the analytic Jacobians
///
/// The codes follow the verification protocol:
/// - `0` / `1`: analytic and numerical derivatives agree (at the first step
///   size, or only after adjusting it),
/// - `2`: both are too small to compare meaningfully,
/// - `3`: they disagree,
/// - `4` / `5`: the disagreement is explained (4) or aggravated (5) by high
///   curvature at the representative row,
/// - `6`: the disagreement is within the expected finite-precision
///   cancellation,
/// - `7`: the check cannot decide.
pub struct DerivativeCheck {
    pub msgb: Vec<i8>,
    pub msgd: Vec<i8>,
    /// 0 = verified, 1 = questionable, 2 = incorrect
    pub beta_flag: u8,
    /// 0 = verified, 1 = questionable, 2 = incorrect
    pub delta_flag: u8,
}

impl DerivativeCheck {
    fn flag_for(codes: &[i8]) -> u8 {
        let mut flag = 0;
        for &code in codes {
            if code == 3 {
                flag = 2;
            } else if code >= 4 && flag == 0 {
                flag = 1;
            }
        }
        flag
    }
}

/// Classify one derivative column from staged samples
///
/// `fd` holds the forward-difference approximations at the initial step and
/// at ten times / one tenth of it; `wide` holds the forward and central
/// approximations at the widened step used by the curvature test.
fn classify(
    analytic: &[f64],
    f0: &[f64],
    fd: &[Vec<f64>; 3],
    wide_forward: &[f64],
    wide_central: &[f64],
    eta: f64,
    h0: f64,
) -> i8 {
    let tol = eta.powf(0.25);
    let nq = analytic.len();

    let rel = |approx: &[f64]| -> f64 {
        let mut worst = 0.0_f64;
        for l in 0..nq {
            let denom = analytic[l].abs().max(approx[l].abs()).max(f64::MIN_POSITIVE);
            worst = worst.max((approx[l] - analytic[l]).abs() / denom);
        }
        worst
    };

    // Agreement at the initial step, or at an adjusted one.
    if rel(&fd[0]) <= tol {
        return 0;
    }
    if rel(&fd[1]) <= tol || rel(&fd[2]) <= tol {
        return 1;
    }

    // Both near zero: nothing to compare.
    let cancel_bound: Vec<f64> = (0..nq)
        .map(|l| eta * (1.0 + f0[l].abs()) / h0.abs())
        .collect();
    if (0..nq).all(|l| analytic[l].abs() <= cancel_bound[l] && fd[0][l].abs() <= cancel_bound[l]) {
        return 2;
    }

    // High curvature: the forward approximation drifts with the step size.
    let mut curvature = 0.0_f64;
    for l in 0..nq {
        let denom = wide_central[l].abs().max(f64::MIN_POSITIVE);
        curvature = curvature.max((wide_forward[l] - wide_central[l]).abs() / denom);
    }
    if curvature > tol.sqrt() {
        let central_rel = rel(wide_central);
        return if central_rel <= tol.sqrt() { 4 } else { 5 };
    }

    // Cancellation: the disagreement is no larger than the round-off the
    // forward difference must carry.
    if (0..nq).all(|l| (fd[0][l] - analytic[l]).abs() <= 10.0 * cancel_bound[l]) {
        return 6;
    }

    // A derivative smaller than its own noise floor cannot be judged.
    if (0..nq).all(|l| analytic[l].abs().max(fd[0][l].abs()) <= 10.0 * cancel_bound[l]) {
        return 7;
    }

    3
}

/// Verify the analytic Jacobians against finite differences at the
/// representative row
///
/// Only called at initialization when the caller asked for a checked
/// analytic Jacobian. Never fatal by itself: the result is folded into the
/// diagnostic warnings.
#[allow(clippy::too_many_arguments)]
pub fn check_derivatives<M: OdrModel>(
    model: &mut M,
    beta: &DVector<f64>,
    xplusd: &DMatrix<f64>,
    fn_current: &DMatrix<f64>,
    nrow: usize,
    free_beta: &[usize],
    fixed_x: &FixPattern,
    eta: f64,
    typb: &DVector<f64>,
    with_delta: bool,
    scratch: &mut JacobianScratch,
    nfev: &mut usize,
    njev: &mut usize,
) -> Result<DerivativeCheck, ModelStop> {
    let n = xplusd.nrows();
    let m = xplusd.ncols();
    let nq = fn_current.ncols();
    let np = beta.len();

    model.jacobian_beta(beta, xplusd, &mut scratch.raw_b)?;
    if with_delta {
        model.jacobian_delta(beta, xplusd, &mut scratch.raw_d)?;
    }
    *njev += 1;

    let f0: Vec<f64> = (0..nq).map(|l| fn_current[(nrow, l)]).collect();
    let mut msgb = vec![0_i8; np];
    let mut msgd = vec![0_i8; m];

    // beta columns
    scratch.beta_work.copy_from(beta);
    for &k in free_beta {
        let analytic: Vec<f64> = (0..nq).map(|l| scratch.raw_b[(nrow + n * l, k)]).collect();
        let h0 = eta.sqrt() * beta[k].abs().max(typb[k].abs()).max(f64::EPSILON);

        let mut sample = |h: f64,
                          model: &mut M,
                          beta_work: &mut DVector<f64>,
                          f_plus: &mut DMatrix<f64>,
                          nfev: &mut usize|
         -> Result<Vec<f64>, ModelStop> {
            beta_work[k] = beta[k] + h;
            model.evaluate(beta_work, xplusd, f_plus)?;
            *nfev += 1;
            beta_work[k] = beta[k];
            Ok((0..nq)
                .map(|l| (f_plus[(nrow, l)] - f0[l]) / h)
                .collect())
        };

        let fd = [
            sample(h0, model, &mut scratch.beta_work, &mut scratch.f_plus, nfev)?,
            sample(10.0 * h0, model, &mut scratch.beta_work, &mut scratch.f_plus, nfev)?,
            sample(0.1 * h0, model, &mut scratch.beta_work, &mut scratch.f_plus, nfev)?,
        ];
        let wide_forward = fd[1].clone();
        // Central difference over the widened step for the curvature test.
        scratch.beta_work[k] = beta[k] - 10.0 * h0;
        model.evaluate(&scratch.beta_work, xplusd, &mut scratch.f_minus)?;
        *nfev += 1;
        scratch.beta_work[k] = beta[k];
        let wide_central: Vec<f64> = (0..nq)
            .map(|l| {
                (10.0 * h0 * wide_forward[l] + f0[l] - scratch.f_minus[(nrow, l)]) / (20.0 * h0)
            })
            .collect();

        msgb[k] = classify(&analytic, &f0, &fd, &wide_forward, &wide_central, eta, h0);
    }

    // delta columns
    if with_delta {
        for j in 0..m {
            if fixed_x.is_fixed(nrow, j) {
                continue;
            }
            let analytic: Vec<f64> =
                (0..nq).map(|l| scratch.raw_d[(nrow + n * l, j)]).collect();
            let base = xplusd[(nrow, j)];
            let h0 = eta.sqrt() * base.abs().max(f64::EPSILON.sqrt());

            let mut sample = |h: f64,
                              model: &mut M,
                              x_work: &mut DMatrix<f64>,
                              f_plus: &mut DMatrix<f64>,
                              nfev: &mut usize|
             -> Result<Vec<f64>, ModelStop> {
                x_work.copy_from(xplusd);
                x_work[(nrow, j)] = base + h;
                model.evaluate(beta, x_work, f_plus)?;
                *nfev += 1;
                Ok((0..nq)
                    .map(|l| (f_plus[(nrow, l)] - f0[l]) / h)
                    .collect())
            };

            let fd = [
                sample(h0, model, &mut scratch.x_work, &mut scratch.f_plus, nfev)?,
                sample(10.0 * h0, model, &mut scratch.x_work, &mut scratch.f_plus, nfev)?,
                sample(0.1 * h0, model, &mut scratch.x_work, &mut scratch.f_plus, nfev)?,
            ];
            let wide_forward = fd[1].clone();
            scratch.x_work.copy_from(xplusd);
            scratch.x_work[(nrow, j)] = base - 10.0 * h0;
            model.evaluate(beta, &scratch.x_work, &mut scratch.f_minus)?;
            *nfev += 1;
            let wide_central: Vec<f64> = (0..nq)
                .map(|l| {
                    (10.0 * h0 * wide_forward[l] + f0[l] - scratch.f_minus[(nrow, l)])
                        / (20.0 * h0)
                })
                .collect();

            msgd[j] = classify(&analytic, &f0, &fd, &wide_forward, &wide_central, eta, h0);
        }
    }

    let beta_flag = DerivativeCheck::flag_for(&msgb);
    let delta_flag = DerivativeCheck::flag_for(&msgd);
    Ok(DerivativeCheck {
        msgb,
        msgd,
        beta_flag,
        delta_flag,
    })
}
