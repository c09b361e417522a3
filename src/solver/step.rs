//! Step computation for one Levenberg-Marquardt parameter
//!
//! For a given `α` this solves the first-order conditions of the joint
//! `(β, δ)` subproblem by eliminating the deltas observation by observation,
//! factoring the reduced problem for the `β` step with a QR decomposition,
//! and back-substituting the `δ` step.
//!
//! With `E_i = wd_i + α T_i²` and `Ω_iᵀΩ_i = I + J_{δ,i} E_i⁻¹ J_{δ,i}ᵀ`,
//! the reduced least squares problem for the scaled step `s̃ = S_β s` is
//!
//! ```text
//! min ‖ ĝ + K s̃ ‖² + α ‖s̃‖²,
//!   ĝ_i = Ω_i⁻ᵀ (f_i − J_{δ,i} E_i⁻¹ wd_i δ_i),
//!   K_i = Ω_i⁻ᵀ J_{β,i} S_β⁻¹,
//! ```
//!
//! and the exact profiled minimiser of the deltas is recovered per
//! observation from the same factors. The trust-region residual returned is
//! `φ(α) = ‖(S_β s, T t)‖ − τ`.

use nalgebra::{DMatrix, DVector};

use crate::jacobian::FixPattern;
use crate::linalg::{
    cholesky_upper, rcond_estimate, remove_column, solve_lower_from_upper_transpose, solve_upper,
    solve_upper_k, Definiteness, GivensRotation, PivotedQr,
};
use crate::weights::DeltaWeights;

/// Everything the step computation reads at one iterate
pub struct StepContext<'a> {
    /// Weighted stacked residuals (`n*nq`)
    pub residuals: &'a DVector<f64>,
    /// Weighted `∂f/∂β` (`n*nq x npp`)
    pub jacb: &'a DMatrix<f64>,
    /// Weighted `∂f/∂δ` (`n*nq x m`)
    pub jacd: &'a DMatrix<f64>,
    /// Current deltas (`n x m`)
    pub delta: &'a DMatrix<f64>,
    /// `None` for ordinary least squares
    pub delta_weights: Option<&'a DeltaWeights>,
    pub fixed_x: &'a FixPattern,
    /// Scales of the estimated parameters (`npp`, compacted)
    pub ssf: &'a DVector<f64>,
    /// Delta scales (`n x m`)
    pub tt: &'a DMatrix<f64>,
    pub n: usize,
    pub m: usize,
    pub nq: usize,
    pub npp: usize,
    /// Reciprocal-condition threshold for the rank determination
    pub epsfcn: f64,
}

/// Output of one step computation
pub struct StepResult {
    /// Parameter step in free order, unscaled
    pub s: DVector<f64>,
    /// Delta step (`n x m`), zero for ordinary least squares
    pub t: DMatrix<f64>,
    /// `‖(S_β s, T t)‖ − τ`
    pub phi: f64,
    /// Scaled step norm `‖(S_β s, T t)‖`
    pub pnorm: f64,
    /// `‖J (s,t)‖² + tᵀ wd t`, the linear model of the residual change
    pub predicted_sq: f64,
    pub irank: usize,
    pub rcond: f64,
    /// Column order of the factorization (free positions)
    pub pivot: Vec<usize>,
}

/// The prepared factorization handed to the covariance post-processing
pub struct CovarianceFactor {
    pub r: DMatrix<f64>,
    pub pivot: Vec<usize>,
    pub irank: usize,
    pub rcond: f64,
}

/// Numerical breakdown inside the step computation (info 60000)
#[derive(Debug)]
pub struct StepError {
    pub details: String,
}

/// Preallocated buffers reused by every step computation
pub struct StepWorkspace {
    kmat: DMatrix<f64>,
    ghat: DVector<f64>,
    wd_i: DMatrix<f64>,
    e: DMatrix<f64>,
    omega: DMatrix<f64>,
    jd_i: DMatrix<f64>,
    jb_i: DMatrix<f64>,
    w: DVector<f64>,
    ew: DVector<f64>,
}

impl StepWorkspace {
    pub fn new(n: usize, m: usize, nq: usize, npp: usize) -> Self {
        StepWorkspace {
            kmat: DMatrix::zeros(n * nq, npp),
            ghat: DVector::zeros(n * nq),
            wd_i: DMatrix::zeros(m, m),
            e: DMatrix::zeros(m, m),
            omega: DMatrix::zeros(nq, nq),
            jd_i: DMatrix::zeros(nq, m),
            jb_i: DMatrix::zeros(nq, npp),
            w: DVector::zeros(m),
            ew: DVector::zeros(m),
        }
    }
}

fn gather_blocks(ctx: &StepContext<'_>, i: usize, ws: &mut StepWorkspace) {
    for l in 0..ctx.nq {
        for j in 0..ctx.m {
            ws.jd_i[(l, j)] = ctx.jacd[(i + ctx.n * l, j)];
        }
        for c in 0..ctx.npp {
            ws.jb_i[(l, c)] = ctx.jacb[(i + ctx.n * l, c)];
        }
    }
}

/// Factor `E_i` and `Ω_i` for observation `i`, leaving the Cholesky factors
/// in `ws.e` and `ws.omega` and `E_i⁻¹ wd_i δ_i` in `ws.ew`
fn factor_observation(
    ctx: &StepContext<'_>,
    i: usize,
    alpha: f64,
    ws: &mut StepWorkspace,
) -> Result<(), StepError> {
    let wd = ctx
        .delta_weights
        .expect("delta elimination requires delta weights");

    wd.write_observation(i, &mut ws.wd_i);
    ws.e.copy_from(&ws.wd_i);
    for j in 0..ctx.m {
        ws.e[(j, j)] += alpha * ctx.tt[(i, j)] * ctx.tt[(i, j)];
    }
    cholesky_upper(&mut ws.e, Definiteness::Positive).map_err(|err| StepError {
        details: format!("E factor of observation {}: {}", i, err),
    })?;

    // Ω_iᵀΩ_i = I + J_δ E⁻¹ J_δᵀ, built column by column through the
    // triangular solves with the factor of E.
    ws.omega.fill(0.0);
    for l in 0..ctx.nq {
        ws.omega[(l, l)] = 1.0;
    }
    for l in 0..ctx.nq {
        let col = DVector::from_fn(ctx.m, |j, _| ws.jd_i[(l, j)]);
        let half = solve_lower_from_upper_transpose(&ws.e, &col);
        let full = solve_upper(&ws.e, &half);
        for q in 0..ctx.nq {
            let mut acc = 0.0;
            for j in 0..ctx.m {
                acc += ws.jd_i[(q, j)] * full[j];
            }
            ws.omega[(q, l)] += acc;
        }
    }
    cholesky_upper(&mut ws.omega, Definiteness::Positive).map_err(|err| StepError {
        details: format!("Ω factor of observation {}: {}", i, err),
    })?;

    // ew = E⁻¹ wd δ_i
    let delta_i = DVector::from_fn(ctx.m, |j, _| ctx.delta[(i, j)]);
    wd.multiply(i, &delta_i, &mut ws.w);
    let half = solve_lower_from_upper_transpose(&ws.e, &ws.w);
    let full = solve_upper(&ws.e, &half);
    ws.ew.copy_from(&full);

    Ok(())
}

/// Build the reduced problem, factor it, and either run the rank
/// determination (`α = 0`) or fold in the Levenberg regulariser
///
/// Returns the triangular factor, the transformed right-hand side, the
/// pivot order, the surviving rank and its condition estimate.
fn reduce_and_factor(
    ctx: &StepContext<'_>,
    alpha: f64,
    ws: &mut StepWorkspace,
) -> Result<(DMatrix<f64>, DVector<f64>, Vec<usize>, usize, f64), StepError> {
    let big_n = ctx.n * ctx.nq;

    if ctx.delta_weights.is_some() {
        for i in 0..ctx.n {
            gather_blocks(ctx, i, ws);
            factor_observation(ctx, i, alpha, ws)?;

            // rhs_i = f_i − J_δ ew, then ĝ_i = Ω⁻ᵀ rhs_i
            let mut rhs = DVector::from_fn(ctx.nq, |l, _| ctx.residuals[i + ctx.n * l]);
            for l in 0..ctx.nq {
                let mut acc = 0.0;
                for j in 0..ctx.m {
                    acc += ws.jd_i[(l, j)] * ws.ew[j];
                }
                rhs[l] -= acc;
            }
            let ghat_i = solve_lower_from_upper_transpose(&ws.omega, &rhs);
            for l in 0..ctx.nq {
                ws.ghat[i + ctx.n * l] = ghat_i[l];
            }

            // K rows: Ω⁻ᵀ J_β, columns divided by the β scales
            for c in 0..ctx.npp {
                let col = DVector::from_fn(ctx.nq, |l, _| ws.jb_i[(l, c)]);
                let reduced = solve_lower_from_upper_transpose(&ws.omega, &col);
                for l in 0..ctx.nq {
                    ws.kmat[(i + ctx.n * l, c)] = reduced[l] / ctx.ssf[c];
                }
            }
        }
    } else {
        // Ordinary least squares: the reduced problem is the weighted
        // Jacobian itself.
        ws.ghat.copy_from(ctx.residuals);
        for c in 0..ctx.npp {
            for r in 0..big_n {
                ws.kmat[(r, c)] = ctx.jacb[(r, c)] / ctx.ssf[c];
            }
        }
    }

    let pivoting = alpha == 0.0;
    let qr = PivotedQr::factor(ws.kmat.clone(), pivoting);
    let mut qtb = -&ws.ghat;
    qr.q_transpose_mul(&mut qtb);
    let mut qtb_top = qtb.rows(0, ctx.npp).into_owned();
    let mut r = qr.upper_triangle();
    let mut pivot = qr.pivot().to_vec();

    let mut k = ctx.npp;
    let mut rcond = 1.0;
    if pivoting {
        loop {
            let (rc, jnull) = rcond_estimate(&r, k);
            rcond = rc;
            if rc > ctx.epsfcn || k == 0 {
                break;
            }
            remove_column(&mut r, &mut qtb_top, &mut pivot, jnull, k);
            k -= 1;
        }
    } else {
        // Eliminate the √α regulariser rows with Givens rotations carrying
        // the right-hand side along.
        let sqrt_alpha = alpha.sqrt();
        let mut row_extra = DVector::zeros(ctx.npp);
        for c in 0..ctx.npp {
            row_extra.fill(0.0);
            row_extra[c] = sqrt_alpha;
            let mut rhs_extra = 0.0;
            for q in c..ctx.npp {
                if row_extra[q] == 0.0 {
                    continue;
                }
                let (rot, rr) = GivensRotation::compute(r[(q, q)], row_extra[q]);
                r[(q, q)] = rr;
                row_extra[q] = 0.0;
                for p in (q + 1)..ctx.npp {
                    let (x, y) = rot.apply(r[(q, p)], row_extra[p]);
                    r[(q, p)] = x;
                    row_extra[p] = y;
                }
                let (bx, by) = rot.apply(qtb_top[q], rhs_extra);
                qtb_top[q] = bx;
                rhs_extra = by;
            }
        }
    }

    Ok((r, qtb_top, pivot, k, rcond))
}

/// Compute the step for one value of the Levenberg-Marquardt parameter
pub fn compute_step(
    ctx: &StepContext<'_>,
    alpha: f64,
    tau: f64,
    ws: &mut StepWorkspace,
) -> Result<StepResult, StepError> {
    let (r, qtb_top, pivot, k, rcond) = reduce_and_factor(ctx, alpha, ws)?;
    let irank = ctx.npp - k;

    // Scaled step in pivoted order, zero for the removed columns.
    let y = solve_upper_k(&r, &qtb_top, k);
    let mut s_scaled = DVector::zeros(ctx.npp);
    for p in 0..k {
        s_scaled[pivot[p]] = y[p];
    }
    let mut s = DVector::zeros(ctx.npp);
    for c in 0..ctx.npp {
        s[c] = s_scaled[c] / ctx.ssf[c];
    }

    let mut pnorm_sq = s_scaled.norm_squared();
    let mut predicted_sq = 0.0;
    let mut t = DMatrix::zeros(ctx.n, ctx.m);

    if ctx.delta_weights.is_some() {
        for i in 0..ctx.n {
            gather_blocks(ctx, i, ws);
            factor_observation(ctx, i, alpha, ws)?;

            // v_i = f_i + J_β s, corrected by the delta penalty term
            let mut rhs = DVector::from_fn(ctx.nq, |l, _| ctx.residuals[i + ctx.n * l]);
            for l in 0..ctx.nq {
                let mut acc = 0.0;
                for c in 0..ctx.npp {
                    acc += ws.jb_i[(l, c)] * s[c];
                }
                rhs[l] += acc;
                let mut corr = 0.0;
                for j in 0..ctx.m {
                    corr += ws.jd_i[(l, j)] * ws.ew[j];
                }
                rhs[l] -= corr;
            }

            // z = (ΩᵀΩ)⁻¹ rhs
            let half = solve_lower_from_upper_transpose(&ws.omega, &rhs);
            let z = solve_upper(&ws.omega, &half);

            // t_i = −E⁻¹ (J_δᵀ z + wd δ_i)
            let mut tvec = ws.w.clone();
            for j in 0..ctx.m {
                let mut acc = 0.0;
                for l in 0..ctx.nq {
                    acc += ws.jd_i[(l, j)] * z[l];
                }
                tvec[j] += acc;
            }
            let half = solve_lower_from_upper_transpose(&ws.e, &tvec);
            let full = solve_upper(&ws.e, &half);
            for j in 0..ctx.m {
                t[(i, j)] = if ctx.fixed_x.is_fixed(i, j) {
                    0.0
                } else {
                    -full[j]
                };
            }

            for j in 0..ctx.m {
                let scaled = ctx.tt[(i, j)] * t[(i, j)];
                pnorm_sq += scaled * scaled;
            }

            // Linear model of the residual change for the predicted
            // reduction: J_β s + J_δ t plus the delta penalty block.
            for l in 0..ctx.nq {
                let mut acc = 0.0;
                for c in 0..ctx.npp {
                    acc += ws.jb_i[(l, c)] * s[c];
                }
                for j in 0..ctx.m {
                    acc += ws.jd_i[(l, j)] * t[(i, j)];
                }
                predicted_sq += acc * acc;
            }
            let t_i = DVector::from_fn(ctx.m, |j, _| t[(i, j)]);
            let wd = ctx.delta_weights.expect("checked above");
            let mut wt = DVector::zeros(ctx.m);
            wd.multiply(i, &t_i, &mut wt);
            predicted_sq += t_i.dot(&wt);
        }
    } else {
        for r_idx in 0..(ctx.n * ctx.nq) {
            let mut acc = 0.0;
            for c in 0..ctx.npp {
                acc += ctx.jacb[(r_idx, c)] * s[c];
            }
            predicted_sq += acc * acc;
        }
    }

    let pnorm = pnorm_sq.sqrt();
    Ok(StepResult {
        s,
        t,
        phi: pnorm - tau,
        pnorm,
        predicted_sq,
        irank,
        rcond,
        pivot,
    })
}

/// Factor the reduced problem at `α = 0` and stop before the
/// back-substitution, as needed by the covariance post-processing
pub fn covariance_factor(
    ctx: &StepContext<'_>,
    ws: &mut StepWorkspace,
) -> Result<CovarianceFactor, StepError> {
    let (r, _qtb, pivot, k, rcond) = reduce_and_factor(ctx, 0.0, ws)?;
    Ok(CovarianceFactor {
        r,
        pivot,
        irank: ctx.npp - k,
        rcond,
    })
}

/// Norm of the objective gradient at the current iterate, in the scaled
/// variables, used for the Levenberg-Marquardt parameter bounds
pub fn scaled_gradient_norm(ctx: &StepContext<'_>) -> f64 {
    let mut acc = 0.0;

    for c in 0..ctx.npp {
        let mut g = 0.0;
        for r in 0..(ctx.n * ctx.nq) {
            g += ctx.jacb[(r, c)] * ctx.residuals[r];
        }
        let scaled = g / ctx.ssf[c];
        acc += scaled * scaled;
    }

    if let Some(wd) = ctx.delta_weights {
        let mut w = DVector::zeros(ctx.m);
        for i in 0..ctx.n {
            let delta_i = DVector::from_fn(ctx.m, |j, _| ctx.delta[(i, j)]);
            wd.multiply(i, &delta_i, &mut w);
            for j in 0..ctx.m {
                if ctx.fixed_x.is_fixed(i, j) {
                    continue;
                }
                let mut g = w[j];
                for l in 0..ctx.nq {
                    g += ctx.jacd[(i + ctx.n * l, j)] * ctx.residuals[i + ctx.n * l];
                }
                let scaled = g / ctx.tt[(i, j)];
                acc += scaled * scaled;
            }
        }
    }

    acc.sqrt()
}
