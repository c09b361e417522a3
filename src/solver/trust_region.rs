//! Search for the Levenberg-Marquardt parameter
//!
//! Finds `α >= 0` such that the scaled step norm lands on the trust-region
//! boundary, `|φ(α)| <= 0.1 τ`, or accepts the unconstrained Gauss-Newton
//! step when it already fits. The bracket on `α` follows the standard
//! estimates from the gradient norm; inside the bracket a safeguarded
//! secant iteration runs for at most ten step computations before the last
//! step is returned as a best effort.

use super::step::{
    compute_step, scaled_gradient_norm, StepContext, StepError, StepResult, StepWorkspace,
};

/// How the returned step was obtained
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// The unconstrained `α = 0` step fits the trust region
    GaussNewton,
    /// A constrained step with `|φ| <= 0.1 τ`, found in `iterations` tries
    LevenbergMarquardt { iterations: usize },
    /// No `α` satisfied the tolerance within ten tries; the last step is
    /// returned anyway
    BestEffort,
}

impl StepKind {
    /// Internal doubling only applies to steps the search actually
    /// converged on
    pub fn doubling_eligible(&self) -> bool {
        !matches!(self, StepKind::BestEffort)
    }
}

/// A step together with the parameter that produced it
pub struct TrustRegionStep {
    pub result: StepResult,
    pub alpha: f64,
    pub kind: StepKind,
}

const MAX_SEARCH: usize = 10;

/// Find a step whose scaled norm respects the trust region radius `tau`
///
/// `warm_alpha` seeds the search with the parameter accepted at the
/// previous outer iteration.
pub fn find_step(
    ctx: &StepContext<'_>,
    ws: &mut StepWorkspace,
    tau: f64,
    warm_alpha: f64,
) -> Result<TrustRegionStep, StepError> {
    let tol = 0.1 * tau;

    let gauss_newton = compute_step(ctx, 0.0, tau, ws)?;
    if gauss_newton.phi <= tol {
        return Ok(TrustRegionStep {
            result: gauss_newton,
            alpha: 0.0,
            kind: StepKind::GaussNewton,
        });
    }

    // Rank and conditioning are determined by the pivoted α = 0
    // factorization only; carry them onto whichever constrained step is
    // returned.
    let rank_info = (
        gauss_newton.irank,
        gauss_newton.rcond,
        gauss_newton.pivot.clone(),
    );
    let restore_rank = |mut result: StepResult| {
        result.irank = rank_info.0;
        result.rcond = rank_info.1;
        result.pivot = rank_info.2.clone();
        result
    };

    let gnorm = scaled_gradient_norm(ctx);
    let mut alpha_up = (gnorm / tau).max(f64::MIN_POSITIVE);
    let mut alpha_low = 0.0_f64;

    let mut alpha1 = 0.0;
    let mut phi1 = gauss_newton.phi;
    let mut alpha2 = if warm_alpha > alpha_low && warm_alpha < alpha_up {
        warm_alpha
    } else {
        0.001 * alpha_up
    };

    let mut last = gauss_newton;
    for iteration in 1..=MAX_SEARCH {
        let result = compute_step(ctx, alpha2, tau, ws)?;
        let phi2 = result.phi;

        if phi2.abs() <= tol {
            return Ok(TrustRegionStep {
                result: restore_rank(result),
                alpha: alpha2,
                kind: StepKind::LevenbergMarquardt {
                    iterations: iteration,
                },
            });
        }

        if phi2 < 0.0 {
            alpha_up = alpha2;
        } else {
            alpha_low = alpha2;
        }

        // Bracket collapsed onto a bound with the right sign: take it.
        if alpha_up - alpha_low <= f64::EPSILON * alpha_up {
            return Ok(TrustRegionStep {
                result: restore_rank(result),
                alpha: alpha2,
                kind: StepKind::LevenbergMarquardt {
                    iterations: iteration,
                },
            });
        }

        // Secant step with the boundary correction (φ₁ + τ)/τ.
        let mut next =
            alpha2 - (phi2 * (alpha1 - alpha2) / (phi1 - phi2)) * ((phi1 + tau) / tau);
        if !next.is_finite() || next <= alpha_low || next >= alpha_up {
            next = if alpha_low > 0.0 {
                (alpha_low * alpha_up).sqrt()
            } else {
                0.001 * alpha_up
            };
        }

        alpha1 = alpha2;
        phi1 = phi2;
        alpha2 = next;
        last = result;
    }

    Ok(TrustRegionStep {
        result: restore_rank(last),
        alpha: alpha1,
        kind: StepKind::BestEffort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian::FixPattern;
    use crate::weights::{factor_delta_weights, Weights};
    use nalgebra::{DMatrix, DVector};

    struct Fixture {
        residuals: DVector<f64>,
        jacb: DMatrix<f64>,
        jacd: DMatrix<f64>,
        delta: DMatrix<f64>,
        ssf: DVector<f64>,
        tt: DMatrix<f64>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                residuals: DVector::from_vec(vec![2.0]),
                jacb: DMatrix::from_vec(1, 1, vec![1.0]),
                jacd: DMatrix::from_vec(1, 1, vec![1.0]),
                delta: DMatrix::zeros(1, 1),
                ssf: DVector::from_vec(vec![1.0]),
                tt: DMatrix::from_vec(1, 1, vec![1.0]),
            }
        }
    }

    #[test]
    fn large_radius_returns_gauss_newton() {
        let fixture = Fixture::new();
        let wd = factor_delta_weights(&Weights::Scalar(1.0), 1, 1).unwrap();
        let fixed = FixPattern::Free;
        let ctx = StepContext {
            residuals: &fixture.residuals,
            jacb: &fixture.jacb,
            jacd: &fixture.jacd,
            delta: &fixture.delta,
            delta_weights: Some(&wd),
            fixed_x: &fixed,
            ssf: &fixture.ssf,
            tt: &fixture.tt,
            n: 1,
            m: 1,
            nq: 1,
            npp: 1,
            epsfcn: 1e-12,
        };
        let mut ws = StepWorkspace::new(1, 1, 1, 1);

        let step = find_step(&ctx, &mut ws, 100.0, 0.0).unwrap();
        assert_eq!(step.kind, StepKind::GaussNewton);
        assert_eq!(step.alpha, 0.0);
    }

    #[test]
    fn tight_radius_lands_on_the_boundary() {
        let fixture = Fixture::new();
        let wd = factor_delta_weights(&Weights::Scalar(1.0), 1, 1).unwrap();
        let fixed = FixPattern::Free;
        let ctx = StepContext {
            residuals: &fixture.residuals,
            jacb: &fixture.jacb,
            jacd: &fixture.jacd,
            delta: &fixture.delta,
            delta_weights: Some(&wd),
            fixed_x: &fixed,
            ssf: &fixture.ssf,
            tt: &fixture.tt,
            n: 1,
            m: 1,
            nq: 1,
            npp: 1,
            epsfcn: 1e-12,
        };
        let mut ws = StepWorkspace::new(1, 1, 1, 1);

        // The Gauss-Newton step has norm 2; force the boundary at 0.5.
        let tau = 0.5;
        let step = find_step(&ctx, &mut ws, tau, 0.0).unwrap();
        match step.kind {
            StepKind::LevenbergMarquardt { .. } => {}
            other => panic!("expected a constrained step, got {:?}", other),
        }
        assert!(step.alpha > 0.0);
        assert!(
            (step.result.pnorm - tau).abs() <= 0.1 * tau,
            "pnorm = {}, tau = {}",
            step.result.pnorm,
            tau
        );
    }
}
