use nalgebra::{DMatrix, DVector};

use crate::model::{ModelStop, OdrModel};

/// Number of reliable decimal digits assumed when nothing measurable
/// contradicts it
const NETA_MAX: usize = 15;

/// Estimate the number of reliable decimal digits in the model output
///
/// The model is sampled at five points along a proportional perturbation of
/// `beta` and the responses at the representative row are fitted with a
/// local quadratic; whatever the quadratic cannot explain is taken as the
/// evaluation noise. The window is wide enough that round-off dominates the
/// residual and narrow enough that the cubic term does not.
///
/// Returns `(neta, eta)` with `eta = 10^(-neta)` and `neta >= 2`.
pub fn estimate_function_precision<M: OdrModel>(
    model: &mut M,
    beta: &DVector<f64>,
    xplusd: &DMatrix<f64>,
    fn_current: &DMatrix<f64>,
    nrow: usize,
    typb: &DVector<f64>,
    scratch: &mut DMatrix<f64>,
    nfev: &mut usize,
) -> Result<(usize, f64), ModelStop> {
    let nq = fn_current.ncols();
    let np = beta.len();

    let h = 1.0e-5;
    let offsets = [-2.0, -1.0, 1.0, 2.0];

    // Samples indexed by point (t = -2..2) and response.
    let mut samples = vec![[0.0_f64; 5]; nq];
    for l in 0..nq {
        samples[l][2] = fn_current[(nrow, l)];
    }

    let mut beta_work = beta.clone();
    for (slot, &t) in offsets.iter().enumerate() {
        for k in 0..np {
            let magnitude = beta[k].abs().max(typb[k].abs()).max(1.0);
            beta_work[k] = beta[k] + t * h * magnitude;
        }
        model.evaluate(&beta_work, xplusd, scratch)?;
        *nfev += 1;
        let index = if slot < 2 { slot } else { slot + 1 };
        for l in 0..nq {
            samples[l][index] = scratch[(nrow, l)];
        }
    }

    // Least-squares quadratic over t = -2, -1, 0, 1, 2:
    // with S2 = Σt² = 10 and S4 = Σt⁴ = 34 the normal equations decouple.
    let t_values = [-2.0, -1.0, 0.0, 1.0, 2.0];
    let mut worst_noise = 0.0_f64;
    for l in 0..nq {
        let y = &samples[l];
        let sy: f64 = y.iter().sum();
        let sty: f64 = t_values.iter().zip(y.iter()).map(|(t, v)| t * v).sum();
        let st2y: f64 = t_values
            .iter()
            .zip(y.iter())
            .map(|(t, v)| t * t * v)
            .sum();
        let c2 = (5.0 * st2y - 10.0 * sy) / 70.0;
        let c1 = sty / 10.0;
        let c0 = (34.0 * sy - 10.0 * st2y) / 70.0;

        let mut rss = 0.0;
        for (t, v) in t_values.iter().zip(y.iter()) {
            let p = c0 + c1 * t + c2 * t * t;
            rss += (v - p) * (v - p);
        }
        let rms = (rss / 5.0).sqrt();
        let scale = 1.0 + fn_current[(nrow, l)].abs();
        worst_noise = worst_noise.max(rms / scale);
    }

    let neta = if worst_noise <= 0.0 {
        NETA_MAX
    } else {
        let digits = -worst_noise.log10();
        digits.floor().max(2.0).min(NETA_MAX as f64) as usize
    };

    Ok((neta, 10.0_f64.powi(-(neta as i32))))
}
