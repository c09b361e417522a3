//! Automatic scaling and finite-difference step defaults
//!
//! When the caller does not provide typical magnitudes for `beta` and
//! `delta`, they are derived from the data: the scale of a non-zero value is
//! its own magnitude, zero values borrow the largest magnitude of their
//! group, and an all-zero group falls back to unit scale.

use nalgebra::{DMatrix, DVector};

/// Default scale factors for the parameters
pub fn default_beta_scales(beta: &DVector<f64>) -> DVector<f64> {
    let bigmax = beta.amax();
    let mut scales = DVector::from_element(beta.len(), 1.0);
    if bigmax == 0.0 {
        return scales;
    }
    for k in 0..beta.len() {
        scales[k] = if beta[k] != 0.0 {
            1.0 / beta[k].abs()
        } else {
            1.0 / bigmax
        };
    }
    scales
}

/// Default per-column scale factors for the deltas, derived from `x`
pub fn default_delta_scales(x: &DMatrix<f64>) -> DMatrix<f64> {
    let (n, m) = (x.nrows(), x.ncols());
    let mut scales = DMatrix::from_element(n, m, 1.0);
    for j in 0..m {
        let mut colmax = 0.0_f64;
        for i in 0..n {
            colmax = colmax.max(x[(i, j)].abs());
        }
        if colmax == 0.0 {
            continue;
        }
        for i in 0..n {
            scales[(i, j)] = if x[(i, j)] != 0.0 {
                1.0 / x[(i, j)].abs()
            } else {
                1.0 / colmax
            };
        }
    }
    scales
}

/// Default relative finite-difference step for a function accurate to
/// `neta` digits
///
/// Forward differences use `η^(1/2)`, central differences `η^(1/3)`, with
/// `η = 10^(-neta)`.
pub fn default_relative_step(neta: usize, central: bool) -> f64 {
    let eta = 10.0_f64.powi(-(neta as i32));
    if central {
        eta.powf(1.0 / 3.0)
    } else {
        eta.sqrt()
    }
}

/// Absolute perturbation for one value
///
/// `typical` is the magnitude floor (the inverse scale of the component),
/// so zero-valued components still receive a usable step. The step is
/// clamped so the perturbed value is representable as distinct from the
/// base.
pub fn perturbation(value: f64, relative_step: f64, typical: f64) -> f64 {
    let magnitude = value.abs().max(typical.abs()).max(f64::MIN_POSITIVE.sqrt());
    let mut h = relative_step * magnitude;
    if value < 0.0 {
        h = -h;
    }
    if value + h == value {
        h = if value >= 0.0 {
            relative_step.max(f64::EPSILON)
        } else {
            -relative_step.max(f64::EPSILON)
        };
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_beta_gets_unit_scales() {
        let scales = default_beta_scales(&DVector::zeros(3));
        assert!(scales.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn nonzero_beta_scaled_to_unit_magnitude() {
        let beta = DVector::from_vec(vec![10.0, 0.0, -0.5]);
        let scales = default_beta_scales(&beta);
        assert_eq!(scales[0], 0.1);
        assert_eq!(scales[1], 0.1);
        assert_eq!(scales[2], 2.0);
    }

    #[test]
    fn delta_scales_follow_columns() {
        let x = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 0.0]);
        let scales = default_delta_scales(&x);
        assert_eq!(scales[(0, 0)], 0.5);
        assert_eq!(scales[(1, 0)], 0.5);
        assert_eq!(scales[(0, 1)], 1.0);
        assert_eq!(scales[(1, 1)], 1.0);
    }

    #[test]
    fn perturbation_never_vanishes() {
        let h = perturbation(0.0, 1e-8, 1.0);
        assert_eq!(h, 1e-8);
        let v = 3.0e-200;
        let h = perturbation(v, 1e-8, 0.0);
        assert!(v + h != v);
    }
}
