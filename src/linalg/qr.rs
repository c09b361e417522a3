use nalgebra::{DMatrix, DVector};

use super::GivensRotation;

/// Householder QR factorization with optional column pivoting
///
/// The reflectors are kept implicitly: after [`PivotedQr::factor`], the
/// upper triangle of the stored matrix holds the strict upper part of `R`,
/// the diagonal of `R` lives in `rdiag`, and the columns at and below the
/// diagonal hold the Householder vectors. `pivot[j]` is the original index
/// of the column sitting at position `j`.
pub struct PivotedQr {
    qr: DMatrix<f64>,
    rdiag: DVector<f64>,
    pivot: Vec<usize>,
}

impl PivotedQr {
    /// Factor `a` (consumed), with column pivoting on the largest remaining
    /// column norm when `pivoting` is set
    pub fn factor(mut a: DMatrix<f64>, pivoting: bool) -> Self {
        let nrows = a.nrows();
        let ncols = a.ncols();
        if nrows < ncols {
            panic!(
                "Dimension mismatch: QR of a {} x {} matrix with fewer rows than columns",
                nrows, ncols
            );
        }

        let mut rdiag = DVector::zeros(ncols);
        let mut pivot: Vec<usize> = (0..ncols).collect();
        for j in 0..ncols {
            rdiag[j] = a.column(j).norm();
        }
        let initial_norms = rdiag.clone();

        for j in 0..ncols {
            if pivoting {
                let mut kmax = j;
                for k in (j + 1)..ncols {
                    if rdiag[k] > rdiag[kmax] {
                        kmax = k;
                    }
                }
                if kmax != j {
                    a.swap_columns(j, kmax);
                    rdiag[kmax] = rdiag[j];
                    pivot.swap(j, kmax);
                }
            }

            // Householder vector for column j.
            let mut ajnorm = 0.0;
            for i in j..nrows {
                ajnorm += a[(i, j)] * a[(i, j)];
            }
            let mut ajnorm = ajnorm.sqrt();
            if ajnorm != 0.0 {
                if a[(j, j)] < 0.0 {
                    ajnorm = -ajnorm;
                }
                for i in j..nrows {
                    a[(i, j)] /= ajnorm;
                }
                a[(j, j)] += 1.0;

                for k in (j + 1)..ncols {
                    let mut sum = 0.0;
                    for i in j..nrows {
                        sum += a[(i, j)] * a[(i, k)];
                    }
                    let temp = sum / a[(j, j)];
                    for i in j..nrows {
                        a[(i, k)] -= temp * a[(i, j)];
                    }
                    if pivoting && rdiag[k] != 0.0 {
                        let temp = a[(j, k)] / rdiag[k];
                        rdiag[k] *= (1.0 - temp * temp).max(0.0).sqrt();
                        // Refresh the downdated norm once it has decayed too far.
                        if 0.05 * (rdiag[k] / initial_norms[pivot[k]].max(f64::MIN_POSITIVE))
                            * (rdiag[k] / initial_norms[pivot[k]].max(f64::MIN_POSITIVE))
                            <= f64::EPSILON
                        {
                            let mut refreshed = 0.0;
                            for i in (j + 1)..nrows {
                                refreshed += a[(i, k)] * a[(i, k)];
                            }
                            rdiag[k] = refreshed.sqrt();
                        }
                    }
                }
            }
            rdiag[j] = -ajnorm;
        }

        PivotedQr { qr: a, rdiag, pivot }
    }

    pub fn ncols(&self) -> usize {
        self.qr.ncols()
    }

    pub fn pivot(&self) -> &[usize] {
        &self.pivot
    }

    /// Apply `Qᵀ` to `v` in place
    pub fn q_transpose_mul(&self, v: &mut DVector<f64>) {
        let nrows = self.qr.nrows();
        let ncols = self.qr.ncols();
        if v.len() != nrows {
            panic!(
                "Dimension mismatch: Qᵀ of length {} applied to a vector of length {}",
                nrows,
                v.len()
            );
        }
        for j in 0..ncols {
            if self.qr[(j, j)] == 0.0 {
                continue;
            }
            let mut sum = 0.0;
            for i in j..nrows {
                sum += self.qr[(i, j)] * v[i];
            }
            let temp = sum / self.qr[(j, j)];
            for i in j..nrows {
                v[i] -= temp * self.qr[(i, j)];
            }
        }
    }

    /// Extract `R` as an explicit `ncols x ncols` upper-triangular matrix
    ///
    /// The step solver mutates this copy (Levenberg rows, rank loop) while
    /// the implicit `Q` stays untouched.
    pub fn upper_triangle(&self) -> DMatrix<f64> {
        let ncols = self.qr.ncols();
        let mut r = DMatrix::zeros(ncols, ncols);
        for j in 0..ncols {
            for i in 0..j {
                r[(i, j)] = self.qr[(i, j)];
            }
            r[(j, j)] = self.rdiag[j];
        }
        r
    }
}

/// Reciprocal condition estimate of the leading `k x k` block of an
/// upper-triangular `R`, along with the index of the largest component of
/// the associated near-null vector
///
/// The estimate is the LINPACK-style growth bound: solve `Rᵀz = e` with the
/// signs of `e` chosen to enlarge `z`, then `Rw = z`; the growth of `w`
/// bounds `‖R⁻¹‖` from below. An exact zero pivot short-circuits to zero
/// with the null vector obtained by back-substitution.
pub fn rcond_estimate(r: &DMatrix<f64>, k: usize) -> (f64, usize) {
    if k == 0 {
        return (1.0, 0);
    }

    // 1-norm of the leading block.
    let mut anorm = 0.0_f64;
    for j in 0..k {
        let mut colsum = 0.0;
        for i in 0..=j {
            colsum += r[(i, j)].abs();
        }
        anorm = anorm.max(colsum);
    }
    if anorm == 0.0 {
        return (0.0, k - 1);
    }

    // Exact singularity: build the null vector directly.
    for j in 0..k {
        if r[(j, j)] == 0.0 {
            let mut x = DVector::zeros(k);
            x[j] = 1.0;
            for i in (0..j).rev() {
                let mut v = -r[(i, j)];
                for p in (i + 1)..j {
                    v -= r[(i, p)] * x[p];
                }
                x[i] = if r[(i, i)] == 0.0 { 0.0 } else { v / r[(i, i)] };
            }
            let mut jmax = 0;
            for i in 0..k {
                if x[i].abs() > x[jmax].abs() {
                    jmax = i;
                }
            }
            return (0.0, jmax);
        }
    }

    // Growth solve Rᵀ z = e.
    let mut z = DVector::zeros(k);
    for i in 0..k {
        let mut s = 0.0;
        for p in 0..i {
            s += r[(p, i)] * z[p];
        }
        let ek = if s >= 0.0 { 1.0 } else { -1.0 };
        z[i] = (ek - s) / r[(i, i)];
    }
    let znorm = z.amax().max(f64::MIN_POSITIVE);
    for i in 0..k {
        z[i] /= znorm;
    }

    // R w = z.
    let mut w = DVector::zeros(k);
    for i in (0..k).rev() {
        let mut v = z[i];
        for p in (i + 1)..k {
            v -= r[(i, p)] * w[p];
        }
        w[i] = v / r[(i, i)];
    }

    let wnorm = w.amax().max(f64::MIN_POSITIVE);
    let mut jmax = 0;
    for i in 0..k {
        if w[i].abs() > w[jmax].abs() {
            jmax = i;
        }
    }
    ((1.0 / anorm) / wnorm, jmax)
}

/// Move column `j` of the leading `k`-block to position `k - 1` and restore
/// the triangular form of `r`
///
/// The left-circular shift makes columns `j..k-1` upper Hessenberg; the
/// subdiagonal is chased out with Givens rotations applied to the rows of
/// `r` and, simultaneously, to the transformed right-hand side `qtb`, so
/// the factorization stays consistent without touching `Q` itself. `pivot`
/// is rotated along with the columns.
pub fn remove_column(
    r: &mut DMatrix<f64>,
    qtb: &mut DVector<f64>,
    pivot: &mut [usize],
    j: usize,
    k: usize,
) {
    let ncols = r.ncols();
    if j + 1 >= k {
        return;
    }

    // Left-circular shift of columns j..k within the full column range so
    // trailing (already-removed) columns keep their contents.
    let moved: Vec<f64> = (0..r.nrows()).map(|i| r[(i, j)]).collect();
    for p in j..(k - 1) {
        for i in 0..r.nrows() {
            r[(i, p)] = r[(i, p + 1)];
        }
    }
    for i in 0..r.nrows() {
        r[(i, k - 1)] = moved[i];
    }
    let moved_piv = pivot[j];
    for p in j..(k - 1) {
        pivot[p] = pivot[p + 1];
    }
    pivot[k - 1] = moved_piv;

    // Chase the subdiagonal created in columns j..k-1.
    for p in j..(k - 1) {
        let (rot, rr) = GivensRotation::compute(r[(p, p)], r[(p + 1, p)]);
        r[(p, p)] = rr;
        r[(p + 1, p)] = 0.0;
        for q in (p + 1)..ncols {
            let (x, y) = rot.apply(r[(p, q)], r[(p + 1, q)]);
            r[(p, q)] = x;
            r[(p + 1, q)] = y;
        }
        let (bx, by) = rot.apply(qtb[p], qtb[p + 1]);
        qtb[p] = bx;
        qtb[p + 1] = by;
    }
}
