//! Covariance propagation through interpolation and convolution.
//!
//! Resampling a noisy signal onto a new grid correlates neighboring output
//! pixels, and convolving with a smoothing kernel mixes those correlations
//! across the kernel support. This module produces the resulting dense
//! covariance matrix, following the quadratic-form construction of Gardner
//! (2003), "Uncertainties in Interpolated Spectral Data", eq. 6.

use faer::Mat;
use rayon::prelude::*;

use crate::math::searchsorted;

/// Covariance of linear interpolation, stored as a tridiagonal band.
///
/// Linear interpolation correlates only adjacent output samples that share
/// a source pixel, so one off-diagonal band is exact.
struct InterpCovariance {
    diag: Vec<f64>,
    band: Vec<f64>,
}

impl InterpCovariance {
    fn new(x: &[f64], x_interp: &[f64], z: &[f64]) -> Self {
        let n = x_interp.len();
        let mut diag = Vec::with_capacity(n);
        let mut band = Vec::with_capacity(n.saturating_sub(1));
        let mut weights = Vec::with_capacity(n);
        let mut upper = Vec::with_capacity(n);
        for &q in x_interp {
            let i = searchsorted(x, q).clamp(1, x.len() - 1);
            let f = (q - x[i - 1]) / (x[i] - x[i - 1]);
            diag.push(f * f * z[i] * z[i] + (1.0 - f) * (1.0 - f) * z[i - 1] * z[i - 1]);
            weights.push(f);
            upper.push(i);
        }
        for t in 0..n.saturating_sub(1) {
            // neighbors correlate through the shared source pixel
            let f = weights[t];
            let zi = z[upper[t]];
            band.push(f * (1.0 - f) * zi * zi);
        }
        Self { diag, band }
    }

    /// The quadratic form `a' C b` for two kernel rows, using the band
    /// structure: O(n) instead of a dense matrix-vector product.
    fn quadratic_form(&self, a: &[f64], b: &[f64]) -> f64 {
        let n = self.diag.len();
        let mut acc = 0f64;
        for m in 0..n {
            let mut cb = self.diag[m] * b[m];
            if m + 1 < n {
                cb += self.band[m] * b[m + 1];
            }
            if m > 0 {
                cb += self.band[m - 1] * b[m - 1];
            }
            acc += a[m] * cb;
        }
        acc
    }
}

/// Full covariance matrix of a signal with per-pixel errors `z` on the grid
/// `x`, linearly interpolated onto `x_interp` and then convolved with
/// `kernel` in centered "same" mode.
///
/// `breakwidth` bounds how many output-pixel lags are computed before the
/// kernel overlap is assumed to vanish; it must be generous enough to cover
/// the kernel support. Off-lag pairs are left at zero, which keeps the cost
/// at O(n * breakwidth) quadratic forms instead of O(n^2).
pub fn interp_convolve_covariance(
    x: &[f64],
    x_interp: &[f64],
    z: &[f64],
    kernel: &[f64],
    breakwidth: usize,
) -> Mat<f64> {
    let n = x_interp.len();
    let interp = InterpCovariance::new(x, x_interp, z);

    // a delta kernel mixes nothing, so only the interpolation variances
    // survive
    if kernel.len() == 1 {
        return Mat::from_fn(n, n, |i, j| if i == j { interp.diag[i] } else { 0.0 });
    }

    let wrapped = wrap_center(kernel, n);
    let cent = n / 2;

    // rows are independent, write-once work items
    let rows: Vec<(usize, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let ki = rolled_truncated(&wrapped, cent, i);
            let vals = (i..(i + breakwidth).min(n))
                .map(|j| {
                    let kj = rolled_truncated(&wrapped, cent, j);
                    interp.quadratic_form(&ki, &kj)
                })
                .collect();
            (i, vals)
        })
        .collect();

    let mut covar: Mat<f64> = Mat::zeros(n, n);
    for (i, vals) in rows {
        for (off, val) in vals.into_iter().enumerate() {
            let j = i + off;
            covar[(i, j)] = val;
            covar[(j, i)] = val;
        }
    }
    covar
}

/// Pad the kernel with zeros to the output length, then rotate so the
/// central tap sits at index zero. Row `i` of the convolution matrix is
/// this vector rolled by `i`.
fn wrap_center(kernel: &[f64], n: usize) -> Vec<f64> {
    let mut k = Vec::with_capacity(n);
    if kernel.len() < n {
        k.push(0.0);
    }
    k.extend_from_slice(kernel);
    while k.len() < n {
        k.push(0.0);
    }
    debug_assert_eq!(k.len(), n);
    let cent = n / 2;
    k.rotate_left(cent);
    k
}

/// The wrapped kernel rolled to output position `i`, with the taps that
/// would wrap past the signal edge zeroed out (the convolution matrix is
/// banded, not circulant).
fn rolled_truncated(wrapped: &[f64], cent: usize, i: usize) -> Vec<f64> {
    let n = wrapped.len();
    let mut row = wrapped.to_vec();
    row.rotate_right(i % n);
    let trim = cent + i;
    if trim <= n {
        for v in &mut row[trim..] {
            *v = 0.0;
        }
    } else {
        for v in &mut row[..trim - n] {
            *v = 0.0;
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn grids(n: usize) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let xi: Vec<f64> = (0..n - 1).map(|i| i as f64 + 0.25).collect();
        (x, xi)
    }

    fn gauss_kernel(len: usize, pixwidth: f64) -> Vec<f64> {
        let half = (len / 2) as i64;
        let mut k: Vec<f64> = (-half..=half)
            .map(|p| (-0.5 * (p * p) as f64 / (pixwidth * pixwidth)).exp())
            .collect();
        let sum: f64 = k.iter().sum();
        for v in &mut k {
            *v /= sum;
        }
        k
    }

    #[test]
    fn delta_kernel_gives_pure_interpolation_variance() {
        let (x, xi) = grids(12);
        let z = vec![0.3; 12];
        let covar = interp_convolve_covariance(&x, &xi, &z, &[1.0], 2);
        for i in 0..xi.len() {
            let expected = 0.25f64.powi(2) * 0.09 + 0.75f64.powi(2) * 0.09;
            assert_abs_diff_eq!(covar[(i, i)], expected, epsilon = 1e-12);
            for j in 0..xi.len() {
                if i != j {
                    assert_eq!(covar[(i, j)], 0.0);
                }
            }
        }
    }

    #[test]
    fn smoothing_produces_positive_neighbor_covariance() {
        let (x, xi) = grids(30);
        let z = vec![0.5; 30];
        let k = gauss_kernel(9, 1.5);
        let covar = interp_convolve_covariance(&x, &xi, &z, &k, 10);
        assert!(covar[(14, 14)] > 0.0);
        assert!(covar[(14, 15)] > 0.0);
        assert!(covar[(14, 15)] < covar[(14, 14)]);
    }

    #[test]
    fn smoothing_reduces_the_diagonal_variance() {
        // averaging uncorrelated pixels must shrink the per-pixel variance
        let (x, xi) = grids(40);
        let z = vec![1.0; 40];
        let k = gauss_kernel(11, 2.0);
        let covar = interp_convolve_covariance(&x, &xi, &z, &k, 15);
        let plain = interp_convolve_covariance(&x, &xi, &z, &[1.0], 2);
        assert!(covar[(20, 20)] < plain[(20, 20)]);
    }

    proptest! {
        #[test]
        fn covariance_is_symmetric(
            errs in prop::collection::vec(0.01f64..2.0, 25),
            pixwidth in 0.6f64..3.0,
        ) {
            let (x, xi) = grids(25);
            let k = gauss_kernel(7, pixwidth);
            let covar = interp_convolve_covariance(&x, &xi, &errs, &k, 12);
            for i in 0..xi.len() {
                for j in 0..xi.len() {
                    prop_assert!((covar[(i, j)] - covar[(j, i)]).abs() < 1e-12);
                }
            }
        }
    }
}
