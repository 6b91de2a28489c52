use multiversion::multiversion;

/// Index of the first element of `x` that is `>= v`, assuming `x` is sorted
/// ascending. Matches the "left" convention of a sorted insertion search.
#[inline]
pub(crate) fn searchsorted(x: &[f64], v: f64) -> usize {
    x.partition_point(|&a| a < v)
}

/// Discrete convolution truncated to the input length, with the kernel
/// centered ("same" mode). The kernel must have odd length.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd");
    let n = signal.len();
    let half = kernel.len() / 2;
    let mut out = vec![0f64; n];
    for (i, out) in out.iter_mut().enumerate() {
        let lo = i.saturating_sub(half);
        let hi = (i + half).min(n - 1);
        let mut acc = 0f64;
        for j in lo..=hi {
            acc += signal[j] * kernel[i + half - j];
        }
        *out = acc;
    }
    out
}

/// Percentile of `values` with linear interpolation between order
/// statistics, `q` in percent.
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    assert!(!values.is_empty());
    assert!((0.0..=100.0).contains(&q));
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let t = pos - lo as f64;
        (1.0 - t) * sorted[lo] + t * sorted[hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn searchsorted_finds_bracketing_interval() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(searchsorted(&x, 0.5), 0);
        assert_eq!(searchsorted(&x, 1.0), 0);
        assert_eq!(searchsorted(&x, 2.5), 2);
        assert_eq!(searchsorted(&x, 4.0), 3);
        assert_eq!(searchsorted(&x, 5.0), 4);
    }

    #[test]
    fn convolve_with_unit_kernel_is_identity() {
        let signal = [1.0, -2.0, 3.5, 0.25];
        let out = convolve_same(&signal, &[1.0]);
        assert_eq!(out, signal);
    }

    #[test]
    fn convolve_matches_direct_sum() {
        let signal = [1.0, 2.0, 3.0, 4.0, 5.0];
        let kernel = [0.25, 0.5, 0.25];
        let out = convolve_same(&signal, &kernel);
        // interior points are full three-term averages
        assert_abs_diff_eq!(out[1], 0.25 * 1.0 + 0.5 * 2.0 + 0.25 * 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[2], 0.25 * 2.0 + 0.5 * 3.0 + 0.25 * 4.0, epsilon = 1e-12);
        // edges drop the out-of-range term
        assert_abs_diff_eq!(out[0], 0.5 * 1.0 + 0.25 * 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[4], 0.25 * 4.0 + 0.5 * 5.0, epsilon = 1e-12);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_abs_diff_eq!(percentile(&v, 0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&v, 100.0), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&v, 50.0), 2.5, epsilon = 1e-12);
    }
}
