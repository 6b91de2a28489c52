//! The rescaling model: forward transform and likelihood.
//!
//! A [`RescaleModel`] owns a reference emission line and a parameter vector
//! (wavelength shift, flux scale and, depending on the kernel family, the
//! smoothing-kernel width and Gauss-Hermite shape terms). It can apply the
//! transform to any spectrum and score how well the transformed candidate
//! matches the reference, either against the data errors alone or against
//! the full propagated covariance matrix.

use std::collections::HashMap;

use faer::linalg::solvers::Solve;
use faer::{Mat, Side};
use itertools::izip;
use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

use crate::chain::{Chain, ChainError};
use crate::covariance::interp_convolve_covariance;
use crate::kernel::{kernel_for_grid, KernelFamily, ParamName, Params, SHAPE_BOUND};
use crate::math::{convolve_same, percentile};
use crate::spectrum::{EmissionLine, Spectrum};

/// Fraction of the overlap region trimmed from each edge before the
/// chi-square sum. Fixed so the degrees of freedom do not drift as the
/// shift parameter changes the overlap.
const EDGE_TRIM_FRACTION: f64 = 0.05;

#[derive(Error, Debug)]
pub enum RescaleError {
    #[error("unknown kernel family '{0}' (expected Delta, Gauss or Hermite)")]
    UnknownKernelFamily(String),
    #[error("covariance matrix is singular; cannot evaluate the weighted chi-square")]
    SingularCovariance,
    #[error("no usable wavelength overlap between reference and shifted spectrum")]
    NoOverlap,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

type PriorFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// Parametric transform (shift, interpolate, convolve, scale) fitted
/// against a reference emission line.
pub struct RescaleModel {
    reference: EmissionLine,
    family: KernelFamily,
    params: Params,
    priors: HashMap<ParamName, PriorFn>,
    use_covariance: bool,
}

/// Result of running the forward transform onto some grid.
struct Transformed {
    /// Half-open index range of the target grid covered by the shifted
    /// input.
    lo: usize,
    hi: usize,
    flux: Vec<f64>,
    err: Vec<f64>,
    covar: Option<Mat<f64>>,
}

impl RescaleModel {
    /// A model that will align candidates to `reference`. Priors start out
    /// empty; parameters start at the family defaults.
    pub fn new(reference: EmissionLine, family: KernelFamily, use_covariance: bool) -> Self {
        let params = family.initial_params(reference.pixel_size());
        Self {
            reference,
            family,
            params,
            priors: HashMap::new(),
            use_covariance,
        }
    }

    pub fn family(&self) -> KernelFamily {
        self.family
    }

    pub fn params(&self) -> Params {
        self.params
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn reference(&self) -> &EmissionLine {
        &self.reference
    }

    pub fn use_covariance(&self) -> bool {
        self.use_covariance
    }

    /// Perturb every live parameter with a zero-mean Gaussian step of its
    /// fixed scale. The proposal is a fresh value; `current` is untouched.
    pub fn propose<R: Rng + ?Sized>(&self, current: &Params, rng: &mut R) -> Params {
        let mut out = *current;
        for &name in self.family.param_names() {
            let eps: f64 = rng.sample(StandardNormal);
            out.set(name, current.get(name) + self.family.step_scale(name) * eps);
        }
        out
    }

    /// Negative log likelihood of the model's current parameters against a
    /// candidate emission line.
    pub fn evaluate(&self, line: &EmissionLine) -> Result<f64, RescaleError> {
        self.evaluate_at(&self.params, line)
    }

    /// Negative log likelihood at an explicit parameter vector.
    ///
    /// Out-of-bounds parameters (undersampled width, |h3| or |h4| beyond
    /// the shape bound) yield `+inf` rather than an error, so the sampler
    /// rejects them without special-casing.
    pub fn evaluate_at(&self, params: &Params, line: &EmissionLine) -> Result<f64, RescaleError> {
        if self.out_of_bounds(params) {
            return Ok(f64::INFINITY);
        }

        let reference = self.reference.spectrum();
        let t = self.transform_onto(params, line.spectrum(), &reference.wv, self.use_covariance)?;

        let n = t.hi - t.lo;
        let trim = (EDGE_TRIM_FRACTION * n as f64).round() as usize;
        if n <= 2 * trim + 1 {
            return Err(RescaleError::NoOverlap);
        }

        let ref_flux = &reference.f[t.lo + trim..t.hi - trim];
        let ref_err = &reference.ef[t.lo + trim..t.hi - trim];
        let flux = &t.flux[trim..n - trim];
        let err = &t.err[trim..n - trim];

        let mut chi2: f64 = match &t.covar {
            Some(covar) => {
                // reference errors are independent of the transform, so they
                // only touch the diagonal
                let m = flux.len();
                let trimmed = Mat::from_fn(m, m, |i, j| {
                    let mut v = covar[(i + trim, j + trim)];
                    if i == j {
                        v += ref_err[i] * ref_err[i];
                    }
                    v
                });
                let residual = Mat::from_fn(m, 1, |i, _| ref_flux[i] - flux[i]);
                let llt = trimmed
                    .llt(Side::Lower)
                    .map_err(|_| RescaleError::SingularCovariance)?;
                let weighted = llt.solve(&residual);
                (0..m).map(|i| residual[(i, 0)] * weighted[(i, 0)]).sum()
            }
            None => izip!(flux, err, ref_flux, ref_err)
                .map(|(y, z, rf, re)| (rf - y).powi(2) / (re * re + z * z))
                .sum(),
        };

        for (&name, prior) in &self.priors {
            chi2 += -2.0 * prior(params.get(name)).ln();
        }
        Ok(chi2)
    }

    /// Apply the current parameters to a full spectrum, producing the
    /// aligned and rescaled output on the overlapping part of the input's
    /// own grid, a validity mask over that grid and, on request, the
    /// propagated covariance matrix.
    pub fn apply(
        &self,
        spectrum: &Spectrum,
        with_covariance: bool,
    ) -> Result<(Spectrum, Vec<bool>, Option<Mat<f64>>), RescaleError> {
        let t = self.transform_onto(&self.params, spectrum, &spectrum.wv, with_covariance)?;
        let out = Spectrum::new(spectrum.wv[t.lo..t.hi].to_vec(), t.flux, t.err)
            .map_err(|_| RescaleError::NoOverlap)?;
        let mut mask = vec![false; spectrum.len()];
        for m in &mut mask[t.lo..t.hi] {
            *m = true;
        }
        Ok((out, mask, t.covar))
    }

    /// Shift, resample onto `grid`, convolve and scale. The covariance, if
    /// requested, is built before the flux-error smoothing because
    /// convolving squared errors is only the diagonal approximation.
    fn transform_onto(
        &self,
        params: &Params,
        source: &Spectrum,
        grid: &[f64],
        with_covariance: bool,
    ) -> Result<Transformed, RescaleError> {
        // the candidate is interpreted as shifted: its wavelengths move by
        // -shift while the target grid stays fixed
        let shifted_first = source.wv[0] - params.shift;
        let shifted_last = source.wv[source.len() - 1] - params.shift;
        let lo = grid.partition_point(|&w| w < shifted_first);
        let hi = grid.partition_point(|&w| w <= shifted_last);
        if hi.saturating_sub(lo) < 3 {
            return Err(RescaleError::NoOverlap);
        }

        let window = &grid[lo..hi];
        let query: Vec<f64> = window.iter().map(|&w| w + params.shift).collect();
        let (flux, err) = source.interp(&query);

        let kernel = kernel_for_grid(self.family, window, params);

        let covar = with_covariance.then(|| {
            let shifted: Vec<f64> = source.wv.iter().map(|w| w - params.shift).collect();
            let breakwidth = self.family.breakwidth(params.width, window[1] - window[0]);
            let mut covar =
                interp_convolve_covariance(&shifted, window, &source.ef, &kernel, breakwidth);
            let s2 = params.scale * params.scale;
            for i in 0..covar.nrows() {
                for j in 0..covar.ncols() {
                    covar[(i, j)] *= s2;
                }
            }
            covar
        });

        let flux = convolve_same(&flux, &kernel);
        let kernel_sq: Vec<f64> = kernel.iter().map(|k| k * k).collect();
        let var: Vec<f64> = err.iter().map(|z| z * z).collect();
        let err = convolve_same(&var, &kernel_sq);

        let flux = flux.into_iter().map(|y| y * params.scale).collect();
        let err = err
            .into_iter()
            .map(|v| v.sqrt() * params.scale)
            .collect();

        Ok(Transformed {
            lo,
            hi,
            flux,
            err,
            covar,
        })
    }

    fn out_of_bounds(&self, params: &Params) -> bool {
        if let Some(floor) = self.family.width_floor(self.reference.pixel_size()) {
            if params.width < floor {
                return true;
            }
        }
        if self.family == KernelFamily::Hermite
            && (params.h3.abs() > SHAPE_BOUND || params.h4.abs() > SHAPE_BOUND)
        {
            return true;
        }
        false
    }

    /// Register a Gaussian prior derived from a chain's marginal
    /// distribution of one parameter: mean at the median, sigma at half the
    /// 16th-to-84th percentile span, after discarding the first `burn`
    /// fraction of the chain. Also recenters the model's parameter at the
    /// median. Replaces any existing prior on that parameter.
    pub fn prior_from_chain(
        &mut self,
        chain: &Chain,
        name: ParamName,
        burn: f64,
    ) -> Result<(), ChainError> {
        let marginal = chain.column_after_burn(name.as_str(), burn)?;
        let c16 = percentile(&marginal, 16.0);
        let median = percentile(&marginal, 50.0);
        let c84 = percentile(&marginal, 84.0);
        let sigma = (c84 - c16) / 2.0;
        self.priors.insert(
            name,
            Box::new(move |x| (-0.5 * (x - median).powi(2) / (sigma * sigma)).exp()),
        );
        self.params.set(name, median);
        Ok(())
    }

    /// Register an arbitrary prior density for one parameter. Replaces any
    /// existing prior on that parameter.
    pub fn prior_fn<F>(&mut self, name: ParamName, prior: F)
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.priors.insert(name, Box::new(prior));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gaussian_line(center: f64, width: f64, amp: f64, noise: f64) -> Spectrum {
        let wv: Vec<f64> = (0..60).map(|i| 4980.0 + i as f64).collect();
        let f: Vec<f64> = wv
            .iter()
            .map(|w| amp * (-0.5 * (w - center).powi(2) / (width * width)).exp())
            .collect();
        let ef = vec![noise; wv.len()];
        Spectrum::new(wv, f, ef).unwrap()
    }

    fn line(spec: &Spectrum) -> EmissionLine {
        EmissionLine::extract(spec, (4990.0, 5030.0), [(4980.0, 4988.0), (5032.0, 5039.0)])
            .unwrap()
    }

    #[test]
    fn delta_apply_is_pure_shift_and_scale() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let reference = line(&spec);
        let mut model = RescaleModel::new(reference, KernelFamily::Delta, false);
        let mut p = model.params();
        p.shift = 0.0;
        p.scale = 0.5;
        model.set_params(p);

        let (out, mask, covar) = model.apply(&spec, false).unwrap();
        assert!(covar.is_none());
        assert_eq!(mask.iter().filter(|&&m| m).count(), out.len());
        for (y, y0) in out.f.iter().zip(spec.f.iter()) {
            assert_abs_diff_eq!(*y, 0.5 * y0, epsilon = 1e-12);
        }
        for (z, z0) in out.ef.iter().zip(spec.ef.iter()) {
            assert_abs_diff_eq!(*z, 0.5 * z0, epsilon = 1e-12);
        }
    }

    #[test]
    fn perfect_match_scores_near_zero() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let reference = line(&spec);
        let candidate = line(&spec);
        let mut model = RescaleModel::new(reference, KernelFamily::Delta, false);
        let mut p = model.params();
        p.shift = 0.0;
        model.set_params(p);
        let chi2 = model.evaluate(&candidate).unwrap();
        assert!(chi2 < 1e-10, "identical spectra must have chi2 ~ 0, got {chi2}");
    }

    #[test]
    fn undersampled_width_is_infinitely_unlikely() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let model = RescaleModel::new(line(&spec), KernelFamily::Gauss, false);
        let mut p = model.params();
        p.width = 0.1;
        assert!(model.evaluate_at(&p, &line(&spec)).unwrap().is_infinite());
    }

    #[test]
    fn out_of_bounds_shape_parameter_is_infinitely_unlikely() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let model = RescaleModel::new(line(&spec), KernelFamily::Hermite, false);
        let mut p = model.params();
        p.width = 2.0;
        p.h3 = 0.5;
        assert!(model.evaluate_at(&p, &line(&spec)).unwrap().is_infinite());
        p.h3 = 0.0;
        p.h4 = -0.31;
        assert!(model.evaluate_at(&p, &line(&spec)).unwrap().is_infinite());
    }

    #[test]
    fn initial_width_passes_the_floor_check() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        for family in [KernelFamily::Gauss, KernelFamily::Hermite] {
            let model = RescaleModel::new(line(&spec), family, false);
            let chi2 = model.evaluate(&line(&spec)).unwrap();
            assert!(chi2.is_finite(), "{family} starting point must be evaluable");
        }
    }

    #[test]
    fn covariance_mode_agrees_with_fast_mode_for_delta() {
        // with a delta kernel the covariance is diagonal, so both likelihood
        // formulas reduce to the same sum
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let shifted = {
            let wv: Vec<f64> = spec.wv.iter().map(|w| w + 0.3).collect();
            Spectrum::new(wv, spec.f.clone(), spec.ef.clone()).unwrap()
        };
        let candidate =
            EmissionLine::extract(&shifted, (4990.0, 5030.0), [(4980.0, 4988.0), (5032.0, 5039.0)])
                .unwrap();

        let fast = RescaleModel::new(line(&spec), KernelFamily::Delta, false);
        let full = RescaleModel::new(line(&spec), KernelFamily::Delta, true);
        let chi2_fast = fast.evaluate(&candidate).unwrap();
        let chi2_full = full.evaluate(&candidate).unwrap();
        assert_abs_diff_eq!(chi2_fast, chi2_full, epsilon = 1e-6 * chi2_fast.abs().max(1.0));
    }

    #[test]
    fn analytic_prior_shifts_the_likelihood() {
        let spec = gaussian_line(5007.0, 3.0, 10.0, 0.2);
        let candidate = line(&spec);
        let mut model = RescaleModel::new(line(&spec), KernelFamily::Delta, false);
        let base = model.evaluate(&candidate).unwrap();
        // a prior of density one at the current shift adds nothing
        model.prior_fn(ParamName::Shift, |_| 1.0);
        assert_abs_diff_eq!(model.evaluate(&candidate).unwrap(), base, epsilon = 1e-12);
        // a prior of density < 1 penalizes
        model.prior_fn(ParamName::Shift, |_| 0.5);
        assert!(model.evaluate(&candidate).unwrap() > base);
    }
}
