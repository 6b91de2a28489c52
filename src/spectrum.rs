//! Spectrum containers and resampling.
//!
//! A [`Spectrum`] is the basic flux-versus-wavelength record with one-sigma
//! flux errors per pixel. An [`EmissionLine`] is a windowed cutout around a
//! single spectral feature, kept together with the window bookkeeping of the
//! extraction. Only linear interpolation propagates the flux errors exactly;
//! the sinc style resamples flux with higher fidelity but falls back to the
//! linear rule for the error estimate.

use thiserror::Error;

use crate::math::searchsorted;

/// Half-width, in pixels, of the truncated sinc resampling stencil.
const SINC_SUPPORT: i64 = 10;

#[derive(Error, Debug)]
pub enum SpectrumError {
    #[error("wavelength, flux and error arrays must have equal lengths")]
    MismatchedLengths,
    #[error("wavelength array must be strictly increasing")]
    NonMonotonicWavelength,
    #[error("spectrum must contain at least two pixels")]
    TooShort,
    #[error("window [{0}, {1}] selects no pixels")]
    EmptyWindow(f64, f64),
}

/// How [`Spectrum::interp`] resamples between pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpStyle {
    /// Piecewise-linear. The only style with exact error propagation.
    #[default]
    Linear,
    /// Truncated normalized-sinc sum. Flux only; errors use the linear rule.
    Sinc,
}

/// A 1-D spectrum: flux and one-sigma error sampled on a strictly
/// increasing wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub wv: Vec<f64>,
    pub f: Vec<f64>,
    pub ef: Vec<f64>,
    style: InterpStyle,
}

impl Spectrum {
    pub fn new(wv: Vec<f64>, f: Vec<f64>, ef: Vec<f64>) -> Result<Self, SpectrumError> {
        if wv.len() != f.len() || wv.len() != ef.len() {
            return Err(SpectrumError::MismatchedLengths);
        }
        if wv.len() < 2 {
            return Err(SpectrumError::TooShort);
        }
        if wv.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpectrumError::NonMonotonicWavelength);
        }
        Ok(Self {
            wv,
            f,
            ef,
            style: InterpStyle::default(),
        })
    }

    pub fn with_style(mut self, style: InterpStyle) -> Self {
        self.style = style;
        self
    }

    pub fn set_style(&mut self, style: InterpStyle) {
        self.style = style;
    }

    pub fn style(&self) -> InterpStyle {
        self.style
    }

    pub fn len(&self) -> usize {
        self.wv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wv.is_empty()
    }

    /// Grid spacing taken from the first pixel pair. The grid is assumed
    /// uniform wherever the spacing matters (kernels, covariance lags).
    pub fn pixel_size(&self) -> f64 {
        self.wv[1] - self.wv[0]
    }

    /// Resample flux and one-sigma error at the points `x`, which must lie
    /// within the wavelength range of the spectrum.
    pub fn interp(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        match self.style {
            InterpStyle::Linear => self.interp_linear(x),
            InterpStyle::Sinc => self.interp_sinc(x),
        }
    }

    fn interp_linear(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut flux = Vec::with_capacity(x.len());
        let mut err = Vec::with_capacity(x.len());
        for &q in x {
            let (i, t) = self.bracket(q);
            flux.push((1.0 - t) * self.f[i - 1] + t * self.f[i]);
            let var = (1.0 - t).powi(2) * self.ef[i - 1].powi(2) + t.powi(2) * self.ef[i].powi(2);
            err.push(var.sqrt());
        }
        (flux, err)
    }

    fn interp_sinc(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let dx = self.pixel_size();
        let mut flux = Vec::with_capacity(x.len());
        let mut err = Vec::with_capacity(x.len());
        for &q in x {
            let (i, t) = self.bracket(q);
            let center = i as i64 - 1;
            let lo = (center - SINC_SUPPORT).max(0) as usize;
            let hi = ((center + SINC_SUPPORT) as usize).min(self.len() - 1);
            let mut acc = 0f64;
            let mut wsum = 0f64;
            for j in lo..=hi {
                let w = sinc((q - self.wv[j]) / dx);
                acc += w * self.f[j];
                wsum += w;
            }
            flux.push(acc / wsum);
            // errors keep the linear rule; exact propagation would need the
            // full stencil covariance
            let var = (1.0 - t).powi(2) * self.ef[i - 1].powi(2) + t.powi(2) * self.ef[i].powi(2);
            err.push(var.sqrt());
        }
        (flux, err)
    }

    /// Upper bracketing index and interpolation weight for a query point.
    /// Clamped so that `q` at or before the first pixel uses the first
    /// interval with weight zero.
    fn bracket(&self, q: f64) -> (usize, f64) {
        let i = searchsorted(&self.wv, q).clamp(1, self.len() - 1);
        let t = (q - self.wv[i - 1]) / (self.wv[i] - self.wv[i - 1]);
        (i, t)
    }
}

fn sinc(t: f64) -> f64 {
    if t.abs() < 1e-12 {
        1.0
    } else {
        let p = std::f64::consts::PI * t;
        p.sin() / p
    }
}

/// A continuum-free cutout of a spectrum around one emission line.
///
/// The cutout assumes the local continuum has already been removed; the
/// line window and the two flanking continuum windows used for that removal
/// are carried along for bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionLine {
    spec: Spectrum,
    line_window: (f64, f64),
    continuum_windows: [(f64, f64); 2],
}

impl EmissionLine {
    /// Cut the line window out of a continuum-subtracted spectrum.
    pub fn extract(
        spec: &Spectrum,
        line_window: (f64, f64),
        continuum_windows: [(f64, f64); 2],
    ) -> Result<Self, SpectrumError> {
        let lo = searchsorted(&spec.wv, line_window.0);
        let hi = searchsorted(&spec.wv, line_window.1);
        if hi.saturating_sub(lo) < 2 {
            return Err(SpectrumError::EmptyWindow(line_window.0, line_window.1));
        }
        let cut = Spectrum::new(
            spec.wv[lo..hi].to_vec(),
            spec.f[lo..hi].to_vec(),
            spec.ef[lo..hi].to_vec(),
        )?
        .with_style(spec.style);
        Ok(Self {
            spec: cut,
            line_window,
            continuum_windows,
        })
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spec
    }

    pub fn set_style(&mut self, style: InterpStyle) {
        self.spec.set_style(style);
    }

    pub fn line_window(&self) -> (f64, f64) {
        self.line_window
    }

    pub fn continuum_windows(&self) -> [(f64, f64); 2] {
        self.continuum_windows
    }

    pub fn wv(&self) -> &[f64] {
        &self.spec.wv
    }

    pub fn flux(&self) -> &[f64] {
        &self.spec.f
    }

    pub fn err(&self) -> &[f64] {
        &self.spec.ef
    }

    pub fn pixel_size(&self) -> f64 {
        self.spec.pixel_size()
    }
}
