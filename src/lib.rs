//! Align and rescale noisy 1-D spectra onto a reference wavelength grid.
//!
//! The fit works on a single emission line: a [`RescaleModel`] holds a
//! wavelength shift, a flux scale and a smoothing kernel (delta, Gaussian
//! or Gauss-Hermite), and [`metropolis_hastings`] random-walks those
//! parameters to minimize the chi-square against a reference
//! [`EmissionLine`]. The best parameters are then applied to the full
//! candidate spectrum with [`RescaleModel::apply`], which can also
//! propagate the measurement errors through interpolation and convolution
//! into a dense covariance matrix.
//!
//! Accepted states accumulate in a [`Chain`], whose marginals can seed
//! Gaussian priors for a follow-up fit with a richer kernel family.

pub(crate) mod chain;
pub(crate) mod covariance;
pub(crate) mod kernel;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod sampler;
pub(crate) mod spectrum;

pub use chain::{Chain, ChainError};
pub use covariance::interp_convolve_covariance;
pub use kernel::{kernel_for_grid, KernelFamily, ParamName, Params, SHAPE_BOUND};
pub use model::{RescaleError, RescaleModel};
pub use sampler::{fit_or_sentinel, metropolis_hastings, FitResult};
pub use spectrum::{EmissionLine, InterpStyle, Spectrum, SpectrumError};
