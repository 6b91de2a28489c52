//! Smoothing-kernel families and their parameter sets.
//!
//! Each family is a closed enum variant that fixes its own live parameter
//! names, starting values, random-walk step scales and bounds. Kernels are
//! sampled at integer pixel offsets on the output grid and normalized so
//! their absolute sum is one.

use std::fmt;
use std::str::FromStr;

use crate::model::RescaleError;

/// Hard bound on the Gauss-Hermite shape parameters. Line profiles with
/// |h3| or |h4| beyond this are treated as infinitely unlikely.
pub const SHAPE_BOUND: f64 = 0.3;

/// Named rescaling parameters. Which of them are live depends on the
/// kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    Shift,
    Scale,
    Width,
    H3,
    H4,
}

impl ParamName {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamName::Shift => "shift",
            ParamName::Scale => "scale",
            ParamName::Width => "width",
            ParamName::H3 => "h3",
            ParamName::H4 => "h4",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full parameter vector as a plain value type.
///
/// Copying a `Params` is how the sampler separates the current state from a
/// proposal; fields that are not live for the chosen family stay at zero
/// and are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub shift: f64,
    pub scale: f64,
    pub width: f64,
    pub h3: f64,
    pub h4: f64,
}

impl Params {
    pub fn get(&self, name: ParamName) -> f64 {
        match name {
            ParamName::Shift => self.shift,
            ParamName::Scale => self.scale,
            ParamName::Width => self.width,
            ParamName::H3 => self.h3,
            ParamName::H4 => self.h4,
        }
    }

    pub fn set(&mut self, name: ParamName, value: f64) {
        match name {
            ParamName::Shift => self.shift = value,
            ParamName::Scale => self.scale = value,
            ParamName::Width => self.width = value,
            ParamName::H3 => self.h3 = value,
            ParamName::H4 => self.h4 = value,
        }
    }

    /// The live parameter values in the family's canonical order.
    pub fn values(&self, family: KernelFamily) -> Vec<f64> {
        family
            .param_names()
            .iter()
            .map(|&name| self.get(name))
            .collect()
    }
}

/// Functional form of the smoothing kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFamily {
    /// No smoothing; shift and scale only.
    Delta,
    /// Gaussian of fitted width.
    Gauss,
    /// Gaussian modulated by a probabilists' Hermite series with shape
    /// parameters h3 and h4 (van der Marel & Franx 1993).
    Hermite,
}

impl FromStr for KernelFamily {
    type Err = RescaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Delta" => Ok(KernelFamily::Delta),
            "Gauss" => Ok(KernelFamily::Gauss),
            "Hermite" => Ok(KernelFamily::Hermite),
            other => Err(RescaleError::UnknownKernelFamily(other.to_string())),
        }
    }
}

impl fmt::Display for KernelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelFamily::Delta => "Delta",
            KernelFamily::Gauss => "Gauss",
            KernelFamily::Hermite => "Hermite",
        };
        f.write_str(name)
    }
}

impl KernelFamily {
    /// The live parameters of this family, in canonical (chain-column)
    /// order.
    pub fn param_names(self) -> &'static [ParamName] {
        use ParamName::*;
        match self {
            KernelFamily::Delta => &[Shift, Scale],
            KernelFamily::Gauss => &[Shift, Scale, Width],
            KernelFamily::Hermite => &[Shift, Scale, Width, H3, H4],
        }
    }

    /// Starting point of the random walk. The width starts right at its
    /// sampling floor.
    pub fn initial_params(self, pixel_size: f64) -> Params {
        let width = match self.width_floor(pixel_size) {
            Some(floor) => floor,
            None => 0.0,
        };
        Params {
            shift: 1.0e-4,
            scale: 1.0,
            width,
            h3: 0.0,
            h4: 0.0,
        }
    }

    /// Standard deviation of the random-walk step for one parameter.
    pub fn step_scale(self, name: ParamName) -> f64 {
        match name {
            ParamName::Shift => 0.05,
            ParamName::Scale => 0.02,
            ParamName::Width => 0.30,
            ParamName::H3 | ParamName::H4 => 0.03,
        }
    }

    /// Smallest width the kernel can be built with before it becomes
    /// undersampled on the grid. `None` for the delta family, which has no
    /// width.
    pub fn width_floor(self, pixel_size: f64) -> Option<f64> {
        match self {
            KernelFamily::Delta => None,
            KernelFamily::Gauss => Some(0.51 * pixel_size),
            KernelFamily::Hermite => Some(0.46 * pixel_size),
        }
    }

    /// How many output-pixel lags of the covariance matrix to keep before
    /// assuming the kernel overlap is zero. Five kernel widths covers the
    /// Gaussian tail comfortably.
    pub fn breakwidth(self, width: f64, pixel_size: f64) -> usize {
        match self {
            KernelFamily::Delta => 2,
            KernelFamily::Gauss | KernelFamily::Hermite => {
                ((5.0 * width / pixel_size).ceil() as usize).max(2)
            }
        }
    }
}

/// Sample the family's kernel on the output grid `x` (assumed uniformly
/// spaced). The result has odd length close to the grid length and
/// absolute sum one, which keeps centered convolution well-defined.
pub fn kernel_for_grid(family: KernelFamily, x: &[f64], params: &Params) -> Vec<f64> {
    match family {
        KernelFamily::Delta => vec![1.0],
        KernelFamily::Gauss => {
            let pixwidth = params.width / (x[1] - x[0]);
            let mut k: Vec<f64> = offsets(x.len())
                .map(|p| (-0.5 * (p * p) / (pixwidth * pixwidth)).exp())
                .collect();
            if k.is_empty() {
                return vec![1.0];
            }
            normalize_abs(&mut k);
            k
        }
        KernelFamily::Hermite => {
            let pixwidth = params.width / (x[1] - x[0]);
            // the 1/(sigma sqrt(2 pi)) constant divides out in the
            // normalization but pins down the units in which h3 and h4 are
            // defined
            let norm = 1.0 / (pixwidth * (2.0 * std::f64::consts::PI).sqrt());
            let mut k: Vec<f64> = offsets(x.len())
                .map(|p| {
                    let t = p / pixwidth;
                    norm * (-0.5 * t * t).exp() * hermite_series(t, params.h3, params.h4)
                })
                .collect();
            if k.is_empty() {
                return vec![1.0];
            }
            normalize_abs(&mut k);
            k
        }
    }
}

/// Integer pixel offsets `-(n/2 - 1) ..= n/2 - 1`: the largest odd,
/// centered range that fits the grid.
fn offsets(n: usize) -> impl Iterator<Item = f64> {
    let half = (n / 2) as i64;
    (1 - half..half).map(|p| p as f64)
}

fn normalize_abs(k: &mut [f64]) {
    let sum: f64 = k.iter().map(|v| v.abs()).sum();
    for v in k.iter_mut() {
        *v /= sum;
    }
}

/// Probabilists' Hermite series `1 + h3 He3(t) + h4 He4(t)`.
fn hermite_series(t: f64, h3: f64, h4: f64) -> f64 {
    let he3 = t * t * t - 3.0 * t;
    let he4 = t * t * t * t - 6.0 * t * t + 3.0;
    1.0 + h3 * he3 + h4 * he4
}
