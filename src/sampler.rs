//! Metropolis-Hastings driver for the rescaling model.
//!
//! This is hill climbing with stochastic escape rather than a detailed-
//! balance sampler: improving proposals are always taken, and worsening
//! proposals are taken with probability `exp(-chi2_try / chi2_current)`.
//! That acceptance rule is deliberately non-standard (it is not the
//! textbook `exp(-delta_chi2 / 2)` ratio) and is preserved as a frozen
//! contract; chain marginals are therefore only suitable as empirical
//! priors, not as calibrated posteriors.

use rand::Rng;
use tracing::{debug, warn};

use crate::chain::Chain;
use crate::kernel::Params;
use crate::model::{RescaleError, RescaleModel};
use crate::spectrum::EmissionLine;

/// How often (in trials) the sampler logs its progress.
const PROGRESS_INTERVAL: u64 = 500;

/// Outcome of one sampling run.
#[derive(Debug)]
pub struct FitResult {
    pub best_chi2: f64,
    pub best_params: Params,
    /// Fraction of trials whose proposal was accepted.
    pub accept_fraction: f64,
    /// The full chain, when requested.
    pub chain: Option<Chain>,
}

impl FitResult {
    /// The frozen fallback substituted by batch layers when a fit fails:
    /// chi2 999, every parameter -99, nothing accepted. Downstream tooling
    /// relies on these exact values to flag failed epochs.
    pub fn sentinel(model: &RescaleModel) -> Self {
        let mut params = model.params();
        for &name in model.family().param_names() {
            params.set(name, -99.0);
        }
        Self {
            best_chi2: 999.0,
            best_params: params,
            accept_fraction: 0.0,
            chain: None,
        }
    }
}

/// Fit `model` to `data` with `ntrial` random-walk trials.
///
/// The current state starts at the model's unperturbed parameters, and
/// that state is the chain's first record. Every trial appends exactly one
/// record: the new state if the proposal was accepted, the unchanged
/// current state otherwise. Errors from the likelihood (for example a
/// singular covariance matrix) propagate to the caller instead of being
/// swallowed.
pub fn metropolis_hastings<R: Rng + ?Sized>(
    ntrial: u64,
    data: &EmissionLine,
    model: &RescaleModel,
    retain_chain: bool,
    rng: &mut R,
) -> Result<FitResult, RescaleError> {
    assert!(ntrial > 0, "ntrial must be positive");
    let family = model.family();

    let mut current = model.params();
    let mut chi2 = model.evaluate_at(&current, data)?;
    let mut best = current;
    let mut best_chi2 = chi2;

    let mut chain = Chain::new();
    chain.append(chi2, family, &current)?;

    let mut accepted: u64 = 0;
    for trial in 0..ntrial {
        let proposal = model.propose(&current, rng);
        let chi2_try = model.evaluate_at(&proposal, data)?;

        if chi2_try < chi2 {
            current = proposal;
            chi2 = chi2_try;
            accepted += 1;
            // a stochastic escape can only move uphill, so the global best
            // can only improve on this branch
            if chi2 < best_chi2 {
                best_chi2 = chi2;
                best = current;
            }
        } else {
            let prob = (-chi2_try / chi2).exp();
            if rng.random::<f64>() <= prob {
                current = proposal;
                chi2 = chi2_try;
                accepted += 1;
            }
        }
        chain.append(chi2, family, &current)?;

        if trial % PROGRESS_INTERVAL == 0 {
            debug!(trial, best_chi2, chi2_try, "sampling progress");
        }
    }

    Ok(FitResult {
        best_chi2,
        best_params: best,
        accept_fraction: accepted as f64 / ntrial as f64,
        chain: retain_chain.then_some(chain),
    })
}

/// Batch-layer wrapper: run a fit and substitute the sentinel result on
/// failure instead of aborting, so one pathological spectrum does not take
/// down a whole batch.
pub fn fit_or_sentinel<R: Rng + ?Sized>(
    ntrial: u64,
    data: &EmissionLine,
    model: &RescaleModel,
    retain_chain: bool,
    rng: &mut R,
) -> FitResult {
    match metropolis_hastings(ntrial, data, model, retain_chain, rng) {
        Ok(fit) => fit,
        Err(err) => {
            warn!(error = %err, family = %model.family(), "fit failed, substituting sentinel result");
            FitResult::sentinel(model)
        }
    }
}
