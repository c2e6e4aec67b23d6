//! Taylor remainder tests.
//!
//! For a correct derivative the first-order remainder
//! `|J(m + h dm) - J(m) - h dJ.dm|` shrinks like `h^2`, so halving `h`
//! should divide it by four. A wrong derivative leaves an `O(h)` remainder
//! and a convergence rate near one.

use spool_core::Error;
use tracing::{info, warn};

/// Smallest acceptable first-order convergence rate.
pub const FIRST_ORDER_RATE: f64 = 1.9;

/// Smallest acceptable second-order convergence rate.
pub const SECOND_ORDER_RATE: f64 = 2.7;

/// Configuration for a Taylor test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaylorConfig {
    seed: f64,
    halvings: usize,
}

/// Errors that can occur when validating a Taylor test config.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TaylorConfigError {
    #[error("seed must be finite and positive")]
    Seed,

    #[error("at least 4 halvings are needed to estimate a rate, got {0}")]
    TooFewHalvings(usize),
}

impl Default for TaylorConfig {
    fn default() -> Self {
        Self {
            seed: 1e-2,
            halvings: 5,
        }
    }
}

impl TaylorConfig {
    /// Creates a config with the largest perturbation `seed`, halved
    /// `halvings` times.
    ///
    /// # Errors
    ///
    /// Returns an error if `seed` is not positive and finite, or if fewer
    /// than four halvings are requested.
    pub fn new(seed: f64, halvings: usize) -> Result<Self, TaylorConfigError> {
        if !seed.is_finite() || seed <= 0.0 {
            return Err(TaylorConfigError::Seed);
        }
        if halvings < 4 {
            return Err(TaylorConfigError::TooFewHalvings(halvings));
        }
        Ok(Self { seed, halvings })
    }

    #[must_use]
    pub fn seed(&self) -> f64 {
        self.seed
    }

    #[must_use]
    pub fn halvings(&self) -> usize {
        self.halvings
    }

    fn perturbations(&self) -> Vec<f64> {
        (0..=self.halvings)
            .scan(self.seed, |h, _| {
                let current = *h;
                *h *= 0.5;
                Some(current)
            })
            .collect()
    }
}

/// Residuals and observed convergence rates of a Taylor test.
#[derive(Debug, Clone, PartialEq)]
pub struct TaylorResult {
    pub perturbations: Vec<f64>,
    pub residuals: Vec<f64>,
    /// `log2(r[k-1] / r[k])` for each halving.
    pub rates: Vec<f64>,
    threshold: f64,
}

impl TaylorResult {
    fn new(perturbations: Vec<f64>, residuals: Vec<f64>, threshold: f64) -> Self {
        let rates = residuals
            .windows(2)
            .map(|pair| {
                if pair[1] == 0.0 {
                    f64::INFINITY
                } else {
                    (pair[0] / pair[1]).log2()
                }
            })
            .collect();
        Self {
            perturbations,
            residuals,
            rates,
            threshold,
        }
    }

    /// The slowest observed rate.
    #[must_use]
    pub fn min_rate(&self) -> f64 {
        self.rates.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Returns `true` if every rate reaches the expected order.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.min_rate() >= self.threshold
    }
}

/// Checks a directional derivative against finite perturbations.
///
/// `functional(h)` evaluates `J(m + h dm)`, `value` is `J(m)` and
/// `derivative` is `dJ/dm . dm`.
///
/// # Errors
///
/// Returns an error if any evaluation of `functional` fails.
pub fn taylor_test<F>(
    mut functional: F,
    value: f64,
    derivative: f64,
    config: TaylorConfig,
) -> Result<TaylorResult, Error>
where
    F: FnMut(f64) -> Result<f64, Error>,
{
    let perturbations = config.perturbations();
    let residuals = perturbations
        .iter()
        .map(|&h| -> Result<f64, Error> { Ok((functional(h)? - value - h * derivative).abs()) })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(report(TaylorResult::new(perturbations, residuals, FIRST_ORDER_RATE)))
}

/// Second-order Taylor test with a supplied Hessian action `dm.H.dm`.
///
/// The remainder `|J(m + h dm) - J(m) - h dJ.dm - h^2/2 dm.H.dm|` should
/// shrink like `h^3`.
///
/// # Errors
///
/// Returns an error if any evaluation of `functional` fails.
pub fn taylor_test_second_order<F>(
    mut functional: F,
    value: f64,
    derivative: f64,
    hessian: f64,
    config: TaylorConfig,
) -> Result<TaylorResult, Error>
where
    F: FnMut(f64) -> Result<f64, Error>,
{
    let perturbations = config.perturbations();
    let residuals = perturbations
        .iter()
        .map(|&h| -> Result<f64, Error> {
            Ok((functional(h)? - value - h * derivative - 0.5 * h * h * hessian).abs())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(report(TaylorResult::new(perturbations, residuals, SECOND_ORDER_RATE)))
}

fn report(result: TaylorResult) -> TaylorResult {
    let min_rate = result.min_rate();
    if result.passed() {
        info!(min_rate, threshold = result.threshold, "Taylor test passed");
    } else {
        warn!(min_rate, threshold = result.threshold, rates = ?result.rates, "Taylor test failed");
    }
    result
}
