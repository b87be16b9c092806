//! Probability densities that compare a cached prediction with a measurement.

use std::fmt::Debug;

use rand::RngCore;

use crate::error::LikelihoodError;
use crate::observable_cache::ObservableCache;

mod amoroso;
mod gaussian;
mod log_gamma;
mod mixture;
mod multivariate_gaussian;
mod uniform_bound;

pub use amoroso::AmorosoBlock;
pub use gaussian::GaussianBlock;
pub use log_gamma::LogGammaBlock;
pub use mixture::MixtureBlock;
pub use multivariate_gaussian::MultivariateGaussianBlock;
pub use uniform_bound::UniformBoundBlock;

/// A measured value with a possibly asymmetric one-sigma interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    min: f64,
    central: f64,
    max: f64,
}

impl Measurement {
    /// The interval `[min, max]` is the 68% interval around `central`.
    pub fn new(min: f64, central: f64, max: f64) -> Result<Self, LikelihoodError> {
        if !(min.is_finite() && central.is_finite() && max.is_finite()) {
            return Err(LikelihoodError::Configuration(format!(
                "measurement ({min}, {central}, {max}) is not finite"
            )));
        }
        if min >= central {
            return Err(LikelihoodError::Configuration(format!(
                "min value {min} >= central value {central}"
            )));
        }
        if max <= central {
            return Err(LikelihoodError::Configuration(format!(
                "max value {max} <= central value {central}"
            )));
        }
        Ok(Self { min, central, max })
    }

    pub fn symmetric(central: f64, sigma: f64) -> Result<Self, LikelihoodError> {
        Self::new(central - sigma, central, central + sigma)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn central(&self) -> f64 {
        self.central
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn sigma_lower(&self) -> f64 {
        self.central - self.min
    }

    pub fn sigma_upper(&self) -> f64 {
        self.max - self.central
    }
}

/// Goodness-of-fit summary of one block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TestStatistic {
    Empty,
    ChiSquare {
        value: f64,
        degrees_of_freedom: u32,
        /// Signed significance, if the block defines one.
        significance: Option<f64>,
    },
}

/// One term of a log-likelihood.
///
/// Blocks do not own the cache that holds their predictions. They keep
/// the ids of their predictions and read the values from whichever cache
/// is passed in, which must be the cache they were registered with.
pub trait LogLikelihoodBlock: Debug + Send + Sync {
    fn as_string(&self) -> String;

    /// Register this block's predictions with `target` and return a copy
    /// that reads from it.
    fn clone_onto(
        &self,
        source: &ObservableCache,
        target: &mut ObservableCache,
    ) -> Box<dyn LogLikelihoodBlock>;

    /// Log-density of the current predictions.
    ///
    /// A non-finite result marks an invalid model point and is not an error.
    fn evaluate(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError>;

    fn number_of_observations(&self) -> u32;

    /// Log-density of one pseudo-observation drawn for the current predictions.
    fn sample(&self, cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError>;

    /// Signed distance between prediction and measurement in standard-normal sigmas.
    ///
    /// Positive when the measured value exceeds the prediction.
    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError>;

    fn primary_test_statistic(&self, cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError>;
}

pub(crate) fn no_observation_suffix(number_of_observations: u32) -> &'static str {
    if number_of_observations == 0 {
        "; no observation"
    } else {
        ""
    }
}
