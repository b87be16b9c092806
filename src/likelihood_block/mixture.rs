use itertools::Itertools;
use rand::{Rng, RngCore};

use super::{LogLikelihoodBlock, TestStatistic};
use crate::error::LikelihoodError;
use crate::math::{chi_squared_cdf, chi_squared_quantile, weighted_log_sum_exp};
use crate::observable_cache::ObservableCache;

/// Weighted sum of the densities of several blocks.
#[derive(Debug)]
pub struct MixtureBlock {
    components: Vec<Box<dyn LogLikelihoodBlock>>,
    weights: Vec<f64>,
    test_statistics: Vec<[f64; 2]>,
}

impl MixtureBlock {
    /// `test_statistics` holds `[significance, -2 ln L]` pairs ordered by the
    /// second entry. The significance of the first pair whose bound is not
    /// below the current `-2 ln L` is reported.
    pub fn new(
        components: Vec<Box<dyn LogLikelihoodBlock>>,
        weights: Vec<f64>,
        test_statistics: Vec<[f64; 2]>,
    ) -> Result<Self, LikelihoodError> {
        if components.is_empty() {
            return Err(LikelihoodError::Configuration(
                "a mixture needs at least one component".to_string(),
            ));
        }
        if components.len() != weights.len() {
            return Err(LikelihoodError::Configuration(format!(
                "{} components but {} weights",
                components.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(LikelihoodError::Configuration(format!(
                "mixture weights must be non-negative, found {weights:?}"
            )));
        }
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return Err(LikelihoodError::Configuration(
                "mixture weights sum to zero".to_string(),
            ));
        }
        let weights = weights.into_iter().map(|w| w / sum).collect_vec();

        Ok(Self {
            components,
            weights,
            test_statistics,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl LogLikelihoodBlock for MixtureBlock {
    fn as_string(&self) -> String {
        let mut result = "Mixture: \n".to_string();
        for component in &self.components {
            result += &component.as_string();
            result.push('\n');
        }
        result
    }

    fn clone_onto(
        &self,
        source: &ObservableCache,
        target: &mut ObservableCache,
    ) -> Box<dyn LogLikelihoodBlock> {
        Box::new(Self {
            components: self
                .components
                .iter()
                .map(|component| component.clone_onto(source, target))
                .collect(),
            weights: self.weights.clone(),
            test_statistics: self.test_statistics.clone(),
        })
    }

    fn evaluate(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let values = self
            .components
            .iter()
            .map(|component| component.evaluate(cache))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(weighted_log_sum_exp(&self.weights, &values))
    }

    fn number_of_observations(&self) -> u32 {
        self.components[0].number_of_observations()
    }

    fn sample(&self, cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        let u: f64 = rng.random();
        let mut cumulative = 0.0;
        for (component, weight) in self.components.iter().zip(&self.weights) {
            cumulative += weight;
            if u < cumulative {
                return component.sample(cache, rng);
            }
        }
        // Rounding can leave the cumulative weight just below one.
        self.components[self.components.len() - 1].sample(cache, rng)
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let value = -2.0 * self.evaluate(cache)?;
        Ok(self
            .test_statistics
            .iter()
            .find(|pair| value <= pair[1])
            .map_or(f64::NAN, |pair| pair[0]))
    }

    fn primary_test_statistic(&self, cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        let significance = self.significance(cache)?;
        let degrees_of_freedom = self.number_of_observations();
        let p = chi_squared_cdf(significance * significance, 1.0);
        let value = chi_squared_quantile(p, degrees_of_freedom.into()).unwrap_or(f64::NAN);
        Ok(TestStatistic::ChiSquare {
            value,
            degrees_of_freedom,
            significance: None,
        })
    }
}
