use rand::RngCore;

use super::{LogLikelihoodBlock, TestStatistic};
use crate::error::LikelihoodError;
use crate::observable_cache::{ObservableCache, ObservableId};

/// Upper bound on the sum of several non-negative predictions.
///
/// Below the bound the block contributes nothing. Above it a Gaussian-shaped
/// penalty applies, or the point is excluded if the bound has no uncertainty.
#[derive(Clone, Debug)]
pub struct UniformBoundBlock {
    ids: Vec<ObservableId>,
    bound: f64,
    uncertainty: f64,
}

impl UniformBoundBlock {
    pub fn new(ids: Vec<ObservableId>, bound: f64, uncertainty: f64) -> Result<Self, LikelihoodError> {
        if !(uncertainty >= 0.0) {
            return Err(LikelihoodError::Configuration(format!(
                "uncertainty of the bound ({uncertainty}) must be non-negative"
            )));
        }
        Ok(Self {
            ids,
            bound,
            uncertainty,
        })
    }

    fn saturation(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let saturation: f64 = self.ids.iter().map(|&id| cache[id]).sum();
        if saturation < 0.0 {
            return Err(LikelihoodError::NegativeContribution(saturation));
        }
        Ok(saturation)
    }
}

impl LogLikelihoodBlock for UniformBoundBlock {
    fn as_string(&self) -> String {
        format!("UniformBound: bound = {} +- {}", self.bound, self.uncertainty)
    }

    fn clone_onto(
        &self,
        source: &ObservableCache,
        target: &mut ObservableCache,
    ) -> Box<dyn LogLikelihoodBlock> {
        let ids = self.ids.iter().map(|&id| target.adopt(source, id)).collect();
        Box::new(Self { ids, ..self.clone() })
    }

    fn evaluate(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let saturation = self.saturation(cache)?;
        if saturation < self.bound {
            Ok(0.0)
        } else if self.uncertainty == 0.0 {
            Ok(f64::NEG_INFINITY)
        } else {
            let chi = (saturation - self.bound) / self.uncertainty;
            Ok(-0.5 * chi * chi)
        }
    }

    fn number_of_observations(&self) -> u32 {
        0
    }

    fn sample(&self, _cache: &ObservableCache, _rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        Ok(0.0)
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let saturation = self.saturation(cache)?;
        if saturation < self.bound {
            Ok(0.0)
        } else if self.uncertainty == 0.0 {
            Ok(f64::NEG_INFINITY)
        } else {
            Ok((saturation - self.bound) / self.uncertainty)
        }
    }

    fn primary_test_statistic(&self, cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        let chi = self.significance(cache)?;
        Ok(TestStatistic::ChiSquare {
            value: chi * chi,
            degrees_of_freedom: 1,
            significance: Some(chi),
        })
    }
}
