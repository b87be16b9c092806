//! The total log-likelihood of an analysis.

use rand::RngCore;

use crate::constraint::Constraint;
use crate::diagnostics::Diagnostics;
use crate::error::LikelihoodError;
use crate::likelihood_block::{GaussianBlock, LogLikelihoodBlock, Measurement};
use crate::observable_cache::{ObservableCache, Parameters, Prediction};

#[derive(Debug)]
struct BoundConstraint {
    name: String,
    blocks: Vec<Box<dyn LogLikelihoodBlock>>,
}

/// Sum of the log-densities of all registered blocks.
///
/// The likelihood owns its parameters and a private cache. Every block added
/// is copied onto that cache, so a clone is a fully independent chain.
#[derive(Debug)]
pub struct LogLikelihood {
    parameters: Parameters,
    cache: ObservableCache,
    constraints: Vec<BoundConstraint>,
    external_blocks: Vec<Box<dyn LogLikelihoodBlock>>,
    diagnostics: Diagnostics,
}

impl LogLikelihood {
    pub fn new(parameters: Parameters) -> Self {
        Self {
            parameters,
            cache: ObservableCache::new(),
            constraints: Vec::new(),
            external_blocks: Vec::new(),
            diagnostics: Diagnostics::current(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Add a single Gaussian measurement of `prediction` as its own constraint.
    pub fn add_gaussian(
        &mut self,
        prediction: Box<dyn Prediction>,
        measurement: Measurement,
        number_of_observations: u32,
    ) {
        let name = prediction.name().to_string();
        let id = self.cache.add(prediction);
        self.constraints.push(BoundConstraint {
            name,
            blocks: vec![Box::new(GaussianBlock::new(id, measurement, number_of_observations))],
        });
    }

    pub fn add_constraint(&mut self, constraint: &Constraint) {
        let blocks = constraint
            .blocks()
            .iter()
            .map(|block| block.clone_onto(constraint.cache(), &mut self.cache))
            .collect();
        self.constraints.push(BoundConstraint {
            name: constraint.name().to_string(),
            blocks,
        });
    }

    /// Add a block that does not belong to any constraint. `source` is the
    /// cache the block currently reads from.
    pub fn add_block(&mut self, block: &dyn LogLikelihoodBlock, source: &ObservableCache) {
        self.external_blocks.push(block.clone_onto(source, &mut self.cache));
    }

    fn blocks(&self) -> impl Iterator<Item = &dyn LogLikelihoodBlock> {
        self.constraints
            .iter()
            .flat_map(|constraint| constraint.blocks.iter())
            .chain(self.external_blocks.iter())
            .map(|block| block.as_ref())
    }

    /// Refresh the cache from the parameters and sum all block densities.
    ///
    /// Returns `-inf` as soon as one block is not finite.
    pub fn evaluate(&mut self) -> Result<f64, LikelihoodError> {
        self.cache.update(&self.parameters);
        let mut result = 0.0;
        for block in self.blocks() {
            let value = block.evaluate(&self.cache)?;
            if !value.is_finite() {
                return Ok(f64::NEG_INFINITY);
            }
            result += value;
        }
        Ok(result)
    }

    /// Goodness of fit at the current parameters from `datasets` simulated
    /// experiments.
    ///
    /// Returns the fraction of simulated log-likelihoods below the observed
    /// one, together with the standard deviation of its binomial posterior.
    /// Only blocks with observations take part.
    pub fn bootstrap_p_value(
        &mut self,
        datasets: usize,
        rng: &mut dyn RngCore,
    ) -> Result<(f64, f64), LikelihoodError> {
        if datasets == 0 {
            return Err(LikelihoodError::Configuration(
                "bootstrap needs at least one dataset".to_string(),
            ));
        }
        self.cache.update(&self.parameters);

        let observed_blocks: Vec<_> = self
            .blocks()
            .filter(|block| block.number_of_observations() > 0)
            .collect();
        let mut observed = 0.0;
        for block in &observed_blocks {
            observed += block.evaluate(&self.cache)?;
        }

        let mut below = 0usize;
        for _ in 0..datasets {
            let mut simulated = 0.0;
            for block in &observed_blocks {
                simulated += block.sample(&self.cache, rng)?;
            }
            if simulated < observed {
                below += 1;
            }
        }

        let n = datasets as f64;
        let p = below as f64 / n;
        let posterior_mean = (below as f64 + 1.0) / (n + 2.0);
        let uncertainty = (posterior_mean * (1.0 - posterior_mean) / (n + 3.0)).sqrt();
        self.diagnostics.in_scope(|| {
            tracing::info!(
                datasets,
                observed,
                p_value = p,
                uncertainty,
                "bootstrap p-value"
            )
        });
        Ok((p, uncertainty))
    }

    pub fn number_of_observations(&self) -> u32 {
        self.blocks().map(|block| block.number_of_observations()).sum()
    }

    /// Names and blocks of the added constraints, in insertion order.
    pub fn constraints(&self) -> impl Iterator<Item = (&str, &[Box<dyn LogLikelihoodBlock>])> {
        self.constraints
            .iter()
            .map(|constraint| (constraint.name.as_str(), constraint.blocks.as_slice()))
    }

    pub fn observable_cache(&self) -> &ObservableCache {
        &self.cache
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }
}

impl Clone for LogLikelihood {
    fn clone(&self) -> Self {
        let mut cache = ObservableCache::new();
        let constraints = self
            .constraints
            .iter()
            .map(|constraint| BoundConstraint {
                name: constraint.name.clone(),
                blocks: constraint
                    .blocks
                    .iter()
                    .map(|block| block.clone_onto(&self.cache, &mut cache))
                    .collect(),
            })
            .collect();
        let external_blocks = self
            .external_blocks
            .iter()
            .map(|block| block.clone_onto(&self.cache, &mut cache))
            .collect();
        Self {
            parameters: self.parameters.clone(),
            cache,
            constraints,
            external_blocks,
            diagnostics: self.diagnostics.clone(),
        }
    }
}
