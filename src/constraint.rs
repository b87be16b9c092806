use crate::likelihood_block::{GaussianBlock, LogLikelihoodBlock, Measurement};
use crate::observable_cache::{ObservableCache, Prediction};

/// A named group of likelihood blocks, together with the cache their
/// predictions are registered in.
#[derive(Debug)]
pub struct Constraint {
    name: String,
    cache: ObservableCache,
    blocks: Vec<Box<dyn LogLikelihoodBlock>>,
}

impl Constraint {
    /// `blocks` must read their predictions from `cache`.
    pub fn new(name: &str, cache: ObservableCache, blocks: Vec<Box<dyn LogLikelihoodBlock>>) -> Self {
        Self {
            name: name.to_string(),
            cache,
            blocks,
        }
    }

    /// A single Gaussian measurement of `prediction`, named after it.
    pub fn gaussian(
        prediction: Box<dyn Prediction>,
        measurement: Measurement,
        number_of_observations: u32,
    ) -> Self {
        let name = prediction.name().to_string();
        let mut cache = ObservableCache::new();
        let id = cache.add(prediction);
        let block = GaussianBlock::new(id, measurement, number_of_observations);
        Self {
            name,
            cache,
            blocks: vec![Box::new(block)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &ObservableCache {
        &self.cache
    }

    pub fn blocks(&self) -> &[Box<dyn LogLikelihoodBlock>] {
        &self.blocks
    }
}

impl Clone for Constraint {
    fn clone(&self) -> Self {
        let mut cache = self.cache.clone();
        let blocks = self
            .blocks
            .iter()
            .map(|block| block.clone_onto(&self.cache, &mut cache))
            .collect();
        Self {
            name: self.name.clone(),
            cache,
            blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood_block::UniformBoundBlock;
    use crate::observable_cache::testing::Fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn clone_keeps_blocks_bound_to_its_cache() {
        let mut fixture = Fixture::default();
        let (_, a) = fixture.observable("a", 0.7);
        let (_, b) = fixture.observable("b", 0.6);
        let bound = UniformBoundBlock::new(vec![a, b], 1.0, 0.2).unwrap();
        let constraint = Constraint::new("bound", fixture.cache.clone(), vec![Box::new(bound)]);

        let clone = constraint.clone();
        assert_eq!(clone.name(), "bound");
        assert_eq!(clone.cache().len(), 2);
        assert_eq!(
            clone.blocks()[0].evaluate(clone.cache()).unwrap(),
            constraint.blocks()[0].evaluate(constraint.cache()).unwrap()
        );
    }
}
