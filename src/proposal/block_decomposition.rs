use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{write_meta, MarginalPrior, MultivariateProposal, ProposalFunction, BLOCK_DECOMPOSITION};
use crate::error::ProposalError;
use crate::state::ChainState;
use crate::storage::ProposalStore;

/// A multivariate proposal for one contiguous block of coordinates combined
/// with independent one-dimensional priors for single coordinates.
///
/// The priors do not depend on the current point and are never adapted.
#[derive(Clone, Debug, Default)]
pub struct BlockDecomposition {
    block: Option<(usize, MultivariateProposal)>,
    priors: Vec<(usize, MarginalPrior)>,
}

#[derive(Serialize, Deserialize)]
struct PriorRecord {
    index: usize,
    prior: MarginalPrior,
}

impl BlockDecomposition {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_covered(&self, index: usize) -> bool {
        let in_block = self
            .block
            .as_ref()
            .is_some_and(|(start, mv)| (*start..start + mv.dimension()).contains(&index));
        in_block || self.priors.iter().any(|(i, _)| *i == index)
    }

    /// Let `proposal` move the coordinates `start..start + proposal.dimension()`.
    pub fn add_multivariate(&mut self, mut proposal: MultivariateProposal, start: usize) -> Result<(), ProposalError> {
        if self.block.is_some() {
            return Err(ProposalError::Configuration(
                "only one multivariate block is supported".to_string(),
            ));
        }
        let range = start..start + proposal.dimension();
        if let Some(index) = range.clone().find(|&i| self.is_covered(i)) {
            return Err(ProposalError::Configuration(format!(
                "coordinate {index} already has a proposal"
            )));
        }
        proposal.set_indices(range.collect())?;
        self.block = Some((start, proposal));
        Ok(())
    }

    pub fn add_prior(&mut self, index: usize, prior: MarginalPrior) -> Result<(), ProposalError> {
        if self.is_covered(index) {
            return Err(ProposalError::Configuration(format!(
                "coordinate {index} already has a proposal"
            )));
        }
        prior.validate()?;
        self.priors.push((index, prior));
        Ok(())
    }

    pub fn priors(&self) -> &[(usize, MarginalPrior)] {
        &self.priors
    }

    pub(crate) fn restore(store: &dyn ProposalStore, path: &str) -> Result<Self, ProposalError> {
        let mut decomposition = Self::new();
        if store.read_u64(&format!("{path}/number of multivariates"))? > 0 {
            let start = store.read_u64(&format!("{path}/block offset"))? as usize;
            let block = super::load(store, &format!("{path}/multivariates/0"))?;
            let multivariate = block.multivariate().cloned().ok_or_else(|| {
                ProposalError::Configuration(format!(
                    "block of type {} is not multivariate",
                    block.type_tag()
                ))
            })?;
            decomposition.add_multivariate(multivariate, start)?;
        }
        for serialized in store.read_strings(&format!("{path}/priors"))? {
            let record: PriorRecord =
                serde_json::from_str(&serialized).map_err(|err| ProposalError::Storage(err.into()))?;
            decomposition.add_prior(record.index, record.prior)?;
        }
        Ok(decomposition)
    }
}

impl ProposalFunction for BlockDecomposition {
    fn type_tag(&self) -> &'static str {
        BLOCK_DECOMPOSITION
    }

    /// One past the highest covered coordinate. Coordinates in between that
    /// no part covers are kept fixed by `propose`.
    fn dimension(&self) -> usize {
        let block_end = self.block.as_ref().map_or(0, |(start, mv)| start + mv.dimension());
        let prior_end = self.priors.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        block_end.max(prior_end)
    }

    fn evaluate(&self, x: &[f64], y: &[f64]) -> f64 {
        let block = self.block.as_ref().map_or(0.0, |(start, mv)| {
            let range = *start..start + mv.dimension();
            mv.evaluate(&x[range.clone()], &y[range])
        });
        block + self.priors.iter().map(|(i, prior)| prior.evaluate(x[*i])).sum::<f64>()
    }

    fn propose(&self, current: &[f64], proposal: &mut [f64], rng: &mut dyn RngCore) {
        proposal.copy_from_slice(current);
        if let Some((start, mv)) = &self.block {
            let range = *start..start + mv.dimension();
            mv.propose(&current[range.clone()], &mut proposal[range], rng);
        }
        for (i, prior) in &self.priors {
            proposal[*i] = prior.sample(rng);
        }
    }

    fn adapt(
        &mut self,
        window: &[ChainState],
        efficiency: f64,
        efficiency_min: f64,
        efficiency_max: f64,
    ) -> Result<(), ProposalError> {
        match &mut self.block {
            Some((_, mv)) => mv.adapt(window, efficiency, efficiency_min, efficiency_max),
            None => Ok(()),
        }
    }

    fn clone_proposal(&self) -> Box<dyn ProposalFunction> {
        Box::new(self.clone())
    }

    fn dump_state(&self, store: &mut dyn ProposalStore, path: &str) -> Result<(), ProposalError> {
        write_meta(store, path, BLOCK_DECOMPOSITION, self.dimension())?;
        let priors = self
            .priors
            .iter()
            .map(|(index, prior)| {
                serde_json::to_string(&PriorRecord {
                    index: *index,
                    prior: prior.clone(),
                })
                .map_err(|err| ProposalError::Storage(err.into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        store.write(&format!("{path}/priors"), priors.into())?;

        let count = u64::from(self.block.is_some());
        store.write(&format!("{path}/number of multivariates"), count.into())?;
        if let Some((start, mv)) = &self.block {
            store.write(&format!("{path}/block offset"), (*start as u64).into())?;
            mv.dump_state(store, &format!("{path}/multivariates/0"))?;
        }
        Ok(())
    }

    fn multivariate(&self) -> Option<&MultivariateProposal> {
        self.block.as_ref().map(|(_, mv)| mv)
    }

    fn multivariate_mut(&mut self) -> Option<&mut MultivariateProposal> {
        self.block.as_mut().map(|(_, mv)| mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::proposal::{Kernel, MultivariateSettings};
    use crate::storage::HashMapStore;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::{rngs::SmallRng, SeedableRng};

    fn multivariate() -> MultivariateProposal {
        MultivariateProposal::new(
            Kernel::Gaussian,
            faer::mat![[0.5, 0.1], [0.1, 0.4]],
            MultivariateSettings::default(),
        )
        .unwrap()
        .with_diagnostics(Diagnostics::silent())
    }

    fn decomposition() -> BlockDecomposition {
        let mut bd = BlockDecomposition::new();
        bd.add_prior(0, MarginalPrior::flat(-1.0, 1.0).unwrap()).unwrap();
        bd.add_multivariate(multivariate(), 1).unwrap();
        bd.add_prior(3, MarginalPrior::gaussian(-5.0, 5.0, 0.0, 1.0, 1.5).unwrap())
            .unwrap();
        bd
    }

    proptest! {
        #[test]
        fn evaluate_is_a_sum_of_parts(
            x in prop::array::uniform4(-0.9f64..0.9),
            y in prop::array::uniform4(-0.9f64..0.9),
        ) {
            let bd = decomposition();
            let mv = multivariate();
            let expected = mv.evaluate(&x[1..3], &y[1..3])
                + MarginalPrior::flat(-1.0, 1.0).unwrap().evaluate(x[0])
                + MarginalPrior::gaussian(-5.0, 5.0, 0.0, 1.0, 1.5).unwrap().evaluate(x[3]);
            prop_assert!((bd.evaluate(&x, &y) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn overlapping_coordinates_are_rejected() {
        let mut bd = decomposition();
        assert_eq!(bd.dimension(), 4);
        assert!(bd.add_prior(2, MarginalPrior::flat(0.0, 1.0).unwrap()).is_err());
        assert!(bd.add_multivariate(multivariate(), 5).is_err());

        let mut other = BlockDecomposition::new();
        other.add_prior(1, MarginalPrior::flat(0.0, 1.0).unwrap()).unwrap();
        assert!(other.add_multivariate(multivariate(), 0).is_err());
        other.add_multivariate(multivariate(), 2).unwrap();
        assert_eq!(other.multivariate().unwrap().indices(), &[2, 3]);
    }

    #[test]
    fn propose_moves_every_part() {
        let bd = decomposition();
        let mut rng = SmallRng::seed_from_u64(17);
        let current = [0.0, 0.5, 0.5, 1.0];
        let mut proposal = [0.0; 4];
        for _ in 0..100 {
            bd.propose(&current, &mut proposal, &mut rng);
            assert!((-1.0..=1.0).contains(&proposal[0]));
            assert!((-5.0..=5.0).contains(&proposal[3]));
            assert!(bd.evaluate(&proposal, &current).is_finite());
        }
        assert_ne!(proposal[1], current[1]);
    }

    #[test]
    fn adapt_reaches_only_the_block() {
        let mut bd = decomposition();
        let window: Vec<ChainState> = (0..10)
            .map(|i| {
                let t = i as f64;
                ChainState::new(vec![100.0 * t, t.sin(), t.cos(), -50.0 * t])
            })
            .collect();
        bd.adapt(&window, 0.3, 0.1, 0.5).unwrap();
        assert_eq!(bd.multivariate().unwrap().adaptations(), 1);
        assert_eq!(bd.priors()[0].1, MarginalPrior::flat(-1.0, 1.0).unwrap());

        bd.multivariate_mut().unwrap().rescale(2.0).unwrap();
        let mut clone = bd.clone_proposal();
        assert_eq!(
            clone.multivariate().unwrap().covariance(),
            bd.multivariate().unwrap().covariance()
        );
        clone.multivariate_mut().unwrap().rescale(2.0).unwrap();
        assert_relative_eq!(
            clone.multivariate().unwrap().scale(),
            2.0 * bd.multivariate().unwrap().scale(),
            max_relative = 1e-14
        );
    }

    #[test]
    fn uncovered_coordinates_count_toward_the_dimension() {
        let mut bd = BlockDecomposition::new();
        bd.add_multivariate(multivariate(), 3).unwrap();
        bd.add_prior(1, MarginalPrior::flat(-1.0, 1.0).unwrap()).unwrap();
        assert_eq!(bd.dimension(), 5);

        let mut rng = SmallRng::seed_from_u64(23);
        let current = [7.0, 0.0, 8.0, 0.5, 0.5];
        let mut proposal = [0.0; 5];
        bd.propose(&current, &mut proposal, &mut rng);
        assert_eq!((proposal[0], proposal[2]), (7.0, 8.0));

        let mut store = HashMapStore::new();
        bd.dump_state(&mut store, "gaps").unwrap();
        assert_eq!(store.read_u64("gaps/meta/number of dimensions").unwrap(), 5);
        let restored = crate::proposal::make(&store, "gaps", BLOCK_DECOMPOSITION, 5).unwrap();
        assert_eq!(restored.evaluate(&proposal, &current), bd.evaluate(&proposal, &current));
    }

    #[test]
    fn state_survives_storage() {
        let bd = decomposition();
        let mut store = HashMapStore::new();
        bd.dump_state(&mut store, "bd").unwrap();
        assert_eq!(store.read_string("bd/multivariates/0/meta/proposal type").unwrap(), "MultivariateGaussian");

        let restored = crate::proposal::load(&store, "bd").unwrap();
        assert_eq!(restored.type_tag(), BLOCK_DECOMPOSITION);
        assert_eq!(restored.dimension(), 4);
        let (x, y) = ([0.2, 0.1, -0.3, 1.2], [0.0, 0.3, 0.2, 0.9]);
        assert_eq!(restored.evaluate(&x, &y), bd.evaluate(&x, &y));
    }
}
