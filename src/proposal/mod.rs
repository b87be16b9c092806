//! Proposal densities for Metropolis-Hastings steps.

use std::fmt::Debug;

use rand::RngCore;

use crate::error::ProposalError;
use crate::state::ChainState;
use crate::storage::ProposalStore;

mod block_decomposition;
mod multivariate;
mod prior;

pub use block_decomposition::BlockDecomposition;
pub use multivariate::{Kernel, MultivariateProposal, MultivariateSettings};
pub use prior::MarginalPrior;

pub const MULTIVARIATE_GAUSSIAN: &str = "MultivariateGaussian";
pub const MULTIVARIATE_STUDENT_T: &str = "MultivariateStudentT";
pub const BLOCK_DECOMPOSITION: &str = "BlockDecomposition";

/// A density `q(x | y)` that generates candidate points `x` from the
/// current point `y`.
pub trait ProposalFunction: Debug + Send + Sync {
    /// Name under which the state is persisted.
    fn type_tag(&self) -> &'static str;

    fn dimension(&self) -> usize;

    /// `ln q(x | y)`
    fn evaluate(&self, x: &[f64], y: &[f64]) -> f64;

    /// Write a candidate for `current` into `proposal`.
    fn propose(&self, current: &[f64], proposal: &mut [f64], rng: &mut dyn RngCore);

    /// Tune the proposal to the latest window of chain states, given the
    /// fraction of accepted moves in it.
    fn adapt(
        &mut self,
        window: &[ChainState],
        efficiency: f64,
        efficiency_min: f64,
        efficiency_max: f64,
    ) -> Result<(), ProposalError>;

    fn clone_proposal(&self) -> Box<dyn ProposalFunction>;

    fn dump_state(&self, store: &mut dyn ProposalStore, path: &str) -> Result<(), ProposalError>;

    /// The multivariate part of this proposal, if it has one.
    fn multivariate(&self) -> Option<&MultivariateProposal> {
        None
    }

    fn multivariate_mut(&mut self) -> Option<&mut MultivariateProposal> {
        None
    }
}

impl Clone for Box<dyn ProposalFunction> {
    fn clone(&self) -> Self {
        self.clone_proposal()
    }
}

pub(crate) fn write_meta(
    store: &mut dyn ProposalStore,
    path: &str,
    tag: &str,
    dimension: usize,
) -> Result<(), ProposalError> {
    store.write(&format!("{path}/meta/proposal type"), tag.into())?;
    store.write(&format!("{path}/meta/number of dimensions"), (dimension as u64).into())?;
    Ok(())
}

/// Rebuild the proposal of type `tag` stored below `path`.
pub fn make(
    store: &dyn ProposalStore,
    path: &str,
    tag: &str,
    dimension: usize,
) -> Result<Box<dyn ProposalFunction>, ProposalError> {
    let proposal: Box<dyn ProposalFunction> = match tag {
        MULTIVARIATE_GAUSSIAN | MULTIVARIATE_STUDENT_T => {
            Box::new(MultivariateProposal::restore(store, path, tag, dimension)?)
        }
        BLOCK_DECOMPOSITION => Box::new(BlockDecomposition::restore(store, path)?),
        other => return Err(ProposalError::UnknownProposal(other.to_string())),
    };
    if proposal.dimension() != dimension {
        return Err(ProposalError::Configuration(format!(
            "restored proposal has dimension {}, expected {dimension}",
            proposal.dimension()
        )));
    }
    Ok(proposal)
}

/// Rebuild a proposal from the type and dimension recorded below `path`.
pub fn load(store: &dyn ProposalStore, path: &str) -> Result<Box<dyn ProposalFunction>, ProposalError> {
    let tag = store.read_string(&format!("{path}/meta/proposal type"))?;
    let dimension = store.read_u64(&format!("{path}/meta/number of dimensions"))?;
    make(store, path, &tag, dimension as usize)
}
