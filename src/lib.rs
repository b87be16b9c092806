//! Likelihood blocks that compare theory predictions with measurements, and
//! adaptive proposal densities for Metropolis-Hastings chains over their
//! parameters.

pub(crate) mod adjacency;
pub(crate) mod constraint;
pub(crate) mod diagnostics;
pub(crate) mod error;
pub(crate) mod log_likelihood;
pub(crate) mod math;
pub(crate) mod roots;
pub(crate) mod state;

pub mod likelihood_block;
pub mod observable_cache;
pub mod proposal;
pub mod storage;

pub use adjacency::AdjacencyMatrix;
pub use constraint::Constraint;
pub use diagnostics::Diagnostics;
pub use error::{AdjacencyError, LikelihoodError, ProposalError};
pub use likelihood_block::{LogLikelihoodBlock, Measurement, TestStatistic};
pub use log_likelihood::LogLikelihood;
pub use observable_cache::{ObservableCache, Parameters, Prediction};
pub use proposal::{ProposalFunction, MultivariateProposal, MultivariateSettings};
pub use state::{ChainState, History};
pub use storage::{HashMapStore, ProposalStore};
