use thiserror::Error;

/// Errors raised while building or evaluating likelihood blocks.
///
/// A non-finite log-density is not an error: blocks return it as a value and
/// the aggregator turns it into `-inf`, so that a sampler can simply reject
/// the point.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    #[error("invalid likelihood configuration: {0}")]
    Configuration(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("contribution to the uniform bound must be non-negative, found {0}")]
    NegativeContribution(f64),
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("invalid proposal configuration: {0}")]
    Configuration(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("cannot estimate a sample covariance from {0} points")]
    InsufficientHistory(usize),
    #[error("proposal '{0}' is unknown")]
    UnknownProposal(String),
    #[error("could not access proposal storage")]
    Storage(#[from] anyhow::Error),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdjacencyError {
    #[error("cannot add another state, capacity of {0} clusters reached")]
    Full(usize),
    #[error("jumps within one component ({0}) are not implemented")]
    SameComponent(usize),
    #[error("cluster index {index} out of range for {clusters} clusters")]
    OutOfRange { index: usize, clusters: usize },
    #[error("state of dimension {found} does not match the earlier states of dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}
