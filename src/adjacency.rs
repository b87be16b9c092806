//! Jump vectors between the representative states of several clusters.

use crate::error::AdjacencyError;
use crate::state::ChainState;

/// Differences between every pair of cluster representatives.
///
/// The vectors are stored like the strict upper triangle of an `n x n`
/// matrix, row by row: `(0, 1), (0, 2), ..., (0, n-1), (1, 2), ...`.
#[derive(Clone, Debug, Default)]
pub struct AdjacencyMatrix {
    jumps: Vec<Option<Vec<f64>>>,
    states: Vec<ChainState>,
    clusters: usize,
}

impl AdjacencyMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare room for `clusters` states, discarding any existing ones.
    pub fn reserve(&mut self, clusters: usize) {
        self.jumps = vec![None; clusters * clusters.saturating_sub(1) / 2];
        self.states = Vec::with_capacity(clusters);
        self.clusters = clusters;
    }

    /// Position of the pair `i < j`.
    fn position(&self, i: usize, j: usize) -> usize {
        (2 * self.clusters - i - 1) * i / 2 + j - i - 1
    }

    /// Store `state` and its difference to every state added before.
    pub fn add(&mut self, state: ChainState) -> Result<(), AdjacencyError> {
        if self.states.len() == self.clusters {
            return Err(AdjacencyError::Full(self.clusters));
        }
        if let Some(first) = self.states.first() {
            if first.point.len() != state.point.len() {
                return Err(AdjacencyError::DimensionMismatch {
                    expected: first.point.len(),
                    found: state.point.len(),
                });
            }
        }
        let j = self.states.len();
        for i in 0..j {
            let difference = state
                .point
                .iter()
                .zip(&self.states[i].point)
                .map(|(new, old)| new - old)
                .collect();
            let position = self.position(i, j);
            self.jumps[position] = Some(difference);
        }
        self.states.push(state);
        Ok(())
    }

    /// Zero every coordinate outside `subset` in all stored jumps.
    pub fn indices(&mut self, subset: &[usize]) {
        for jump in self.jumps.iter_mut().flatten() {
            for (k, value) in jump.iter_mut().enumerate() {
                if !subset.contains(&k) {
                    *value = 0.0;
                }
            }
        }
    }

    /// The jump from the lower to the higher of the two indices.
    pub fn jump(&self, i: usize, j: usize) -> Result<&[f64], AdjacencyError> {
        if i == j {
            return Err(AdjacencyError::SameComponent(i));
        }
        let (low, high) = if i < j { (i, j) } else { (j, i) };
        if high >= self.states.len() {
            return Err(AdjacencyError::OutOfRange {
                index: high,
                clusters: self.states.len(),
            });
        }
        self.jumps[self.position(low, high)]
            .as_deref()
            .ok_or(AdjacencyError::OutOfRange {
                index: high,
                clusters: self.states.len(),
            })
    }

    pub fn state(&self, i: usize) -> Result<&ChainState, AdjacencyError> {
        self.states.get(i).ok_or(AdjacencyError::OutOfRange {
            index: i,
            clusters: self.states.len(),
        })
    }

    pub fn number_of_clusters(&self) -> usize {
        self.clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn three_states() -> AdjacencyMatrix {
        let mut adjacency = AdjacencyMatrix::new();
        adjacency.reserve(3);
        for point in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]] {
            adjacency.add(ChainState::new(point.to_vec())).unwrap();
        }
        adjacency
    }

    #[test]
    fn jumps_between_three_states() {
        let adjacency = three_states();
        assert_eq!(adjacency.jump(0, 1).unwrap(), &[1.0, 0.0]);
        assert_eq!(adjacency.jump(0, 2).unwrap(), &[0.0, 1.0]);
        assert_eq!(adjacency.jump(1, 2).unwrap(), &[-1.0, 1.0]);
        assert_eq!(adjacency.jump(2, 1).unwrap(), &[-1.0, 1.0]);
        assert_eq!(adjacency.state(1).unwrap().point(), &[1.0, 0.0]);
        assert_eq!(adjacency.number_of_clusters(), 3);
    }

    #[test]
    fn capacity_and_invalid_pairs() {
        let mut adjacency = three_states();
        assert_eq!(
            adjacency.add(ChainState::new(vec![5.0, 5.0])),
            Err(AdjacencyError::Full(3))
        );
        assert_eq!(adjacency.jump(1, 1), Err(AdjacencyError::SameComponent(1)));
        assert_eq!(
            adjacency.jump(0, 3),
            Err(AdjacencyError::OutOfRange { index: 3, clusters: 3 })
        );

        adjacency.reserve(4);
        adjacency.add(ChainState::new(vec![0.0])).unwrap();
        assert!(adjacency.jump(0, 1).is_err());
    }

    #[test]
    fn states_must_share_a_dimension() {
        let mut adjacency = AdjacencyMatrix::new();
        adjacency.reserve(2);
        adjacency.add(ChainState::new(vec![0.0, 1.0])).unwrap();
        assert_eq!(
            adjacency.add(ChainState::new(vec![2.0])),
            Err(AdjacencyError::DimensionMismatch { expected: 2, found: 1 })
        );
        adjacency.add(ChainState::new(vec![2.0, 2.0])).unwrap();
        assert_eq!(adjacency.jump(0, 1).unwrap(), &[2.0, 1.0]);
    }

    #[test]
    fn restrict_to_subspace() {
        let mut adjacency = three_states();
        adjacency.indices(&[1]);
        assert_eq!(adjacency.jump(0, 1).unwrap(), &[0.0, 0.0]);
        assert_eq!(adjacency.jump(1, 2).unwrap(), &[0.0, 1.0]);
    }
}
