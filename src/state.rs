use std::ops::Deref;

/// A point visited by a Markov chain together with its densities.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainState {
    pub point: Vec<f64>,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub log_posterior: f64,
}

impl ChainState {
    pub fn new(point: Vec<f64>) -> Self {
        Self {
            point,
            log_likelihood: f64::NAN,
            log_prior: f64::NAN,
            log_posterior: f64::NAN,
        }
    }

    pub fn point(&self) -> &[f64] {
        &self.point
    }
}

impl From<Vec<f64>> for ChainState {
    fn from(point: Vec<f64>) -> Self {
        Self::new(point)
    }
}

/// The states visited by one chain, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    states: Vec<ChainState>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ChainState) {
        self.states.push(state);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

impl Deref for History {
    type Target = [ChainState];

    fn deref(&self) -> &[ChainState] {
        &self.states
    }
}

impl FromIterator<ChainState> for History {
    fn from_iter<T: IntoIterator<Item = ChainState>>(iter: T) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}
