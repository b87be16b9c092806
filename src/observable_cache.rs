//! Parameters, predictions and the cache that holds their current values.

use std::fmt::Debug;
use std::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParameterId(usize);

/// Named parameter values of one chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    names: Vec<String>,
    values: Vec<f64>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter, or look up the existing one of the same name.
    /// An existing parameter keeps its current value.
    pub fn declare(&mut self, name: &str, value: f64) -> ParameterId {
        if let Some(id) = self.id(name) {
            return id;
        }
        self.names.push(name.to_string());
        self.values.push(value);
        ParameterId(self.values.len() - 1)
    }

    pub fn id(&self, name: &str) -> Option<ParameterId> {
        self.names.iter().position(|n| n == name).map(ParameterId)
    }

    pub fn name(&self, id: ParameterId) -> &str {
        &self.names[id.0]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Overwrite all values at once, e.g. with a proposed point.
    pub fn set_values(&mut self, values: &[f64]) {
        assert!(values.len() == self.values.len());
        self.values.copy_from_slice(values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Index<ParameterId> for Parameters {
    type Output = f64;

    fn index(&self, id: ParameterId) -> &f64 {
        &self.values[id.0]
    }
}

impl IndexMut<ParameterId> for Parameters {
    fn index_mut(&mut self, id: ParameterId) -> &mut f64 {
        &mut self.values[id.0]
    }
}

/// A theory prediction of one observable as a function of the parameters.
pub trait Prediction: Debug + Send + Sync {
    /// Unique name, used to share one cache slot between identical predictions.
    fn name(&self) -> &str;

    fn evaluate(&self, parameters: &Parameters) -> f64;

    fn clone_prediction(&self) -> Box<dyn Prediction>;
}

/// Prediction that equals the value of a single parameter.
#[derive(Clone, Debug)]
pub struct ParameterPrediction {
    name: String,
    id: ParameterId,
}

impl ParameterPrediction {
    pub fn new(parameters: &Parameters, id: ParameterId) -> Self {
        Self {
            name: format!("parameter[{}]", parameters.name(id)),
            id,
        }
    }
}

impl Prediction for ParameterPrediction {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, parameters: &Parameters) -> f64 {
        parameters[self.id]
    }

    fn clone_prediction(&self) -> Box<dyn Prediction> {
        Box::new(self.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObservableId(usize);

/// Registered predictions together with their most recently computed values.
#[derive(Debug, Default)]
pub struct ObservableCache {
    predictions: Vec<Box<dyn Prediction>>,
    values: Vec<f64>,
}

impl ObservableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prediction. Predictions with the same name share one slot.
    pub fn add(&mut self, prediction: Box<dyn Prediction>) -> ObservableId {
        if let Some(pos) = self
            .predictions
            .iter()
            .position(|p| p.name() == prediction.name())
        {
            return ObservableId(pos);
        }
        self.predictions.push(prediction);
        self.values.push(f64::NAN);
        ObservableId(self.values.len() - 1)
    }

    /// Register the prediction behind `id` of another cache in this one,
    /// copying its current value.
    pub fn adopt(&mut self, source: &ObservableCache, id: ObservableId) -> ObservableId {
        let new_id = self.add(source.predictions[id.0].clone_prediction());
        self.values[new_id.0] = source.values[id.0];
        new_id
    }

    /// Recompute every registered prediction.
    pub fn update(&mut self, parameters: &Parameters) {
        for (value, prediction) in self.values.iter_mut().zip(self.predictions.iter()) {
            *value = prediction.evaluate(parameters);
        }
    }

    /// Overwrite a cached value. The next [`ObservableCache::update`] replaces it again.
    pub fn set_value(&mut self, id: ObservableId, value: f64) {
        self.values[id.0] = value;
    }

    pub fn prediction(&self, id: ObservableId) -> &dyn Prediction {
        self.predictions[id.0].as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Clone for ObservableCache {
    fn clone(&self) -> Self {
        Self {
            predictions: self.predictions.iter().map(|p| p.clone_prediction()).collect(),
            values: self.values.clone(),
        }
    }
}

impl Index<ObservableId> for ObservableCache {
    type Output = f64;

    fn index(&self, id: ObservableId) -> &f64 {
        &self.values[id.0]
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Parameters plus a cache whose predictions are the parameters themselves.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct Fixture {
        pub(crate) parameters: Parameters,
        pub(crate) cache: ObservableCache,
    }

    impl Fixture {
        pub(crate) fn observable(&mut self, name: &str, value: f64) -> (ParameterId, ObservableId) {
            let parameter = self.parameters.declare(name, value);
            let id = self
                .cache
                .add(Box::new(ParameterPrediction::new(&self.parameters, parameter)));
            self.cache.update(&self.parameters);
            (parameter, id)
        }

        pub(crate) fn set(&mut self, parameter: ParameterId, value: f64) {
            self.parameters[parameter] = value;
            self.cache.update(&self.parameters);
        }
    }
}
