use anyhow::{anyhow, Result};
use itertools::Itertools;
use std::collections::HashMap;

use crate::storage::{ProposalStore, Value};

/// In-memory proposal store.
#[derive(Debug, Clone, Default)]
pub struct HashMapStore {
    values: HashMap<String, Value>,
}

impl HashMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All paths starting with `prefix`, sorted.
    pub fn paths(&self, prefix: &str) -> Vec<&str> {
        self.values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| key.as_str())
            .sorted()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ProposalStore for HashMapStore {
    fn write(&mut self, path: &str, value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(anyhow!("cannot write to an empty path"));
        }
        self.values.insert(path.to_string(), value);
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Value> {
        self.values
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("nothing stored at '{path}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn typed_reads() {
        let mut store = HashMapStore::new();
        store.write("a/scale", 0.5.into()).unwrap();
        store.write("a/count", 3u64.into()).unwrap();
        store.write("a/tag", "MultivariateGaussian".into()).unwrap();
        store.write("b/matrix", vec![1.0, 2.0].into()).unwrap();

        assert_eq!(store.read_f64("a/scale").unwrap(), 0.5);
        assert_eq!(store.read_u64("a/count").unwrap(), 3);
        assert_eq!(store.read_string("a/tag").unwrap(), "MultivariateGaussian");
        assert_eq!(store.read_f64_array("b/matrix").unwrap(), vec![1.0, 2.0]);
        assert_eq!(
            store.paths("a/"),
            vec!["a/count", "a/scale", "a/tag"]
        );
    }

    #[test]
    fn mismatched_reads_fail() {
        let mut store = HashMapStore::new();
        store.write("x", 1u64.into()).unwrap();
        assert!(store.read_f64("x").is_err());
        assert!(store.read("y").is_err());
        assert!(store.write("", 1.0.into()).is_err());
    }
}
