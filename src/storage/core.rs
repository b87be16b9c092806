use anyhow::{anyhow, Result};

/// A single record written by a proposal when dumping its state.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F64(Vec<f64>),
    U64(Vec<u64>),
    Strings(Vec<String>),
    ScalarF64(f64),
    ScalarU64(u64),
    ScalarString(String),
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::F64(value)
    }
}
impl From<Vec<u64>> for Value {
    fn from(value: Vec<u64>) -> Self {
        Value::U64(value)
    }
}
impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::Strings(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::ScalarF64(value)
    }
}
impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::ScalarU64(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::ScalarString(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::ScalarString(value.to_string())
    }
}

/// Hierarchical key-value store that proposals dump their state into.
///
/// Paths are slash separated, e.g. `"chain 0/proposal/scalars/adaptations"`.
pub trait ProposalStore {
    /// Write `value` at `path`, replacing anything stored there before.
    fn write(&mut self, path: &str, value: Value) -> Result<()>;

    /// Read the value stored at `path`.
    fn read(&self, path: &str) -> Result<Value>;

    fn read_f64(&self, path: &str) -> Result<f64> {
        match self.read(path)? {
            Value::ScalarF64(value) => Ok(value),
            other => Err(anyhow!("expected a float at '{path}', found {other:?}")),
        }
    }

    fn read_u64(&self, path: &str) -> Result<u64> {
        match self.read(path)? {
            Value::ScalarU64(value) => Ok(value),
            other => Err(anyhow!("expected an integer at '{path}', found {other:?}")),
        }
    }

    fn read_string(&self, path: &str) -> Result<String> {
        match self.read(path)? {
            Value::ScalarString(value) => Ok(value),
            other => Err(anyhow!("expected a string at '{path}', found {other:?}")),
        }
    }

    fn read_f64_array(&self, path: &str) -> Result<Vec<f64>> {
        match self.read(path)? {
            Value::F64(value) => Ok(value),
            other => Err(anyhow!("expected a float array at '{path}', found {other:?}")),
        }
    }

    fn read_strings(&self, path: &str) -> Result<Vec<String>> {
        match self.read(path)? {
            Value::Strings(value) => Ok(value),
            other => Err(anyhow!("expected a string array at '{path}', found {other:?}")),
        }
    }
}
