use rustc_hash::FxHashMap;

use super::run_error::RunError;
use crate::value::Value;

/// Map from value names to the tensors which are live during a graph run.
///
/// The store tracks the total size of the tensors it holds, and the largest
/// size it reached, so that the effect of freeing values as soon as they
/// are no longer needed can be measured.
#[derive(Debug, Default)]
pub struct TensorStore {
    values: FxHashMap<String, Value>,
    live_bytes: usize,
    peak_bytes: usize,
}

impl TensorStore {
    pub fn new() -> TensorStore {
        TensorStore::default()
    }

    /// Add a value to the store.
    ///
    /// Fails if a value with the same name is already live.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<(), RunError> {
        if self.values.contains_key(name) {
            return Err(RunError::duplicate_value(name));
        }
        self.live_bytes += value.bytes();
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove a value from the store and return it.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let value = self.values.remove(name)?;
        self.live_bytes -= value.bytes();
        Some(value)
    }

    /// Return the number of live values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Return the total size in bytes of the live values.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Return the largest value of [`live_bytes`](Self::live_bytes) since
    /// the store was created or last cleared.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Remove all values and reset the size statistics.
    pub fn clear(&mut self) {
        self.values.clear();
        self.live_bytes = 0;
        self.peak_bytes = 0;
    }
}
