//! Thread-safe state and metrics bags.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// A thread-safe bag for cross-stage signaling state.
///
/// Writes are last-write-wins. Stages in the same wave should write distinct
/// keys; collisions are not guarded.
#[derive(Debug, Default)]
pub struct StateBag {
    data: RwLock<HashMap<String, Value>>,
}

impl StateBag {
    /// Creates a new empty state bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state bag from existing data.
    #[must_use]
    pub fn from_data(data: HashMap<String, Value>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Gets a value from the bag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Sets a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.write().insert(key.into(), value)
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().remove(key)
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.data.read().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// A concurrent metrics accumulator.
///
/// Keys are conventionally namespaced by stage id (`"<stage>.<metric>"`).
#[derive(Debug, Default)]
pub struct MetricsBag {
    entries: DashMap<String, Value>,
}

impl MetricsBag {
    /// Creates a new empty metrics bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a metric, overwriting any previous value.
    pub fn record(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Adds `delta` to a numeric metric, starting from zero.
    pub fn increment(&self, key: impl Into<String>, delta: f64) {
        let mut entry = self.entries.entry(key.into()).or_insert(Value::from(0.0));
        let current = entry.as_f64().unwrap_or(0.0);
        *entry = Value::from(current + delta);
    }

    /// Gets a metric.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Returns a copy of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Returns the number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no metrics have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
