//! Call arguments
//!
//! Registered functions are invoked with named arguments. Each argument is
//! a [`Value`]: an entity, an address string, or a primitive. The
//! classifier decides which, the preparer acts on it.

use provenant_core::Value;
use std::collections::BTreeMap;

/// Named arguments of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwargs(BTreeMap<String, Value>);

impl Kwargs {
    /// Create an empty argument map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, consuming and returning the map
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Borrow an argument
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Remove an argument
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check for emptiness
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate arguments in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Argument names in order
    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// The underlying map
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Consume into the underlying map
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Kwargs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Kwargs(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
