//! Caller-supplied live session options.
//!
//! Options are an open key/value map, passed through to the speech service
//! as query parameters without validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Options for a live session, e.g. `model`, `language`, `smart_format`.
///
/// Keys are kept sorted so the generated query string is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveOptions(BTreeMap<String, Value>);

impl LiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten the options into query pairs.
    ///
    /// - strings are used verbatim
    /// - numbers and booleans use their JSON text
    /// - arrays repeat the key once per element
    /// - nulls are skipped
    /// - objects are sent as JSON text
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = scalar_text(item) {
                            pairs.push((key.clone(), text));
                        }
                    }
                }
                other => {
                    if let Some(text) = scalar_text(other) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
        }
        pairs
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl From<Map<String, Value>> for LiveOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for LiveOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
