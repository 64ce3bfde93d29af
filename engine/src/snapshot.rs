//! Snapshots of a user's documents.
//!
//! A snapshot is the unit exchanged with the remote side: one JSON document
//! per key. Keys are kept in a `BTreeMap` so serialization is deterministic.

use crate::{error::Result, CollectionTable, Error, Key};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mapping from collection key to document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    documents: BTreeMap<Key, Value>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a document. `null` documents are reported as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.documents.get(key).filter(|v| !v.is_null())
    }

    /// Insert or replace a document.
    pub fn insert(&mut self, key: impl Into<Key>, value: Value) {
        self.documents.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.documents.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.documents.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop documents whose key is not registered in the table.
    ///
    /// Returns the dropped keys.
    pub fn retain_known(&mut self, table: &CollectionTable) -> Vec<Key> {
        let unknown: Vec<Key> = self
            .documents
            .keys()
            .filter(|k| !table.contains(k))
            .cloned()
            .collect();
        for key in &unknown {
            self.documents.remove(key);
        }
        unknown
    }

    /// Build a snapshot from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                documents: map.into_iter().collect(),
            }),
            other => Err(Error::InvalidSnapshot(format!(
                "expected an object of documents, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Convert into a JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.documents.into_iter().collect())
    }

    /// Serialize to JSON with deterministic key ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        Self::from_value(value)
    }
}

impl FromIterator<(Key, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        Self {
            documents: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (Key, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
