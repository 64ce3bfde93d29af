//! Collection kinds and the key table.
//!
//! Every key the store knows about is registered here together with the
//! merge semantics that apply to it. Adding a collection is a table edit.

use crate::{merge, Key};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field that identifies a record inside a record-list collection.
pub const RECORD_ID_FIELD: &str = "id";

/// Stable storage keys used by the study application.
pub mod keys {
    pub const ARTICLES: &str = "english_listening_articles";
    pub const WORD_MARKS: &str = "english_listening_word_marks";
    pub const TASKS: &str = "english_listening_tasks";
    pub const STUDY_HISTORY: &str = "english_listening_study_history";
    pub const ACTIVITY_LOG: &str = "english_listening_activity_log";
    pub const VOCAB_META: &str = "english_listening_vocab_meta";
    pub const AI_API_KEY: &str = "english_listening_ai_api_key";
    pub const AI_BASE_URL: &str = "english_listening_ai_base_url";
    pub const TTS_ACCENT: &str = "english_listening_tts_accent";
}

/// Merge semantics tag for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionKind {
    /// Ordered list of records, unique by [`RECORD_ID_FIELD`]
    RecordList,
    /// String key to small attribute object
    FlatMap,
    /// Date key to list of entries, deduplicated structurally
    NestedRecordList,
    /// Date key to integer count
    CounterMap,
    /// Single primitive value
    Scalar,
}

impl CollectionKind {
    /// Merge a local and a remote document of this kind.
    pub fn merge(self, local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
        merge::merge(self, local, remote)
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionKind::RecordList => write!(f, "record-list"),
            CollectionKind::FlatMap => write!(f, "flat-map"),
            CollectionKind::NestedRecordList => write!(f, "nested-record-list"),
            CollectionKind::CounterMap => write!(f, "counter-map"),
            CollectionKind::Scalar => write!(f, "scalar"),
        }
    }
}

/// A registered collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDef {
    pub key: Key,
    pub kind: CollectionKind,
}

/// Lookup table from key to collection kind.
///
/// Iteration follows registration order so reconciliation visits keys
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTable {
    collections: Vec<CollectionDef>,
}

impl CollectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            collections: Vec::new(),
        }
    }

    /// Register a collection. Re-registering a key replaces its kind.
    pub fn with(mut self, key: impl Into<Key>, kind: CollectionKind) -> Self {
        self.register(key, kind);
        self
    }

    /// Register a collection in place.
    pub fn register(&mut self, key: impl Into<Key>, kind: CollectionKind) {
        let key = key.into();
        match self.collections.iter_mut().find(|c| c.key == key) {
            Some(existing) => existing.kind = kind,
            None => self.collections.push(CollectionDef { key, kind }),
        }
    }

    /// Kind registered for a key.
    pub fn kind(&self, key: &str) -> Option<CollectionKind> {
        self.collections
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.kind)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.kind(key).is_some()
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|c| c.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionDef> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl Default for CollectionTable {
    /// The study application's fixed key set.
    fn default() -> Self {
        Self::new()
            .with(keys::ARTICLES, CollectionKind::RecordList)
            .with(keys::WORD_MARKS, CollectionKind::FlatMap)
            .with(keys::TASKS, CollectionKind::RecordList)
            .with(keys::STUDY_HISTORY, CollectionKind::CounterMap)
            .with(keys::ACTIVITY_LOG, CollectionKind::NestedRecordList)
            .with(keys::VOCAB_META, CollectionKind::FlatMap)
            .with(keys::AI_API_KEY, CollectionKind::Scalar)
            .with(keys::AI_BASE_URL, CollectionKind::Scalar)
            .with(keys::TTS_ACCENT, CollectionKind::Scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_table_covers_all_keys() {
        let table = CollectionTable::default();
        assert_eq!(table.len(), 9);
        assert_eq!(table.kind(keys::TASKS), Some(CollectionKind::RecordList));
        assert_eq!(table.kind(keys::VOCAB_META), Some(CollectionKind::FlatMap));
        assert_eq!(
            table.kind(keys::STUDY_HISTORY),
            Some(CollectionKind::CounterMap)
        );
        assert_eq!(
            table.kind(keys::ACTIVITY_LOG),
            Some(CollectionKind::NestedRecordList)
        );
        assert_eq!(table.kind(keys::AI_API_KEY), Some(CollectionKind::Scalar));
        assert_eq!(table.kind("unknown"), None);
    }

    #[test]
    fn keys_keep_registration_order() {
        let table = CollectionTable::new()
            .with("b", CollectionKind::Scalar)
            .with("a", CollectionKind::FlatMap);
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn reregistering_replaces_kind() {
        let table = CollectionTable::new()
            .with("a", CollectionKind::Scalar)
            .with("a", CollectionKind::CounterMap);
        assert_eq!(table.len(), 1);
        assert_eq!(table.kind("a"), Some(CollectionKind::CounterMap));
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_value(CollectionKind::NestedRecordList).unwrap();
        assert_eq!(json, json!("nested-record-list"));
        assert_eq!(CollectionKind::RecordList.to_string(), "record-list");
    }

    #[test]
    fn kind_dispatches_merge() {
        let merged = CollectionKind::Scalar.merge(Some(&json!("local")), Some(&json!("remote")));
        assert_eq!(merged, Some(json!("local")));
    }
}
