//! Merge strategies for combining a local and a remote document.
//!
//! All functions here are pure: the same inputs always produce the same
//! output and nothing is read from or written to storage.
//!
//! # Rules
//!
//! - An absent side (missing or JSON `null`) yields the other side unchanged,
//!   except that a record list still collapses repeated ids.
//! - Record lists are keyed by record id; remote records are inserted first,
//!   then local records overwrite them, so local wins ties.
//! - Flat maps and counter maps take `{...remote, ...local}`. Counters are
//!   replaced, never summed.
//! - Nested record lists keep each date's local entries and append the
//!   remote entries whose serialized form is not already among them.
//! - Scalars take the local value when present.
//!
//! A side whose JSON shape does not match its collection kind is treated as
//! absent. When neither side has the expected shape, local wins.

use crate::collection::{CollectionKind, RECORD_ID_FIELD};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Merge two documents of the given kind.
///
/// Returns `None` only when both sides are absent.
pub fn merge(kind: CollectionKind, local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
    let local = local.filter(|v| !v.is_null());
    let remote = remote.filter(|v| !v.is_null());

    match (local, remote) {
        (None, None) => None,
        (Some(only), None) | (None, Some(only)) => Some(normalize(kind, only)),
        (Some(local), Some(remote)) => Some(match kind {
            CollectionKind::RecordList => merge_record_lists(local, remote),
            CollectionKind::FlatMap | CollectionKind::CounterMap => merge_flat_maps(local, remote),
            CollectionKind::NestedRecordList => merge_nested_record_lists(local, remote),
            CollectionKind::Scalar => local.clone(),
        }),
    }
}

/// A document merged against nothing. Record lists still collapse repeated
/// ids so every merge result satisfies the same invariants.
fn normalize(kind: CollectionKind, document: &Value) -> Value {
    match kind {
        CollectionKind::RecordList if document.is_array() => {
            merge_record_lists(document, &Value::Array(Vec::new()))
        }
        _ => document.clone(),
    }
}

/// Union two record lists by id, local records overriding remote ones.
pub fn merge_record_lists(local: &Value, remote: &Value) -> Value {
    let (local, remote) = match (local.as_array(), remote.as_array()) {
        (Some(l), Some(r)) => (l, r),
        _ => return shape_fallback(local, remote, Value::is_array),
    };

    // Insertion-ordered map: a later insert for a known id keeps the slot.
    let mut records: Vec<Value> = Vec::with_capacity(local.len() + remote.len());
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.capacity());

    for record in remote.iter().chain(local.iter()) {
        let identity = record_identity(record);
        match slots.get(&identity) {
            Some(&slot) => records[slot] = record.clone(),
            None => {
                slots.insert(identity, records.len());
                records.push(record.clone());
            }
        }
    }

    Value::Array(records)
}

/// Shallow union of two objects, local values winning.
pub fn merge_flat_maps(local: &Value, remote: &Value) -> Value {
    let (local, remote) = match (local.as_object(), remote.as_object()) {
        (Some(l), Some(r)) => (l, r),
        _ => return shape_fallback(local, remote, Value::is_object),
    };

    let mut merged = remote.clone();
    for (key, value) in local {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

/// Per-key union of two maps of entry lists, deduplicated structurally.
pub fn merge_nested_record_lists(local: &Value, remote: &Value) -> Value {
    let (local, remote) = match (local.as_object(), remote.as_object()) {
        (Some(l), Some(r)) => (l, r),
        _ => return shape_fallback(local, remote, Value::is_object),
    };

    let mut merged = Map::new();
    for (date, entries) in remote {
        if !local.contains_key(date) {
            merged.insert(date.clone(), entries.clone());
        }
    }
    for (date, local_entries) in local {
        let value = match remote.get(date) {
            Some(remote_entries) => union_entries(local_entries, remote_entries),
            None => local_entries.clone(),
        };
        merged.insert(date.clone(), value);
    }
    Value::Object(merged)
}

fn union_entries(local: &Value, remote: &Value) -> Value {
    let (local, remote) = match (local.as_array(), remote.as_array()) {
        (Some(l), Some(r)) => (l, r),
        _ => return shape_fallback(local, remote, Value::is_array),
    };

    // Only cross-side copies collapse. Repeats within one side are kept so a
    // one-sided date and a two-sided date merge the same way on a re-merge.
    let present: HashSet<String> = local.iter().map(Value::to_string).collect();
    let entries = local
        .iter()
        .chain(remote.iter().filter(|entry| !present.contains(&entry.to_string())))
        .cloned()
        .collect();
    Value::Array(entries)
}

/// Identity of a record in a record list.
///
/// Records without an id are identified by their full serialized content,
/// so they survive the merge and only exact copies collapse.
fn record_identity(record: &Value) -> String {
    match record.get(RECORD_ID_FIELD) {
        Some(id) if !id.is_null() => format!("id:{id}"),
        _ => format!("value:{record}"),
    }
}

fn shape_fallback(local: &Value, remote: &Value, well_formed: fn(&Value) -> bool) -> Value {
    if well_formed(local) || !well_formed(remote) {
        local.clone()
    } else {
        remote.clone()
    }
}
