//! The chain query engine: collect, filter, and fold annotations into single
//! values, ordered lists, or key→value maps. Every query is a single O(n)
//! pass over the unwrap chain and never fails — "no match" is always a
//! defined empty result.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;

use crate::error::annotations;
use crate::kv::{Key, Value};

/// The most recently attached value for `key`, if any.
pub fn value_of(err: &(dyn StdError + 'static), key: &Key) -> Option<Value> {
    annotations(err)
        .find(|node| node.key() == *key)
        .map(|node| node.value())
}

/// Every value attached under `key`, most recent first, duplicates kept.
pub fn values_of(err: &(dyn StdError + 'static), key: &Key) -> Vec<Value> {
    annotations(err)
        .filter(|node| node.key() == *key)
        .map(|node| node.value())
        .collect()
}

/// The most recent value for `key`, downcast to `T`. `None` when the key is
/// absent or the stored value is not a `T`.
pub fn value_as<T>(err: &(dyn StdError + 'static), key: &Key) -> Option<T>
where
    T: Any + Clone,
{
    value_of(err, key)?.downcast_ref::<T>().cloned()
}

/// Every value for `key` that is a `T`, most recent first. Values of other
/// types under the same key are skipped, not errors.
pub fn values_as<T>(err: &(dyn StdError + 'static), key: &Key) -> Vec<T>
where
    T: Any + Clone,
{
    values_of(err, key)
        .iter()
        .filter_map(|v| v.downcast_ref::<T>().cloned())
        .collect()
}

/// One entry per distinct generic key, newest occurrence winning. The four
/// reserved kinds (Op, Severity, Code, Formatter) are excluded; they have
/// dedicated readers.
pub fn value_map(err: &(dyn StdError + 'static)) -> HashMap<Key, Value> {
    let mut map = HashMap::new();
    for node in annotations(err) {
        let key = node.key();
        if key.is_builtin() {
            continue;
        }
        map.entry(key).or_insert_with(|| node.value());
    }
    map
}

/// Like [`value_map`], but restricted to keys whose concrete type is `K`.
/// Supports heterogeneous context maps keyed by arbitrary types.
pub fn value_map_of<K: Any>(err: &(dyn StdError + 'static)) -> HashMap<Key, Value> {
    let shape = TypeId::of::<K>();
    let mut map = HashMap::new();
    for node in annotations(err) {
        let key = node.key();
        if key.type_id() != shape {
            continue;
        }
        map.entry(key).or_insert_with(|| node.value());
    }
    map
}

/// Every value per key of concrete type `K`, each list most recent first.
pub fn values_map_of<K: Any>(err: &(dyn StdError + 'static)) -> HashMap<Key, Vec<Value>> {
    let shape = TypeId::of::<K>();
    let mut map: HashMap<Key, Vec<Value>> = HashMap::new();
    for node in annotations(err) {
        let key = node.key();
        if key.type_id() != shape {
            continue;
        }
        map.entry(key).or_default().push(node.value());
    }
    map
}

/// Generic context entries in attachment order, most recent first, one entry
/// per distinct key (newest wins). This is what the default formatter renders
/// between braces; exposed because "ordered context" is useful at boundaries
/// that bypass [`crate::format`].
pub fn context_entries(err: &(dyn StdError + 'static)) -> Vec<(Key, Value)> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for node in annotations(err) {
        let key = node.key();
        if key.is_builtin() {
            continue;
        }
        if seen.insert(key.clone()) {
            entries.push((key, node.value()));
        }
    }
    entries
}
