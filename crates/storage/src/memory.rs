//! In-memory `Storage` implementation over an ordered map.

use crate::{Storage, StorageKey};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use rill_core::Value;

/// Ordered in-memory key/value store.
///
/// Backed by a `BTreeMap` keyed by value tuples; prefix scans walk the range
/// starting at the prefix and stop at the first non-matching key.
pub struct MemoryStorage<V> {
    entries: BTreeMap<StorageKey, V>,
}

impl<V> MemoryStorage<V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for MemoryStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Storage<V> for MemoryStorage<V> {
    fn get(&self, key: &[Value]) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: StorageKey, value: V) {
        self.entries.insert(key, value);
    }

    fn del(&mut self, key: &[Value]) -> bool {
        self.entries.remove(key).is_some()
    }

    fn scan_prefix(&self, prefix: &[Value]) -> Vec<(StorageKey, V)> {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
