//! Rill Storage - Operator-scoped bookkeeping storage.
//!
//! Stateful operators (Join, Take) persist small amounts of state across
//! push/fetch calls: window bounds, reference-count markers. This crate
//! provides the `Storage` trait they are injected with and an ordered
//! in-memory implementation.
//!
//! Keys are tuples of [`Value`]s, ordered lexicographically, which gives
//! prefix scans for free. Each operator instance owns its own storage handle,
//! so two subscriptions over the same source never see each other's
//! bookkeeping; discarding the operator discards the storage.
//!
//! This is *not* the authoritative database storage engine - it holds only
//! per-operator-instance bookkeeping.

#![no_std]

extern crate alloc;

mod memory;

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use rill_core::Value;

pub use memory::MemoryStorage;

/// A composite storage key: a tuple of values, ordered lexicographically.
pub type StorageKey = Vec<Value>;

/// Ordered key/value bookkeeping store scoped to one operator instance.
pub trait Storage<V: Clone> {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[Value]) -> Option<V>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&mut self, key: StorageKey, value: V);

    /// Deletes the entry under `key`. Returns true if it existed.
    fn del(&mut self, key: &[Value]) -> bool;

    /// Returns all entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[Value]) -> Vec<(StorageKey, V)>;
}

/// Shared handle to an operator's storage.
pub type StorageHandle<V> = Rc<RefCell<dyn Storage<V>>>;

/// Creates a fresh in-memory storage handle.
pub fn memory_handle<V: Clone + 'static>() -> StorageHandle<V> {
    Rc::new(RefCell::new(MemoryStorage::new()))
}
