//! Entry storage for the two execution modes.
//!
//! Primary keys and unique aliases live in one flat map; an alias is just a
//! second key resolving to the same `Arc<CacheEntry>`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use relmap_core::{FieldRef, KeyValue, TableId};

use crate::entry::CacheEntry;

/// Key of the identity cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `(leaf table, id)`
    Primary { table: TableId, id: KeyValue },
    /// `(unique field, value)`, an alias of some primary entry
    Unique { field: FieldRef, value: KeyValue },
}

impl CacheKey {
    pub fn is_primary(&self) -> bool {
        matches!(self, CacheKey::Primary { .. })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Primary { table, id } => write!(f, "{}/{:?}", table, id),
            CacheKey::Unique { field, value } => {
                write!(f, "{}.{}/{:?}", field.table, field.index, value)
            }
        }
    }
}

/// Map from `CacheKey` to entry.
///
/// `LocalStore` is `!Sync`, so a cache built on it can only be driven from
/// one thread at a time. `SharedStore` is `Sync`; iteration over it is
/// weakly consistent under concurrent inserts and removals.
pub trait EntryStore: Default {
    fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>>;

    /// Insert unless the key is taken. Returns the entry stored under the key
    /// afterwards and whether it is the one passed in.
    fn insert_if_absent(&self, key: CacheKey, entry: Arc<CacheEntry>) -> (Arc<CacheEntry>, bool);

    /// Remove the key if it maps to `entry`.
    fn remove_if_same(&self, key: &CacheKey, entry: &Arc<CacheEntry>) -> bool;

    fn contains(&self, key: &CacheKey) -> bool;

    /// Snapshot of all primary entries.
    fn primary_entries(&self) -> Vec<Arc<CacheEntry>>;

    /// Remove every key; returns the primary entries that were stored.
    fn drain(&self) -> Vec<Arc<CacheEntry>>;

    /// Number of primary entries.
    fn primary_len(&self) -> usize;
}

/// Single-threaded store.
#[derive(Debug, Default)]
pub struct LocalStore {
    map: RefCell<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl EntryStore for LocalStore {
    fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.map.borrow().get(key).cloned()
    }

    fn insert_if_absent(&self, key: CacheKey, entry: Arc<CacheEntry>) -> (Arc<CacheEntry>, bool) {
        match self.map.borrow_mut().entry(key) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => (Arc::clone(slot.insert(entry)), true),
        }
    }

    fn remove_if_same(&self, key: &CacheKey, entry: &Arc<CacheEntry>) -> bool {
        let mut map = self.map.borrow_mut();
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            map.remove(key);
            true
        } else {
            false
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.map.borrow().contains_key(key)
    }

    fn primary_entries(&self) -> Vec<Arc<CacheEntry>> {
        self.map
            .borrow()
            .iter()
            .filter(|(key, _)| key.is_primary())
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    fn drain(&self) -> Vec<Arc<CacheEntry>> {
        self.map
            .borrow_mut()
            .drain()
            .filter(|(key, _)| key.is_primary())
            .map(|(_, entry)| entry)
            .collect()
    }

    fn primary_len(&self) -> usize {
        self.map.borrow().keys().filter(|key| key.is_primary()).count()
    }
}

/// Thread-safe store.
#[derive(Debug, Default)]
pub struct SharedStore {
    map: DashMap<CacheKey, Arc<CacheEntry>>,
}

impl EntryStore for SharedStore {
    fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn insert_if_absent(&self, key: CacheKey, entry: Arc<CacheEntry>) -> (Arc<CacheEntry>, bool) {
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let stored = Arc::clone(&entry);
                slot.insert(entry);
                (stored, true)
            }
        }
    }

    fn remove_if_same(&self, key: &CacheKey, entry: &Arc<CacheEntry>) -> bool {
        self.map
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.map.contains_key(key)
    }

    fn primary_entries(&self) -> Vec<Arc<CacheEntry>> {
        self.map
            .iter()
            .filter(|item| item.key().is_primary())
            .map(|item| Arc::clone(item.value()))
            .collect()
    }

    fn drain(&self) -> Vec<Arc<CacheEntry>> {
        let keys: Vec<CacheKey> = self.map.iter().map(|item| item.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.map.remove(&key))
            .filter(|(key, _)| key.is_primary())
            .map(|(_, entry)| entry)
            .collect()
    }

    fn primary_len(&self) -> usize {
        self.map.iter().filter(|item| item.key().is_primary()).count()
    }
}
