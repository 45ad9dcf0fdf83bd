//! Unique-index registration.
//!
//! Every unique, non-primary field of the row's table chain that holds a
//! non-null value becomes a secondary key of the row's entry. Keys are
//! collected before the entry is stored (so an accessor error leaves the
//! cache untouched) and registered once, first write wins.

use std::sync::Arc;

use relmap_core::{FieldRef, KeyValue, Result, TableId, TableRegistry};

use crate::entry::CacheEntry;
use crate::store::{CacheKey, EntryStore};

/// Secondary keys for the row behind `entry`, walking the chain leaf first.
pub(crate) fn collect_unique_keys(
    registry: &TableRegistry,
    leaf: TableId,
    entry: &CacheEntry,
) -> Result<Vec<CacheKey>> {
    let mut keys = Vec::new();
    for table in registry.chain(leaf) {
        let meta = registry.table(table)?;
        for (index, info) in meta.fields.iter().enumerate() {
            if !info.is_secondary_unique() {
                continue;
            }
            let value = entry.read(info.name)?;
            if value.is_null() {
                continue;
            }
            match KeyValue::from_value(&value) {
                Some(value) => keys.push(CacheKey::Unique {
                    field: FieldRef::new(table, index),
                    value,
                }),
                None => tracing::warn!(
                    table = meta.name,
                    field = info.name,
                    kind = value.type_name(),
                    "Unique value cannot be used as a cache key"
                ),
            }
        }
    }
    Ok(keys)
}

/// Point `key` at `entry` unless another entry holds it. Returns whether
/// `entry` is the one the key resolves to afterwards.
pub(crate) fn register_alias<S: EntryStore>(store: &S, entry: &Arc<CacheEntry>, key: CacheKey) -> bool {
    let (owner, inserted) = store.insert_if_absent(key.clone(), Arc::clone(entry));
    if inserted {
        tracing::trace!(table = entry.table_name(), key = %key, "Registered unique alias");
        entry.push_alias(key);
        true
    } else {
        Arc::ptr_eq(&owner, entry)
    }
}

/// Register all `keys` for `entry`; returns how many now resolve to it.
pub(crate) fn register_all<S: EntryStore>(store: &S, entry: &Arc<CacheEntry>, keys: Vec<CacheKey>) -> usize {
    keys.into_iter()
        .filter(|key| {
            let owned = register_alias(store, entry, key.clone());
            if !owned {
                tracing::debug!(
                    table = entry.table_name(),
                    key = %key,
                    "Unique alias already taken by another entry"
                );
            }
            owned
        })
        .count()
}
