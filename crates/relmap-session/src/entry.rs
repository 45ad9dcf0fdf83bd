//! Cache entries.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use relmap_core::{Accessor, Entity, KeyValue, Result, TableId, Value};

use crate::change::{ChangeToken, TokenSlot, Tracked};
use crate::store::CacheKey;

/// Type-erased handle on a cached instance and its accessor.
pub(crate) trait RowBinding: Send + Sync {
    fn read(&self, field: &str) -> Result<Value>;

    /// Write without recording a change.
    fn write_untracked(&self, field: &str, value: Value) -> Result<()>;

    /// A clone of the `Arc<Tracked<M>>`, boxed for downcasting.
    fn instance(&self) -> Box<dyn Any + Send + Sync>;

    fn slot(&self) -> &TokenSlot;

    fn type_name(&self) -> &'static str;
}

struct Binding<M: Entity> {
    instance: Arc<Tracked<M>>,
}

impl<M: Entity> RowBinding for Binding<M> {
    fn read(&self, field: &str) -> Result<Value> {
        M::accessor().get(&self.instance.read(), field)
    }

    fn write_untracked(&self, field: &str, value: Value) -> Result<()> {
        M::accessor().set(&mut *self.instance.write_untracked(), field, value)
    }

    fn instance(&self) -> Box<dyn Any + Send + Sync> {
        Box::new(Arc::clone(&self.instance))
    }

    fn slot(&self) -> &TokenSlot {
        self.instance.slot()
    }

    fn type_name(&self) -> &'static str {
        type_name::<M>()
    }
}

/// One cached row: the id captured at registration, the leaf table, the
/// instance, its changed-field set and the unique aliases it owns.
pub struct CacheEntry {
    table: TableId,
    table_name: &'static str,
    id: Value,
    key: KeyValue,
    binding: Box<dyn RowBinding>,
    token: ChangeToken,
    aliases: Mutex<Vec<CacheKey>>,
}

impl CacheEntry {
    pub(crate) fn new<M: Entity>(
        table: TableId,
        table_name: &'static str,
        id: Value,
        key: KeyValue,
        instance: Arc<Tracked<M>>,
    ) -> Self {
        Self {
            table,
            table_name,
            id,
            key,
            binding: Box::new(Binding { instance }),
            token: ChangeToken::new(),
            aliases: Mutex::new(Vec::new()),
        }
    }

    /// Leaf table of the row.
    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    /// The id captured when the row was cached.
    pub fn id(&self) -> &Value {
        &self.id
    }

    pub(crate) fn key(&self) -> &KeyValue {
        &self.key
    }

    /// Changed field names, sorted.
    pub fn changed_fields(&self) -> Vec<String> {
        self.token.snapshot()
    }

    pub fn is_dirty(&self) -> bool {
        !self.token.is_empty()
    }

    /// The cached instance, if it is an `M`.
    pub fn instance<M: Entity>(&self) -> Option<Arc<Tracked<M>>> {
        self.binding.instance().downcast::<Arc<Tracked<M>>>().ok().map(|b| *b)
    }

    /// Rust type name of the cached instance.
    pub fn type_name(&self) -> &'static str {
        self.binding.type_name()
    }

    /// Secondary keys registered for this row.
    pub fn aliases(&self) -> Vec<CacheKey> {
        self.aliases.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn push_alias(&self, key: CacheKey) {
        self.aliases.lock().unwrap_or_else(PoisonError::into_inner).push(key);
    }

    pub(crate) fn read(&self, field: &str) -> Result<Value> {
        self.binding.read(field)
    }

    pub(crate) fn write_untracked(&self, field: &str, value: Value) -> Result<()> {
        self.binding.write_untracked(field, value)
    }

    pub(crate) fn token(&self) -> &ChangeToken {
        &self.token
    }

    pub(crate) fn slot(&self) -> &TokenSlot {
        self.binding.slot()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("table", &self.table_name)
            .field("id", &self.id)
            .field("type", &self.type_name())
            .field("changed", &self.token.snapshot())
            .field("aliases", &self.aliases())
            .finish()
    }
}
