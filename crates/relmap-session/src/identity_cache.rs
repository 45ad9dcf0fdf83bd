//! Session-scoped identity cache.
//!
//! The cache guarantees at most one entry per `(leaf table, id)` and
//! resolves unique non-primary fields to the same entry. Mutations of
//! cached instances are recorded through change tokens; `changed_blocks`
//! turns every dirty entry into an UPDATE without touching cache state.
//!
//! # Example
//!
//! ```ignore
//! let cache = LocalIdentityCache::new(registry.clone());
//!
//! let order = cache.put_if_absent(orders, Tracked::shared(order))?;
//! order.mutate("set_name", |o| o.name = "b".to_string());
//!
//! for block in cache.changed_blocks()? {
//!     let affected = executor.run(block.statement())?;
//!     if !block.is_conflict(affected) {
//!         block.success()?;
//!     }
//! }
//! ```

use std::any::type_name;
use std::sync::Arc;

use relmap_core::{
    CacheError, CacheErrorKind, Entity, FieldRef, KeyValue, Result, TableId, TableRegistry,
    TypeError, Value,
};
use relmap_statement::{Assignment, DefaultStatementBuilder, StatementBuilder, UpdateRequest};

use crate::block::CacheBlock;
use crate::change::{EntityChangeObserver, SlotObserver, Tracked};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::optimistic::OptimisticLock;
use crate::store::{CacheKey, EntryStore, LocalStore, SharedStore};
use crate::unique;

/// Identity cache over a store type that fixes the execution mode.
pub struct IdentityCache<S: EntryStore = LocalStore> {
    registry: Arc<TableRegistry>,
    builder: Arc<dyn StatementBuilder>,
    observer: Arc<dyn EntityChangeObserver>,
    config: CacheConfig,
    store: S,
}

/// Cache for sessions driven by one thread.
pub type LocalIdentityCache = IdentityCache<LocalStore>;

/// Cache for sessions whose stages may run on different threads.
pub type SharedIdentityCache = IdentityCache<SharedStore>;

impl<S: EntryStore> IdentityCache<S> {
    /// Create a cache with the default statement builder, the slot observer
    /// and the default configuration.
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self::with_config(registry, CacheConfig::default())
    }

    pub fn with_config(registry: Arc<TableRegistry>, config: CacheConfig) -> Self {
        Self {
            registry,
            builder: Arc::new(DefaultStatementBuilder::new()),
            observer: Arc::new(SlotObserver),
            config,
            store: S::default(),
        }
    }

    /// Replace the statement builder (builder pattern).
    #[must_use]
    pub fn builder(mut self, builder: Arc<dyn StatementBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the change observer (builder pattern).
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn EntityChangeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a row by id.
    ///
    /// Fails if `id` does not fit the table's id type or the cached
    /// instance is not an `M`.
    pub fn get<M: Entity>(&self, table: TableId, id: &Value) -> Result<Option<Arc<Tracked<M>>>> {
        let Some(key) = self.primary_key(table, id)? else {
            return Ok(None);
        };
        match self.store.get(&key) {
            Some(entry) => downcast(&entry).map(Some),
            None => Ok(None),
        }
    }

    /// Look up a row by a unique field of `table` or one of its ancestors.
    ///
    /// Returns `None` when unique caching is disabled.
    pub fn get_by_unique<M: Entity>(
        &self,
        table: TableId,
        field: FieldRef,
        value: &Value,
    ) -> Result<Option<Arc<Tracked<M>>>> {
        let table_name = self.registry.table(table)?.name;
        let info = self.registry.field(field).ok_or_else(|| {
            CacheError::new(CacheErrorKind::UnknownField, table_name)
                .field(format!("{}.#{}", self.registry.name_of(field.table), field.index))
        })?;
        if !self.registry.is_same_or_ancestor(field.table, table) {
            return Err(CacheError::new(CacheErrorKind::UnrelatedTable, table_name)
                .field(info.name)
                .actual(self.registry.name_of(field.table))
                .into());
        }
        if info.primary_key {
            return self.get(table, value);
        }
        if !info.unique {
            return Err(CacheError::new(CacheErrorKind::NotUnique, self.registry.name_of(field.table))
                .field(info.name)
                .into());
        }
        if !info.sql_type.accepts(value) {
            return Err(TypeError {
                expected: info.sql_type.kind_name(),
                actual: value.type_name().to_string(),
                table: Some(self.registry.name_of(field.table).to_string()),
                column: Some(info.column_name.to_string()),
            }
            .into());
        }
        if !self.config.unique_caching {
            return Ok(None);
        }
        let Some(value) = KeyValue::from_value(value) else {
            return Ok(None);
        };
        match self.store.get(&CacheKey::Unique { field, value }) {
            // An alias registered by a sibling subtype is not a row of `table`.
            Some(entry) if self.registry.is_same_or_ancestor(table, entry.table()) => {
                downcast(&entry).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Cache `instance` as a row of `table`, or return the instance already
    /// cached under its id.
    ///
    /// An instance records changes for one entry only: caching an instance
    /// that is still tracked under another id or table fails with
    /// `AlreadyTracked`.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(table = self.registry.name_of(table)))]
    pub fn put_if_absent<M: Entity>(&self, table: TableId, instance: Arc<Tracked<M>>) -> Result<Arc<Tracked<M>>> {
        let meta = self.registry.table(table)?;
        let id_field = self.id_field_name(table)?;

        let id = instance.get(id_field)?;
        let Some(key_value) = KeyValue::from_value(&id) else {
            return Err(if id.is_null() {
                CacheError::new(CacheErrorKind::NullId, meta.name).field(id_field).into()
            } else {
                TypeError {
                    expected: "identifying value",
                    actual: id.type_name().to_string(),
                    table: Some(meta.name.to_string()),
                    column: Some(id_field.to_string()),
                }
                .into()
            });
        };
        let key = CacheKey::Primary {
            table,
            id: key_value.clone(),
        };

        if let Some(existing) = self.store.get(&key) {
            tracing::trace!(id = %id, "Row already cached");
            return downcast(&existing);
        }

        if instance.is_tracked() {
            // Another thread may have cached this very instance under `key`.
            if let Some(existing) = self.store.get(&key) {
                return downcast(&existing);
            }
            return Err(CacheError::new(CacheErrorKind::AlreadyTracked, meta.name)
                .field(id_field)
                .actual(&id)
                .into());
        }

        if let Some(lock) = OptimisticLock::for_table(&self.registry, table) {
            lock.check(&instance.get(lock.name())?)?;
        }

        let entry = Arc::new(CacheEntry::new(table, meta.name, id, key_value, Arc::clone(&instance)));
        let aliases = if self.config.unique_caching {
            unique::collect_unique_keys(&self.registry, table, &entry)?
        } else {
            Vec::new()
        };

        let (stored, inserted) = self.store.insert_if_absent(key, Arc::clone(&entry));
        if !inserted {
            tracing::trace!(id = %entry.id(), "Lost registration race");
            return downcast(&stored);
        }

        entry.slot().observe(&self.observer, entry.token().clone());
        let registered = unique::register_all(&self.store, &entry, aliases);
        tracing::debug!(id = %entry.id(), aliases = registered, "Cached row");
        Ok(instance)
    }

    /// Add a unique alias for a cached row, for example after its unique
    /// field was given a new value. First write wins: returns `false` if the
    /// value already resolves to another row.
    pub fn register_unique(&self, table: TableId, id: &Value, field: FieldRef, value: &Value) -> Result<bool> {
        let table_name = self.registry.table(table)?.name;
        let info = self
            .registry
            .field(field)
            .ok_or_else(|| CacheError::new(CacheErrorKind::UnknownField, table_name))?;
        if !self.registry.is_same_or_ancestor(field.table, table) {
            return Err(CacheError::new(CacheErrorKind::UnrelatedTable, table_name)
                .field(info.name)
                .actual(self.registry.name_of(field.table))
                .into());
        }
        if !info.is_secondary_unique() {
            return Err(CacheError::new(CacheErrorKind::NotUnique, self.registry.name_of(field.table))
                .field(info.name)
                .into());
        }
        if !self.config.unique_caching {
            return Ok(false);
        }
        let Some(entry) = self.primary_key(table, id)?.and_then(|key| self.store.get(&key)) else {
            return Ok(false);
        };
        let Some(value) = KeyValue::from_value(value) else {
            return Ok(false);
        };
        Ok(unique::register_alias(&self.store, &entry, CacheKey::Unique { field, value }))
    }

    /// Build one UPDATE block per dirty row. Does not change any entry.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn changed_blocks(&self) -> Result<Vec<CacheBlock>> {
        let mut blocks = Vec::new();
        for entry in self.store.primary_entries() {
            let changed = entry.changed_fields();
            if changed.is_empty() {
                continue;
            }
            blocks.push(self.block_for(entry, changed)?);
        }
        tracing::debug!(blocks = blocks.len(), "Collected changed rows");
        Ok(blocks)
    }

    fn block_for(&self, entry: Arc<CacheEntry>, changed: Vec<String>) -> Result<CacheBlock> {
        let table = entry.table();
        let lock = OptimisticLock::for_table(&self.registry, table);

        let mut fields = Vec::with_capacity(changed.len());
        for name in &changed {
            let field = self.registry.resolve_field(table, name).ok_or_else(|| {
                CacheError::new(CacheErrorKind::UnknownField, entry.table_name()).field(name.as_str())
            })?;
            fields.push((name.as_str(), field));
        }

        let id_field = self.id_field_name(table)?;
        let live_id = entry.read(id_field)?;
        if KeyValue::from_value(&live_id).as_ref() != Some(entry.key()) {
            return Err(CacheError::new(CacheErrorKind::ImmutableField, entry.table_name())
                .field(id_field)
                .expected(entry.id())
                .actual(&live_id)
                .into());
        }

        let version = match lock {
            Some(lock) => Some((lock, lock.check(&entry.read(lock.name())?)?)),
            None => None,
        };

        let mut assignments = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            // The UPDATE advances the version itself.
            if lock.is_some_and(|lock| lock.field() == field) {
                continue;
            }
            assignments.push(Assignment {
                field,
                value: entry.read(name)?,
            });
        }

        let request = UpdateRequest {
            registry: &self.registry,
            leaf: table,
            id: live_id,
            version: version.as_ref().map(|(lock, current)| lock.predicate(current)),
            assignments,
        };
        let statement = self.builder.update(&request)?;
        tracing::trace!(
            table = entry.table_name(),
            id = %entry.id(),
            changed_count = changed.len(),
            "Built update for changed row"
        );
        Ok(CacheBlock::new(statement, entry, version, changed))
    }

    /// Forget every recorded change. Versions are left as they are.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear_changed_on_rollback(&self) {
        let entries = self.store.primary_entries();
        for entry in &entries {
            entry.token().clear();
        }
        tracing::debug!(entries = entries.len(), "Cleared changes after rollback");
    }

    /// Drop every entry and alias.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear_on_session_close(&self) {
        let entries = self.store.drain();
        if self.config.detach_on_close {
            for entry in &entries {
                self.observer.detach(entry.slot(), entry.token());
            }
        }
        tracing::debug!(entries = entries.len(), "Cleared identity cache");
    }

    /// Remove one row and the aliases it registered. Returns whether the
    /// row was cached.
    #[tracing::instrument(level = "debug", skip(self, id), fields(table = self.registry.name_of(table)))]
    pub fn evict(&self, table: TableId, id: &Value) -> Result<bool> {
        let Some(key) = self.primary_key(table, id)? else {
            return Ok(false);
        };
        let Some(entry) = self.store.get(&key) else {
            return Ok(false);
        };
        if !self.store.remove_if_same(&key, &entry) {
            return Ok(false);
        }
        for alias in entry.aliases() {
            self.store.remove_if_same(&alias, &entry);
        }
        if self.config.detach_on_close {
            self.observer.detach(entry.slot(), entry.token());
        }
        tracing::trace!(id = %entry.id(), "Evicted row");
        Ok(true)
    }

    /// Whether a row with this id is cached.
    pub fn contains(&self, table: TableId, id: &Value) -> Result<bool> {
        Ok(self
            .primary_key(table, id)?
            .is_some_and(|key| self.store.contains(&key)))
    }

    /// Number of cached rows (aliases not counted).
    pub fn len(&self) -> usize {
        self.store.primary_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached rows with recorded changes.
    pub fn dirty_count(&self) -> usize {
        self.store
            .primary_entries()
            .iter()
            .filter(|entry| entry.is_dirty())
            .count()
    }

    /// The cache entry of a row, for inspection.
    pub fn entry(&self, table: TableId, id: &Value) -> Result<Option<Arc<CacheEntry>>> {
        Ok(self.primary_key(table, id)?.and_then(|key| self.store.get(&key)))
    }

    fn id_field_name(&self, table: TableId) -> Result<&'static str> {
        let field = self
            .registry
            .id_field(table)
            .and_then(|f| self.registry.field(f))
            .ok_or_else(|| CacheError::new(CacheErrorKind::UnknownField, self.registry.name_of(table)).field("id"))?;
        Ok(field.name)
    }

    /// Key for `(table, id)` after checking `id` against the id type.
    /// NULL and unkeyable ids yield `None`.
    fn primary_key(&self, table: TableId, id: &Value) -> Result<Option<CacheKey>> {
        let meta = self.registry.table(table)?;
        let info = self
            .registry
            .id_field(table)
            .and_then(|f| self.registry.field(f))
            .ok_or_else(|| CacheError::new(CacheErrorKind::UnknownField, meta.name).field("id"))?;
        if !info.sql_type.accepts(id) {
            return Err(TypeError {
                expected: info.sql_type.kind_name(),
                actual: id.type_name().to_string(),
                table: Some(meta.name.to_string()),
                column: Some(info.column_name.to_string()),
            }
            .into());
        }
        Ok(KeyValue::from_value(id).map(|id| CacheKey::Primary { table, id }))
    }
}

fn downcast<M: Entity>(entry: &CacheEntry) -> Result<Arc<Tracked<M>>> {
    entry.instance::<M>().ok_or_else(|| {
        TypeError {
            expected: type_name::<M>(),
            actual: entry.type_name().to_string(),
            table: Some(entry.table_name().to_string()),
            column: None,
        }
        .into()
    })
}
