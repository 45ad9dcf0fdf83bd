//! relmap - the persistence core of a relational-mapping framework.
//!
//! relmap keeps a session-scoped identity cache of domain rows, records
//! which fields of each row were mutated, and turns dirty rows into UPDATE
//! statements that carry an optimistic-lock version predicate. Rows of a
//! table-per-subtype hierarchy span a parent and a child table; their
//! statements come out as parent/child pairs, single or batched.
//!
//! Executing SQL, deciding when to flush and managing transactions are left
//! to the caller.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! let mut registry = TableRegistry::new();
//! let orders = registry.register(TableMeta::new(
//!     "orders",
//!     vec![
//!         FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
//!         FieldInfo::new("version", "version", SqlType::Integer).version(true),
//!         FieldInfo::new("name", "name", SqlType::Text),
//!     ],
//! ))?;
//!
//! let cache = LocalIdentityCache::new(Arc::new(registry));
//! let order = cache.put_if_absent(orders, Tracked::shared(loaded_order))?;
//! order.mutate("set_name", |o| o.name = "b".to_string());
//!
//! for block in cache.changed_blocks()? {
//!     let affected = execute(block.statement())?;
//!     if block.is_conflict(affected) {
//!         return Err(conflict());
//!     }
//!     block.success()?;
//! }
//! ```

pub use relmap_core::{
    AccessError, AccessErrorKind, Accessor, CacheError, CacheErrorKind, Entity, Error,
    FieldAccessor, FieldInfo, FieldRef, FieldSlot, KeyValue, Result, SchemaError, SchemaErrorKind,
    SqlType, StatementError, StatementErrorKind, TableId, TableMeta, TableRegistry, TypeError, Value,
};
pub use relmap_session::{
    CacheBlock, CacheConfig, CacheEntry, CacheKey, ChangeToken, EntityChangeObserver, EntryStore,
    IdentityCache, LocalIdentityCache, LocalStore, OptimisticLock, SharedIdentityCache,
    SharedStore, SlotObserver, TokenSlot, Tracked, VersionValue, field_name_from_mutator,
};
pub use relmap_statement::{
    Assignment, BatchWrapper, DefaultStatementBuilder, DomainWrapper, InsertRow, PairOrder,
    PairWrapper, ParamGroups, ParamStyle, ReturningWrapper, Statement, StatementBuilder,
    UpdateRequest, VersionPredicate, VersionedWrapper, Wrapper,
};

/// Everything needed to describe tables, cache rows and consume statements.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Metadata and values
        Entity,
        Error,
        FieldAccessor,
        FieldInfo,
        FieldSlot,
        Result,
        SqlType,
        TableId,
        TableMeta,
        TableRegistry,
        Value,
        // Session cache
        CacheBlock,
        CacheConfig,
        LocalIdentityCache,
        SharedIdentityCache,
        Tracked,
        VersionValue,
        // Statements
        DefaultStatementBuilder,
        PairOrder,
        Statement,
        StatementBuilder,
    };
    pub use std::sync::Arc;
}
