//! Session identity cache for relmap.
//!
//! - `IdentityCache` keeps one entry per logical row, resolves unique
//!   fields to the same entry and collects dirty rows into `CacheBlock`s
//! - `Tracked` / `ChangeToken` / `EntityChangeObserver` record which fields
//!   of a cached instance were mutated
//! - `VersionValue` / `OptimisticLock` derive version predicates and advance
//!   versions after a successful write
//!
//! The execution mode is fixed by the store type: `LocalIdentityCache` for
//! a single thread, `SharedIdentityCache` when several threads touch the
//! same session.

pub mod block;
pub mod change;
pub mod config;
pub mod entry;
pub mod identity_cache;
pub mod optimistic;
pub mod store;
mod unique;

pub use block::CacheBlock;
pub use change::{
    ChangeToken, EntityChangeObserver, SlotObserver, TokenSlot, Tracked, field_name_from_mutator,
};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use identity_cache::{IdentityCache, LocalIdentityCache, SharedIdentityCache};
pub use optimistic::{OptimisticLock, VersionValue};
pub use store::{CacheKey, EntryStore, LocalStore, SharedStore};
