//! Change notification for tracked domain instances.
//!
//! A domain instance is held as `Arc<Tracked<M>>`. Every mutation goes
//! through [`Tracked::mutate`] (named mutator) or [`Tracked::set`] (named
//! field); after the mutation is applied, the field name is recorded in the
//! [`ChangeToken`] the identity cache attached to the instance. Instances
//! without an attached token mutate silently.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use relmap_core::{Accessor, Entity, Result, Value};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared set of changed field names for one cached row.
///
/// Cloning yields a handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct ChangeToken {
    fields: Arc<Mutex<BTreeSet<String>>>,
}

impl ChangeToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a changed field. Returns `false` if it was already recorded.
    pub fn record(&self, field: impl Into<String>) -> bool {
        lock(&self.fields).insert(field.into())
    }

    /// Changed field names, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.fields).iter().cloned().collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        lock(&self.fields).contains(field)
    }

    pub fn len(&self) -> usize {
        lock(&self.fields).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.fields).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.fields).clear();
    }

    /// Whether both handles point at the same set.
    pub fn same_as(&self, other: &ChangeToken) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

/// Attachment point for change tracking on one instance.
///
/// The slot remembers the observer that attached a token to it; every
/// mutation asks that observer for the token to record into. It also offers
/// plain token storage that observers may use (as `SlotObserver` does) or
/// ignore in favour of their own bookkeeping.
#[derive(Default)]
pub struct TokenSlot {
    token: Mutex<Option<ChangeToken>>,
    observer: Mutex<Option<Arc<dyn EntityChangeObserver>>>,
}

impl TokenSlot {
    /// The token stored in the slot itself.
    pub fn get(&self) -> Option<ChangeToken> {
        lock(&self.token).clone()
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.token).is_some()
    }

    /// Store `token` in the slot, returning the one it replaces.
    pub fn store(&self, token: ChangeToken) -> Option<ChangeToken> {
        lock(&self.token).replace(token)
    }

    /// Remove the stored token if it is `token`.
    pub fn clear_if(&self, token: &ChangeToken) -> bool {
        let mut slot = lock(&self.token);
        if slot.as_ref().is_some_and(|current| current.same_as(token)) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Bind `observer` to the slot and let it attach `token`.
    pub fn observe(&self, observer: &Arc<dyn EntityChangeObserver>, token: ChangeToken) {
        *lock(&self.observer) = Some(Arc::clone(observer));
        observer.attach(self, token);
    }

    /// The token the bound observer reports for this slot.
    pub fn current(&self) -> Option<ChangeToken> {
        let observer = lock(&self.observer).clone()?;
        observer.lookup(self)
    }
}

impl fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSlot")
            .field("token", &self.get())
            .field("observed", &lock(&self.observer).is_some())
            .finish()
    }
}

/// Attaches change tokens to instances and finds them again.
///
/// The identity cache calls `attach` once per newly cached row (through
/// [`TokenSlot::observe`]) and `detach` when the row is evicted. `lookup`
/// runs on every mutation of an observed instance.
pub trait EntityChangeObserver: Send + Sync {
    fn attach(&self, slot: &TokenSlot, token: ChangeToken);

    fn lookup(&self, slot: &TokenSlot) -> Option<ChangeToken>;

    /// Remove `token` from the slot. A slot that has since been re-attached
    /// to another token is left alone.
    fn detach(&self, slot: &TokenSlot, token: &ChangeToken);
}

/// Stores the token directly in the instance's slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotObserver;

impl EntityChangeObserver for SlotObserver {
    fn attach(&self, slot: &TokenSlot, token: ChangeToken) {
        if slot.store(token).is_some() {
            tracing::debug!("Replaced change token already attached to instance");
        }
    }

    fn lookup(&self, slot: &TokenSlot) -> Option<ChangeToken> {
        slot.get()
    }

    fn detach(&self, slot: &TokenSlot, token: &ChangeToken) {
        slot.clear_if(token);
    }
}

/// Logical field name for a mutator name.
///
/// Strips a `set_` prefix, or a `set` prefix followed by an upper-case
/// letter, then lower-cases the first remaining character:
/// `set_name` → `name`, `setRegionCode` → `regionCode`, `name` → `name`.
pub fn field_name_from_mutator(mutator: &str) -> String {
    let rest = mutator
        .strip_prefix("set_")
        .filter(|r| !r.is_empty())
        .or_else(|| {
            mutator
                .strip_prefix("set")
                .filter(|r| r.starts_with(|c: char| c.is_ascii_uppercase()))
        })
        .unwrap_or(mutator);

    let mut chars = rest.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A domain instance whose mutations are reported to its attached token.
#[derive(Debug, Default)]
pub struct Tracked<M> {
    value: RwLock<M>,
    slot: TokenSlot,
}

impl<M> Tracked<M> {
    pub fn new(value: M) -> Self {
        Self {
            value: RwLock::new(value),
            slot: TokenSlot::default(),
        }
    }

    /// Wrap `value` in a shared handle, the form the identity cache stores.
    pub fn shared(value: M) -> Arc<Self> {
        Arc::new(Self::new(value))
    }

    /// Read access to the instance.
    pub fn read(&self) -> RwLockReadGuard<'_, M> {
        self.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f`, then record the field named by `mutator` as changed.
    pub fn mutate<R>(&self, mutator: &str, f: impl FnOnce(&mut M) -> R) -> R {
        let result = {
            let mut guard = self.write_untracked();
            f(&mut *guard)
        };
        if let Some(token) = self.slot.current() {
            let field = field_name_from_mutator(mutator);
            if token.record(field.as_str()) {
                tracing::trace!(field = %field, "Recorded change");
            }
        }
        result
    }

    pub fn slot(&self) -> &TokenSlot {
        &self.slot
    }

    /// Whether an observer reports a change token for this instance.
    pub fn is_tracked(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Write access that is never reported as a change.
    pub(crate) fn write_untracked(&self) -> RwLockWriteGuard<'_, M> {
        self.value.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: Entity> Tracked<M> {
    /// Read a field through the entity's accessor.
    pub fn get(&self, field: &str) -> Result<Value> {
        M::accessor().get(&self.read(), field)
    }

    /// Write a field through the entity's accessor and record it as
    /// changed. Nothing is recorded when the write fails.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        M::accessor().set(&mut *self.write_untracked(), field, value.into())?;
        if let Some(token) = self.slot.current() {
            token.record(field);
        }
        Ok(())
    }
}
