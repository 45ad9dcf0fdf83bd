//! Flush units produced by the identity cache.

use std::fmt;
use std::sync::Arc;

use relmap_core::Result;
use relmap_statement::{DomainWrapper, Statement};

use crate::entry::CacheEntry;
use crate::optimistic::{OptimisticLock, VersionValue};

/// One dirty row ready to be written: the UPDATE, the entry it was built
/// from, the version read at flush time and the fields it assigns.
///
/// Call [`CacheBlock::success`] after the executor reports the UPDATE
/// succeeded; on failure just drop the block.
pub struct CacheBlock {
    statement: DomainWrapper<Statement, Arc<CacheEntry>>,
    lock: Option<OptimisticLock>,
    pre_version: Option<VersionValue>,
    changed: Vec<String>,
}

impl CacheBlock {
    pub(crate) fn new(
        statement: Statement,
        entry: Arc<CacheEntry>,
        version: Option<(OptimisticLock, VersionValue)>,
        changed: Vec<String>,
    ) -> Self {
        let (lock, pre_version) = version.map_or((None, None), |(lock, v)| (Some(lock), Some(v)));
        Self {
            statement: DomainWrapper::new(statement, entry),
            lock,
            pre_version,
            changed,
        }
    }

    pub fn statement(&self) -> &Statement {
        self.statement.statement()
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        self.statement.domain()
    }

    /// Version the row had when the block was built.
    pub fn pre_version(&self) -> Option<&VersionValue> {
        self.pre_version.as_ref()
    }

    /// Changed field names, sorted.
    pub fn changed(&self) -> &[String] {
        &self.changed
    }

    /// Whether `affected_rows`, the count reported for the unit carrying the
    /// version predicate (see [`Statement::versioned_unit`]), means another
    /// writer changed the row first. Counts of the other half of a pair say
    /// nothing about conflicts.
    pub fn is_conflict(&self, affected_rows: u64) -> bool {
        self.statement()
            .versioned_unit()
            .is_some_and(|unit| unit.is_conflict(affected_rows))
    }

    /// Mark the row as written: clear its changed set and, if it is
    /// versioned, write `pre_version + 1` into the instance.
    ///
    /// Returns the new version.
    #[tracing::instrument(level = "trace", skip(self), fields(table = self.entry().table_name()))]
    pub fn success(self) -> Result<Option<VersionValue>> {
        let entry = self.statement.domain();
        entry.token().clear();

        let (Some(lock), Some(pre)) = (self.lock, self.pre_version.as_ref()) else {
            return Ok(None);
        };
        let next = lock.advance(pre)?;
        entry.write_untracked(lock.name(), next.to_value())?;
        tracing::trace!(id = %entry.id(), version = %next, "Advanced version");
        Ok(Some(next))
    }
}

impl fmt::Debug for CacheBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBlock")
            .field("entry", self.entry())
            .field("statement", self.statement())
            .field("pre_version", &self.pre_version)
            .field("changed", &self.changed)
            .finish()
    }
}
