//! Statement decomposition shapes.
//!
//! A persistence operation reaches the execution layer as one of a closed
//! set of immutable shapes:
//!
//! - [`Wrapper`]: SQL text plus an ordered parameter list
//! - [`VersionedWrapper`]: plus a `has_version` flag telling the executor
//!   that zero affected rows means an optimistic-lock conflict
//! - [`ReturningWrapper`]: plus the columns the statement selects back
//! - [`BatchWrapper`]: one parameter group per row
//! - [`PairWrapper`]: a parent-table and a child-table unit for the same
//!   logical row(s), with the order they must run in
//! - [`DomainWrapper`]: any of the above plus a back-reference to the
//!   cached row it came from
//!
//! All fields are private; shapes are built once and only read afterwards.

use serde::Serialize;

use relmap_core::{Error, Result, StatementError, StatementErrorKind, Value};

/// SQL text with an ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wrapper {
    sql: String,
    params: Vec<Value>,
}

impl Wrapper {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

/// A unit whose WHERE clause may carry a version predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedWrapper {
    wrapper: Wrapper,
    has_version: bool,
}

impl VersionedWrapper {
    pub fn new(wrapper: Wrapper, has_version: bool) -> Self {
        Self {
            wrapper,
            has_version,
        }
    }

    /// A unit without a version predicate.
    pub fn unversioned(wrapper: Wrapper) -> Self {
        Self::new(wrapper, false)
    }

    pub fn sql(&self) -> &str {
        self.wrapper.sql()
    }

    pub fn params(&self) -> &[Value] {
        self.wrapper.params()
    }

    pub fn wrapper(&self) -> &Wrapper {
        &self.wrapper
    }

    /// True iff the WHERE clause includes a version predicate.
    pub fn has_version(&self) -> bool {
        self.has_version
    }

    /// Whether `affected_rows` reported by the executor means a concurrent
    /// writer got there first (as opposed to "row absent").
    pub fn is_conflict(&self, affected_rows: u64) -> bool {
        self.has_version && affected_rows == 0
    }
}

/// A unit that selects values back (generated ids, defaults).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturningWrapper {
    wrapper: Wrapper,
    selection: Vec<String>,
}

impl ReturningWrapper {
    pub fn new(wrapper: Wrapper, selection: Vec<String>) -> Self {
        Self { wrapper, selection }
    }

    pub fn sql(&self) -> &str {
        self.wrapper.sql()
    }

    pub fn params(&self) -> &[Value] {
        self.wrapper.params()
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }
}

/// One SQL text executed once per parameter group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchWrapper {
    sql: String,
    groups: Vec<Vec<Value>>,
    has_version: bool,
}

impl BatchWrapper {
    /// Build a batch; every group must bind the same number of parameters.
    pub fn try_new(sql: impl Into<String>, groups: Vec<Vec<Value>>, has_version: bool) -> Result<Self> {
        let sql = sql.into();
        if let Some(first) = groups.first() {
            let arity = first.len();
            if let Some((row, group)) = groups.iter().enumerate().find(|(_, g)| g.len() != arity) {
                return Err(StatementError {
                    kind: StatementErrorKind::RaggedBatch,
                    table: None,
                    message: format!(
                        "parameter group {} binds {} values, group 0 binds {}",
                        row,
                        group.len(),
                        arity
                    ),
                }
                .into());
            }
        }
        Ok(Self {
            sql,
            groups,
            has_version,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter groups, one per row, in row order.
    pub fn groups(&self) -> &[Vec<Value>] {
        &self.groups
    }

    pub fn has_version(&self) -> bool {
        self.has_version
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Number of rows a unit addresses.
pub trait ParamGroups {
    fn group_count(&self) -> usize;
}

impl ParamGroups for Wrapper {
    fn group_count(&self) -> usize {
        1
    }
}

impl ParamGroups for VersionedWrapper {
    fn group_count(&self) -> usize {
        1
    }
}

impl ParamGroups for ReturningWrapper {
    fn group_count(&self) -> usize {
        1
    }
}

impl ParamGroups for BatchWrapper {
    fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Which half of a pair runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairOrder {
    /// Inserts, and updates whose version lives on the parent table.
    ParentFirst,
    /// Deletes, and updates whose version lives on the child table.
    ChildFirst,
}

/// Parent-table and child-table units for the same logical row(s).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairWrapper<W> {
    parent: W,
    child: W,
    order: PairOrder,
}

impl<W: ParamGroups> PairWrapper<W> {
    /// Pair two units; both must address the same number of rows, so that
    /// group *i* of each denotes the same logical row.
    pub fn try_new(parent: W, child: W, order: PairOrder) -> Result<Self> {
        let (parents, children) = (parent.group_count(), child.group_count());
        if parents != children {
            return Err(Error::Statement(StatementError {
                kind: StatementErrorKind::GroupMismatch,
                table: None,
                message: format!(
                    "parent has {} parameter groups, child has {}",
                    parents, children
                ),
            }));
        }
        Ok(Self {
            parent,
            child,
            order,
        })
    }

    pub fn parent(&self) -> &W {
        &self.parent
    }

    pub fn child(&self) -> &W {
        &self.child
    }

    pub fn order(&self) -> PairOrder {
        self.order
    }

    /// Both units in the order they must be executed.
    pub fn in_execution_order(&self) -> [&W; 2] {
        match self.order {
            PairOrder::ParentFirst => [&self.parent, &self.child],
            PairOrder::ChildFirst => [&self.child, &self.parent],
        }
    }

    pub fn into_parts(self) -> (W, W, PairOrder) {
        (self.parent, self.child, self.order)
    }
}

/// A statement bound to the domain row it was generated for.
#[derive(Debug, Clone)]
pub struct DomainWrapper<W, D> {
    statement: W,
    domain: D,
}

impl<W, D> DomainWrapper<W, D> {
    pub fn new(statement: W, domain: D) -> Self {
        Self { statement, domain }
    }

    pub fn statement(&self) -> &W {
        &self.statement
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    pub fn into_parts(self) -> (W, D) {
        (self.statement, self.domain)
    }
}

/// Every execution unit the statement layer hands to an executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Statement {
    Single(VersionedWrapper),
    Returning(ReturningWrapper),
    Pair(PairWrapper<VersionedWrapper>),
    Batch(BatchWrapper),
    BatchPair(PairWrapper<BatchWrapper>),
}

impl Statement {
    /// Whether any unit carries a version predicate.
    pub fn has_version(&self) -> bool {
        match self {
            Statement::Single(w) => w.has_version(),
            Statement::Returning(_) => false,
            Statement::Pair(p) => p.parent().has_version() || p.child().has_version(),
            Statement::Batch(b) => b.has_version(),
            Statement::BatchPair(p) => p.parent().has_version() || p.child().has_version(),
        }
    }

    /// The single-row unit carrying the version predicate: the unit itself
    /// for `Single`, the versioned half of a `Pair`.
    pub fn versioned_unit(&self) -> Option<&VersionedWrapper> {
        match self {
            Statement::Single(w) => Some(w).filter(|w| w.has_version()),
            Statement::Pair(p) => [p.parent(), p.child()].into_iter().find(|w| w.has_version()),
            Statement::Returning(_) | Statement::Batch(_) | Statement::BatchPair(_) => None,
        }
    }

    /// SQL texts in execution order.
    pub fn sql_in_order(&self) -> Vec<&str> {
        match self {
            Statement::Single(w) => vec![w.sql()],
            Statement::Returning(w) => vec![w.sql()],
            Statement::Pair(p) => p.in_execution_order().iter().map(|w| w.sql()).collect(),
            Statement::Batch(b) => vec![b.sql()],
            Statement::BatchPair(p) => p.in_execution_order().iter().map(|w| w.sql()).collect(),
        }
    }

    /// Number of logical rows addressed.
    pub fn row_count(&self) -> usize {
        match self {
            Statement::Single(_) | Statement::Returning(_) | Statement::Pair(_) => 1,
            Statement::Batch(b) => b.len(),
            Statement::BatchPair(p) => p.parent().len(),
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Statement::Pair(_) | Statement::BatchPair(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(n: usize) -> Vec<Vec<Value>> {
        (0..n).map(|i| vec![Value::BigInt(i as i64)]).collect()
    }

    #[test]
    fn batch_pair_rejects_mismatched_groups() {
        let parent = BatchWrapper::try_new("INSERT INTO \"region\" (\"id\") VALUES ($1)", groups(3), false).unwrap();
        let child = BatchWrapper::try_new("INSERT INTO \"province\" (\"id\") VALUES ($1)", groups(2), false).unwrap();
        let err = PairWrapper::try_new(parent, child, PairOrder::ParentFirst).unwrap_err();
        assert_eq!(err.statement_kind(), Some(StatementErrorKind::GroupMismatch));
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("2"));
    }

    #[test]
    fn batch_pair_accepts_aligned_groups() {
        let parent = BatchWrapper::try_new("p", groups(2), false).unwrap();
        let child = BatchWrapper::try_new("c", groups(2), false).unwrap();
        let pair = PairWrapper::try_new(parent, child, PairOrder::ParentFirst).unwrap();
        assert_eq!(pair.parent().groups()[1], pair.child().groups()[1]);
        let stmt = Statement::BatchPair(pair);
        assert_eq!(stmt.row_count(), 2);
        assert!(stmt.is_pair());
    }

    #[test]
    fn ragged_batch_rejected() {
        let err = BatchWrapper::try_new(
            "x",
            vec![vec![Value::Int(1)], vec![Value::Int(2), Value::Int(3)]],
            false,
        )
        .unwrap_err();
        assert_eq!(err.statement_kind(), Some(StatementErrorKind::RaggedBatch));
    }

    #[test]
    fn empty_batch_is_allowed() {
        let batch = BatchWrapper::try_new("x", Vec::new(), false).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.group_count(), 0);
    }

    #[test]
    fn pair_execution_order() {
        let parent = VersionedWrapper::new(Wrapper::new("parent", vec![]), true);
        let child = VersionedWrapper::unversioned(Wrapper::new("child", vec![]));
        let pair = PairWrapper::try_new(parent.clone(), child.clone(), PairOrder::ParentFirst).unwrap();
        assert_eq!(Statement::Pair(pair).sql_in_order(), vec!["parent", "child"]);

        let pair = PairWrapper::try_new(parent, child, PairOrder::ChildFirst).unwrap();
        let stmt = Statement::Pair(pair);
        assert_eq!(stmt.sql_in_order(), vec!["child", "parent"]);
        assert!(stmt.has_version());
        assert_eq!(stmt.versioned_unit().map(|w| w.sql()), Some("parent"));
    }

    #[test]
    fn unversioned_statements_have_no_versioned_unit() {
        let plain = Statement::Single(VersionedWrapper::unversioned(Wrapper::new("u", vec![])));
        assert!(plain.versioned_unit().is_none());

        let parent = VersionedWrapper::unversioned(Wrapper::new("parent", vec![]));
        let child = VersionedWrapper::new(Wrapper::new("child", vec![]), true);
        let pair = Statement::Pair(PairWrapper::try_new(parent, child, PairOrder::ChildFirst).unwrap());
        assert_eq!(pair.versioned_unit().map(|w| w.sql()), Some("child"));
    }

    #[test]
    fn conflict_only_for_versioned_units() {
        let versioned = VersionedWrapper::new(Wrapper::new("u", vec![]), true);
        assert!(versioned.is_conflict(0));
        assert!(!versioned.is_conflict(1));

        let plain = VersionedWrapper::unversioned(Wrapper::new("u", vec![]));
        assert!(!plain.is_conflict(0));
    }

    #[test]
    fn domain_wrapper_keeps_back_reference() {
        let bound = DomainWrapper::new(Wrapper::new("u", vec![Value::Int(1)]), "row-1");
        assert_eq!(*bound.domain(), "row-1");
        assert_eq!(bound.statement().params(), &[Value::Int(1)]);
    }

    #[test]
    fn returning_selection() {
        let ret = ReturningWrapper::new(
            Wrapper::new("INSERT INTO \"t\" (\"name\") VALUES ($1) RETURNING \"id\"", vec![Value::from("a")]),
            vec!["id".to_string()],
        );
        assert_eq!(ret.selection(), &["id".to_string()]);
        assert!(!Statement::Returning(ret).has_version());
    }
}
