//! UPDATE, INSERT and DELETE builders.
//!
//! A row of a table-per-subtype hierarchy is stored across at most two
//! tables that share the same id. The builders split a row's columns by
//! owning table and return a single unit or a parent/child pair:
//!
//! - UPDATE: one unit per touched table; the table that owns the version
//!   column gets the version predicate plus `version = version + 1` and
//!   runs first
//! - INSERT: parent first; a single-table insert with a null id selects the
//!   generated id back
//! - DELETE: child first

use serde::Serialize;

use relmap_core::{
    CacheError, CacheErrorKind, Error, FieldRef, Result, SchemaError, SchemaErrorKind,
    StatementError, StatementErrorKind, TableId, TableRegistry, Value,
};

use crate::wrapper::{
    BatchWrapper, PairOrder, PairWrapper, ReturningWrapper, Statement, VersionedWrapper, Wrapper,
};

/// Bind parameter placeholder style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ParamStyle {
    /// `$1, $2, ...`
    #[default]
    Dollar,
    /// `?, ?, ...`
    Question,
}

impl ParamStyle {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            ParamStyle::Dollar => format!("${index}"),
            ParamStyle::Question => "?".to_string(),
        }
    }
}

/// `column = value` in a SET clause or an INSERT column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: FieldRef,
    pub value: Value,
}

impl Assignment {
    pub fn new(field: FieldRef, value: impl Into<Value>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// Expected current version of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionPredicate {
    pub field: FieldRef,
    pub value: Value,
}

/// Everything needed to update one cached row.
#[derive(Debug, Clone)]
pub struct UpdateRequest<'a> {
    pub registry: &'a TableRegistry,
    /// Most-derived table of the row
    pub leaf: TableId,
    pub id: Value,
    pub version: Option<VersionPredicate>,
    /// Changed fields with their live values, in any table of the chain
    pub assignments: Vec<Assignment>,
}

/// One row to insert. `values` must not include the id field.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    pub id: Value,
    pub values: Vec<Assignment>,
}

/// Turns a cached row's changes into an executable unit.
pub trait StatementBuilder: Send + Sync {
    /// Build an UPDATE keyed on id (and version, if given) that assigns
    /// every field of `request.assignments`. With a version, an empty
    /// assignment list still yields an UPDATE that only advances it.
    fn update(&self, request: &UpdateRequest<'_>) -> Result<Statement>;
}

/// The tables a row of `leaf` is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hierarchy {
    Flat(TableId),
    Joined { parent: TableId, child: TableId },
}

impl Hierarchy {
    fn of(registry: &TableRegistry, leaf: TableId) -> Result<Self> {
        let leaf_meta = registry.table(leaf)?;
        let chain: Vec<TableId> = registry.chain(leaf).collect();
        match chain.as_slice() {
            [table] => Ok(Hierarchy::Flat(*table)),
            [child, parent] => Ok(Hierarchy::Joined {
                parent: *parent,
                child: *child,
            }),
            _ => Err(StatementError {
                kind: StatementErrorKind::TooManyTables,
                table: Some(leaf_meta.name.to_string()),
                message: format!(
                    "row spans {} tables, at most a parent and a child are supported",
                    chain.len()
                ),
            }
            .into()),
        }
    }

    fn contains(self, table: TableId) -> bool {
        match self {
            Hierarchy::Flat(t) => t == table,
            Hierarchy::Joined { parent, child } => parent == table || child == table,
        }
    }
}

/// Renders double-quoted identifiers and numbered placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatementBuilder {
    style: ParamStyle,
}

impl DefaultStatementBuilder {
    /// Create a builder using `$n` placeholders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_style(style: ParamStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> ParamStyle {
        self.style
    }

    /// Build an INSERT for one row.
    #[tracing::instrument(level = "debug", skip(self, registry, row), fields(table = registry.name_of(leaf)))]
    pub fn insert(&self, registry: &TableRegistry, leaf: TableId, row: &InsertRow) -> Result<Statement> {
        let hierarchy = Hierarchy::of(registry, leaf)?;
        check_membership(registry, leaf, hierarchy, row.values.iter().map(|a| a.field))?;

        if row.id.is_null() {
            return match hierarchy {
                Hierarchy::Flat(table) => self.render_insert_returning(registry, table, row),
                Hierarchy::Joined { .. } => Err(null_id(registry, leaf)),
            };
        }

        let statement = match hierarchy {
            Hierarchy::Flat(table) => {
                let (sql, params) = self.render_insert(registry, table, row)?;
                Statement::Single(VersionedWrapper::unversioned(Wrapper::new(sql, params)))
            }
            Hierarchy::Joined { parent, child } => {
                let (parent_sql, parent_params) = self.render_insert(registry, parent, row)?;
                let (child_sql, child_params) = self.render_insert(registry, child, row)?;
                Statement::Pair(PairWrapper::try_new(
                    VersionedWrapper::unversioned(Wrapper::new(parent_sql, parent_params)),
                    VersionedWrapper::unversioned(Wrapper::new(child_sql, child_params)),
                    PairOrder::ParentFirst,
                )?)
            }
        };
        tracing::trace!(sql = ?statement.sql_in_order(), "Built insert");
        Ok(statement)
    }

    /// Build a batched INSERT. Every row must assign the same fields in the
    /// same order; group *i* of each table's batch is row *i*.
    #[tracing::instrument(level = "debug", skip(self, registry, rows), fields(table = registry.name_of(leaf), rows = rows.len()))]
    pub fn insert_batch(&self, registry: &TableRegistry, leaf: TableId, rows: &[InsertRow]) -> Result<Statement> {
        let Some(first) = rows.first() else {
            return Err(StatementError {
                kind: StatementErrorKind::Empty,
                table: Some(registry.name_of(leaf).to_string()),
                message: "no rows to insert".to_string(),
            }
            .into());
        };
        let hierarchy = Hierarchy::of(registry, leaf)?;
        check_membership(registry, leaf, hierarchy, first.values.iter().map(|a| a.field))?;

        for (index, row) in rows.iter().enumerate() {
            if row.id.is_null() {
                return Err(null_id(registry, leaf));
            }
            let same_layout = row.values.len() == first.values.len()
                && row
                    .values
                    .iter()
                    .zip(&first.values)
                    .all(|(a, b)| a.field == b.field);
            if !same_layout {
                return Err(StatementError {
                    kind: StatementErrorKind::RaggedBatch,
                    table: Some(registry.name_of(leaf).to_string()),
                    message: format!("row {} assigns different fields than row 0", index),
                }
                .into());
            }
        }

        let batch_for = |table: TableId| -> Result<BatchWrapper> {
            let (sql, _) = self.render_insert(registry, table, first)?;
            let groups = rows.iter().map(|row| insert_params(table, row)).collect();
            BatchWrapper::try_new(sql, groups, false)
        };

        let statement = match hierarchy {
            Hierarchy::Flat(table) => Statement::Batch(batch_for(table)?),
            Hierarchy::Joined { parent, child } => Statement::BatchPair(PairWrapper::try_new(
                batch_for(parent)?,
                batch_for(child)?,
                PairOrder::ParentFirst,
            )?),
        };
        tracing::debug!(rows = rows.len(), pair = statement.is_pair(), "Built batch insert");
        Ok(statement)
    }

    /// Build a DELETE keyed on id, with an optional version predicate.
    #[tracing::instrument(level = "debug", skip(self, registry, id, version), fields(table = registry.name_of(leaf)))]
    pub fn delete(
        &self,
        registry: &TableRegistry,
        leaf: TableId,
        id: &Value,
        version: Option<&VersionPredicate>,
    ) -> Result<Statement> {
        if id.is_null() {
            return Err(null_id(registry, leaf));
        }
        let hierarchy = Hierarchy::of(registry, leaf)?;
        if let Some(v) = version {
            check_membership(registry, leaf, hierarchy, std::iter::once(v.field))?;
        }
        let for_table = |table: TableId| -> Result<VersionedWrapper> {
            let version = version.filter(|v| v.field.table == table);
            self.render_delete(registry, table, id, version)
        };

        let statement = match hierarchy {
            Hierarchy::Flat(table) => Statement::Single(for_table(table)?),
            Hierarchy::Joined { parent, child } => Statement::Pair(PairWrapper::try_new(
                for_table(parent)?,
                for_table(child)?,
                PairOrder::ChildFirst,
            )?),
        };
        tracing::trace!(sql = ?statement.sql_in_order(), "Built delete");
        Ok(statement)
    }

    fn render_update(
        &self,
        registry: &TableRegistry,
        table: TableId,
        assignments: &[&Assignment],
        id: &Value,
        version: Option<&VersionPredicate>,
    ) -> Result<VersionedWrapper> {
        let meta = registry.table(table)?;
        let mut params = Vec::with_capacity(assignments.len() + 2);
        let mut sets = Vec::with_capacity(assignments.len() + 1);

        for assignment in assignments {
            let column = column_name(registry, assignment.field)?;
            params.push(assignment.value.clone());
            sets.push(format!("{} = {}", quote(column), self.style.placeholder(params.len())));
        }
        if let Some(v) = version {
            let column = quote(column_name(registry, v.field)?);
            sets.push(format!("{column} = {column} + 1"));
        }

        params.push(id.clone());
        let mut conditions = vec![format!(
            "{} = {}",
            quote(id_column(registry, table)?),
            self.style.placeholder(params.len())
        )];
        if let Some(v) = version {
            params.push(v.value.clone());
            conditions.push(format!(
                "{} = {}",
                quote(column_name(registry, v.field)?),
                self.style.placeholder(params.len())
            ));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote(meta.name),
            sets.join(", "),
            conditions.join(" AND ")
        );
        Ok(VersionedWrapper::new(Wrapper::new(sql, params), version.is_some()))
    }

    fn render_insert(&self, registry: &TableRegistry, table: TableId, row: &InsertRow) -> Result<(String, Vec<Value>)> {
        let meta = registry.table(table)?;
        let mut columns = vec![quote(id_column(registry, table)?)];
        for assignment in row.values.iter().filter(|a| a.field.table == table) {
            columns.push(quote(column_name(registry, assignment.field)?));
        }
        let params = insert_params(table, row);
        let placeholders: Vec<String> = (1..=params.len()).map(|i| self.style.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(meta.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok((sql, params))
    }

    fn render_insert_returning(&self, registry: &TableRegistry, table: TableId, row: &InsertRow) -> Result<Statement> {
        let meta = registry.table(table)?;
        let id = id_column(registry, table)?;
        let mut columns = Vec::with_capacity(row.values.len());
        let mut params = Vec::with_capacity(row.values.len());
        for assignment in &row.values {
            columns.push(quote(column_name(registry, assignment.field)?));
            params.push(assignment.value.clone());
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quote(meta.name), quote(id))
        } else {
            let placeholders: Vec<String> = (1..=params.len()).map(|i| self.style.placeholder(i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                quote(meta.name),
                columns.join(", "),
                placeholders.join(", "),
                quote(id)
            )
        };
        Ok(Statement::Returning(ReturningWrapper::new(
            Wrapper::new(sql, params),
            vec![id.to_string()],
        )))
    }

    fn render_delete(
        &self,
        registry: &TableRegistry,
        table: TableId,
        id: &Value,
        version: Option<&VersionPredicate>,
    ) -> Result<VersionedWrapper> {
        let meta = registry.table(table)?;
        let mut params = vec![id.clone()];
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            quote(meta.name),
            quote(id_column(registry, table)?),
            self.style.placeholder(1)
        );
        if let Some(v) = version {
            params.push(v.value.clone());
            sql.push_str(&format!(
                " AND {} = {}",
                quote(column_name(registry, v.field)?),
                self.style.placeholder(2)
            ));
        }
        Ok(VersionedWrapper::new(Wrapper::new(sql, params), version.is_some()))
    }
}

impl StatementBuilder for DefaultStatementBuilder {
    #[tracing::instrument(
        level = "debug",
        skip(self, request),
        fields(table = request.registry.name_of(request.leaf), assignments = request.assignments.len())
    )]
    fn update(&self, request: &UpdateRequest<'_>) -> Result<Statement> {
        let registry = request.registry;
        if request.assignments.is_empty() && request.version.is_none() {
            return Err(StatementError {
                kind: StatementErrorKind::Empty,
                table: Some(registry.name_of(request.leaf).to_string()),
                message: "no fields to assign".to_string(),
            }
            .into());
        }
        if request.id.is_null() {
            return Err(null_id(registry, request.leaf));
        }

        let hierarchy = Hierarchy::of(registry, request.leaf)?;
        check_membership(
            registry,
            request.leaf,
            hierarchy,
            request
                .assignments
                .iter()
                .map(|a| a.field)
                .chain(request.version.iter().map(|v| v.field)),
        )?;

        let version_table = request.version.as_ref().map(|v| v.field.table);
        let for_table = |table: TableId| -> Result<Option<VersionedWrapper>> {
            let assignments: Vec<&Assignment> = request
                .assignments
                .iter()
                .filter(|a| a.field.table == table)
                .collect();
            let version = request.version.as_ref().filter(|v| v.field.table == table);
            if assignments.is_empty() && version.is_none() {
                return Ok(None);
            }
            self.render_update(registry, table, &assignments, &request.id, version)
                .map(Some)
        };

        let (first, second) = match hierarchy {
            Hierarchy::Flat(table) => (for_table(table)?, None),
            Hierarchy::Joined { parent, child } => (for_table(parent)?, for_table(child)?),
        };
        let statement = match (first, second) {
            (Some(parent), Some(child)) => {
                let order = match hierarchy {
                    Hierarchy::Joined { child, .. } if version_table == Some(child) => PairOrder::ChildFirst,
                    _ => PairOrder::ParentFirst,
                };
                Statement::Pair(PairWrapper::try_new(parent, child, order)?)
            }
            (Some(unit), None) | (None, Some(unit)) => Statement::Single(unit),
            (None, None) => {
                return Err(StatementError {
                    kind: StatementErrorKind::Empty,
                    table: Some(registry.name_of(request.leaf).to_string()),
                    message: "no table of the row is touched".to_string(),
                }
                .into());
            }
        };
        tracing::trace!(sql = ?statement.sql_in_order(), has_version = statement.has_version(), "Built update");
        Ok(statement)
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn insert_params(table: TableId, row: &InsertRow) -> Vec<Value> {
    std::iter::once(row.id.clone())
        .chain(
            row.values
                .iter()
                .filter(|a| a.field.table == table)
                .map(|a| a.value.clone()),
        )
        .collect()
}

fn column_name(registry: &TableRegistry, field: FieldRef) -> Result<&'static str> {
    registry.field(field).map(|f| f.column_name).ok_or_else(|| {
        CacheError::new(CacheErrorKind::UnknownField, registry.name_of(field.table))
            .field(format!("#{}", field.index))
            .into()
    })
}

fn id_column(registry: &TableRegistry, table: TableId) -> Result<&'static str> {
    registry
        .id_field(table)
        .and_then(|f| registry.field(f))
        .map(|f| f.column_name)
        .ok_or_else(|| {
            SchemaError {
                kind: SchemaErrorKind::PrimaryKey,
                table: registry.name_of(table).to_string(),
                message: "no primary key field".to_string(),
            }
            .into()
        })
}

fn null_id(registry: &TableRegistry, leaf: TableId) -> Error {
    let field = registry
        .id_field(leaf)
        .and_then(|f| registry.field(f))
        .map_or("id", |f| f.name);
    CacheError::new(CacheErrorKind::NullId, registry.name_of(leaf))
        .field(field)
        .into()
}

fn check_membership(
    registry: &TableRegistry,
    leaf: TableId,
    hierarchy: Hierarchy,
    fields: impl Iterator<Item = FieldRef>,
) -> Result<()> {
    for field in fields {
        if !hierarchy.contains(field.table) {
            let name = registry.field(field).map_or("<unknown>", |f| f.name);
            return Err(CacheError::new(CacheErrorKind::UnrelatedTable, registry.name_of(leaf))
                .field(name)
                .actual(registry.name_of(field.table))
                .into());
        }
    }
    Ok(())
}
