//! Field and column definitions.

use crate::table::TableId;
use crate::types::SqlType;

/// Metadata about a mapped field/column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Logical field name (what accessors and change notifications use)
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is the primary key
    pub primary_key: bool,
    /// Whether this field has a single-column unique index
    pub unique: bool,
    /// Whether this field is the optimistic-lock version
    pub version: bool,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            unique: false,
            version: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set unique constraint flag.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Mark this field as the optimistic-lock version.
    pub const fn version(mut self, value: bool) -> Self {
        self.version = value;
        self
    }

    /// Whether lookups by this field may use the identity cache.
    pub const fn is_secondary_unique(&self) -> bool {
        self.unique && !self.primary_key
    }
}

/// Position of a field inside a `TableRegistry`: owning table plus index
/// into that table's field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub table: TableId,
    pub index: usize,
}

impl FieldRef {
    pub const fn new(table: TableId, index: usize) -> Self {
        Self { table, index }
    }
}
