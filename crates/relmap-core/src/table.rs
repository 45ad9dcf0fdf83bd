//! Table metadata and the table registry.
//!
//! The registry is an arena: tables are addressed by `TableId` (an index),
//! and a child table in a table-per-subtype hierarchy points at its parent
//! by index. Parents must be registered before their children, so the
//! parent links can never form a cycle and walking a chain always ends.
//!
//! The registry is built once, before any cache is created, and shared
//! read-only afterwards (typically as `Arc<TableRegistry>`).

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SchemaError, SchemaErrorKind};
use crate::field::{FieldInfo, FieldRef};

/// Index of a table inside a `TableRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

impl TableId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of one physical table.
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Table name
    pub name: &'static str,
    /// Columns declared by this table (a child table declares its own
    /// columns plus the shared id)
    pub fields: Vec<FieldInfo>,
    /// Parent table for table-per-subtype inheritance
    pub parent: Option<TableId>,
}

impl TableMeta {
    pub fn new(name: &'static str, fields: Vec<FieldInfo>) -> Self {
        Self {
            name,
            fields,
            parent: None,
        }
    }

    /// Link this table to its parent table.
    #[must_use]
    pub fn parent(mut self, parent: TableId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Index of the primary key field.
    pub fn id_index(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.primary_key)
    }

    /// Index of the version field declared on this table, if any.
    pub fn version_index(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.version)
    }

    /// Index of the field with the given logical name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Arena of table descriptors.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Vec<TableMeta>,
    by_name: HashMap<&'static str, TableId>,
}

impl TableRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table and return its id.
    ///
    /// Rejects tables that do not declare exactly one primary key, duplicate
    /// names, unknown parents, child ids whose type differs from the
    /// parent's, and version fields that are not integer or decimal (or that
    /// would make a chain carry two versions).
    #[tracing::instrument(level = "debug", skip(self, meta), fields(table = meta.name))]
    pub fn register(&mut self, meta: TableMeta) -> Result<TableId> {
        let schema_err = |kind, message: String| SchemaError {
            kind,
            table: meta.name.to_string(),
            message,
        };

        if self.by_name.contains_key(meta.name) {
            return Err(schema_err(SchemaErrorKind::TableExists, "already registered".to_string()).into());
        }

        let pk_count = meta.fields.iter().filter(|f| f.primary_key).count();
        if pk_count != 1 {
            return Err(schema_err(
                SchemaErrorKind::PrimaryKey,
                format!("expected exactly one primary key field, found {}", pk_count),
            )
            .into());
        }

        let versions: Vec<&FieldInfo> = meta.fields.iter().filter(|f| f.version).collect();
        if versions.len() > 1 {
            return Err(schema_err(
                SchemaErrorKind::Version,
                format!("expected at most one version field, found {}", versions.len()),
            )
            .into());
        }
        if let Some(version) = versions.first() {
            if !version.sql_type.is_version_capable() {
                return Err(schema_err(
                    SchemaErrorKind::Version,
                    format!(
                        "version field '{}' must be an integer or decimal, found {}",
                        version.name,
                        version.sql_type.sql_name()
                    ),
                )
                .into());
            }
        }

        if let Some(parent) = meta.parent {
            let Some(parent_meta) = self.tables.get(parent.index()) else {
                return Err(schema_err(
                    SchemaErrorKind::Parent,
                    format!("parent table {} is not registered", parent),
                )
                .into());
            };
            let parent_id = &parent_meta.fields[parent_meta.id_index().unwrap_or_default()];
            let child_id = &meta.fields[meta.id_index().unwrap_or_default()];
            if parent_id.sql_type != child_id.sql_type {
                return Err(schema_err(
                    SchemaErrorKind::Parent,
                    format!(
                        "id type {} does not match parent '{}' id type {}",
                        child_id.sql_type.sql_name(),
                        parent_meta.name,
                        parent_id.sql_type.sql_name()
                    ),
                )
                .into());
            }
            if !versions.is_empty() && self.version_field(parent).is_some() {
                return Err(schema_err(
                    SchemaErrorKind::Version,
                    format!("parent '{}' already declares a version field", parent_meta.name),
                )
                .into());
            }
        }

        let id = TableId(self.tables.len());
        tracing::debug!(table = meta.name, id = id.index(), parent = ?meta.parent, "Registered table");
        self.by_name.insert(meta.name, id);
        self.tables.push(meta);
        Ok(id)
    }

    /// Get a table by id.
    pub fn get(&self, id: TableId) -> Option<&TableMeta> {
        self.tables.get(id.index())
    }

    /// Get a table by id, failing for ids from another registry.
    pub fn table(&self, id: TableId) -> Result<&TableMeta> {
        self.get(id).ok_or_else(|| {
            SchemaError {
                kind: SchemaErrorKind::TableNotFound,
                table: id.to_string(),
                message: "not registered".to_string(),
            }
            .into()
        })
    }

    /// Find a table by name.
    pub fn lookup(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).copied()
    }

    /// Name of a table, or a placeholder for unknown ids (used in error context).
    pub fn name_of(&self, id: TableId) -> &'static str {
        self.get(id).map_or("<unknown>", |t| t.name)
    }

    /// Walk the table chain from `leaf` up to the root, leaf included.
    pub fn chain(&self, leaf: TableId) -> Chain<'_> {
        Chain {
            registry: self,
            next: self.get(leaf).map(|_| leaf),
        }
    }

    /// Whether `ancestor` is `table` itself or one of its parents.
    pub fn is_same_or_ancestor(&self, ancestor: TableId, table: TableId) -> bool {
        self.chain(table).any(|t| t == ancestor)
    }

    /// Resolve a logical field name: the leaf table first, then up the chain.
    pub fn resolve_field(&self, leaf: TableId, name: &str) -> Option<FieldRef> {
        self.chain(leaf).find_map(|t| {
            self.tables[t.index()]
                .field_index(name)
                .map(|index| FieldRef::new(t, index))
        })
    }

    /// Get field metadata.
    pub fn field(&self, field: FieldRef) -> Option<&FieldInfo> {
        self.get(field.table)?.fields.get(field.index)
    }

    /// The primary key field of a table.
    pub fn id_field(&self, table: TableId) -> Option<FieldRef> {
        let meta = self.get(table)?;
        meta.id_index().map(|index| FieldRef::new(table, index))
    }

    /// The version field for rows of `leaf`, searching up the chain.
    pub fn version_field(&self, leaf: TableId) -> Option<FieldRef> {
        self.chain(leaf).find_map(|t| {
            self.tables[t.index()]
                .version_index()
                .map(|index| FieldRef::new(t, index))
        })
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Iterator over a table chain, leaf first.
pub struct Chain<'a> {
    registry: &'a TableRegistry,
    next: Option<TableId>,
}

impl Iterator for Chain<'_> {
    type Item = TableId;

    fn next(&mut self) -> Option<TableId> {
        let current = self.next?;
        self.next = self.registry.get(current).and_then(|t| t.parent);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::SqlType;

    fn region_province() -> (TableRegistry, TableId, TableId) {
        let mut registry = TableRegistry::new();
        let region = registry
            .register(TableMeta::new(
                "region",
                vec![
                    FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                    FieldInfo::new("regionCode", "region_code", SqlType::VarChar(16)).unique(true),
                    FieldInfo::new("version", "version", SqlType::Integer).version(true),
                ],
            ))
            .unwrap();
        let province = registry
            .register(
                TableMeta::new(
                    "province",
                    vec![
                        FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                        FieldInfo::new("provinceName", "province_name", SqlType::Text),
                    ],
                )
                .parent(region),
            )
            .unwrap();
        (registry, region, province)
    }

    #[test]
    fn chain_walks_leaf_to_root() {
        let (registry, region, province) = region_province();
        let chain: Vec<TableId> = registry.chain(province).collect();
        assert_eq!(chain, vec![province, region]);
        assert!(registry.is_same_or_ancestor(region, province));
        assert!(registry.is_same_or_ancestor(province, province));
        assert!(!registry.is_same_or_ancestor(province, region));
    }

    #[test]
    fn resolve_prefers_leaf_then_parent() {
        let (registry, region, province) = region_province();
        assert_eq!(registry.resolve_field(province, "id"), Some(FieldRef::new(province, 0)));
        assert_eq!(
            registry.resolve_field(province, "regionCode"),
            Some(FieldRef::new(region, 1))
        );
        assert_eq!(registry.resolve_field(region, "provinceName"), None);
        assert_eq!(registry.version_field(province), Some(FieldRef::new(region, 2)));
    }

    #[test]
    fn rejects_missing_primary_key() {
        let mut registry = TableRegistry::new();
        let err = registry
            .register(TableMeta::new(
                "orphan",
                vec![FieldInfo::new("name", "name", SqlType::Text)],
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError { kind: SchemaErrorKind::PrimaryKey, .. })));
    }

    #[test]
    fn rejects_duplicate_table() {
        let (mut registry, _, _) = region_province();
        let err = registry
            .register(TableMeta::new(
                "region",
                vec![FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)],
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError { kind: SchemaErrorKind::TableExists, .. })));
    }

    #[test]
    fn rejects_parent_id_type_mismatch() {
        let (mut registry, region, _) = region_province();
        let err = registry
            .register(
                TableMeta::new(
                    "city",
                    vec![FieldInfo::new("id", "id", SqlType::Text).primary_key(true)],
                )
                .parent(region),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError { kind: SchemaErrorKind::Parent, .. })));
    }

    #[test]
    fn rejects_second_version_in_chain() {
        let (mut registry, region, _) = region_province();
        let err = registry
            .register(
                TableMeta::new(
                    "city",
                    vec![
                        FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                        FieldInfo::new("rev", "rev", SqlType::BigInt).version(true),
                    ],
                )
                .parent(region),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError { kind: SchemaErrorKind::Version, .. })));
    }

    #[test]
    fn rejects_non_numeric_version() {
        let mut registry = TableRegistry::new();
        let err = registry
            .register(TableMeta::new(
                "notes",
                vec![
                    FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                    FieldInfo::new("stamp", "stamp", SqlType::Text).version(true),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError { kind: SchemaErrorKind::Version, .. })));
    }

    #[test]
    fn lookup_by_name() {
        let (registry, region, province) = region_province();
        assert_eq!(registry.lookup("region"), Some(region));
        assert_eq!(registry.lookup("province"), Some(province));
        assert_eq!(registry.lookup("city"), None);
        assert_eq!(registry.len(), 2);
    }
}
