//! Error types for relmap operations.
//!
//! Every error raised by the cache and statement layers is a usage or
//! internal-consistency failure; none of them are retried here. Each payload
//! carries the table/field context and, where it applies, the expected and
//! actual values.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Value kind did not match the declared column type
    Type(TypeError),
    /// Field access through an `Accessor` failed
    Access(AccessError),
    /// Identity cache invariant violated
    Cache(CacheError),
    /// Statement could not be constructed
    Statement(StatementError),
    /// Table metadata is invalid
    Schema(SchemaError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub table: Option<String>,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct AccessError {
    pub kind: AccessErrorKind,
    pub entity: &'static str,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessErrorKind {
    /// The accessor has no slot for the requested field
    MissingField,
    /// The value handed to a setter has the wrong kind
    TypeMismatch,
}

#[derive(Debug)]
pub struct CacheError {
    pub kind: CacheErrorKind,
    pub table: String,
    pub field: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    /// The instance has no id value
    NullId,
    /// A required field (the version) is null
    NonNullField,
    /// The live id no longer matches the id captured at registration
    ImmutableField,
    /// A recorded field name resolves to no column of the table chain
    UnknownField,
    /// Unique field and table belong to unrelated hierarchies
    UnrelatedTable,
    /// Lookup by a field that carries no unique index
    NotUnique,
    /// Version value cannot be advanced
    VersionOverflow,
    /// The instance already records changes for another entry
    AlreadyTracked,
}

#[derive(Debug)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// Parent and child parameter groups do not line up
    GroupMismatch,
    /// Parameter groups of one batch have different arity
    RaggedBatch,
    /// Nothing to assign, insert or bind
    Empty,
    /// The row spans more tables than a parent/child pair can address
    TooManyTables,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table already registered
    TableExists,
    /// Table id out of range or unknown name
    TableNotFound,
    /// Table does not declare exactly one primary key
    PrimaryKey,
    /// Parent link is inconsistent with the child
    Parent,
    /// Version field is missing or not numeric
    Version,
}

impl Error {
    /// Was this error caused by the caller (as opposed to a framework bug)?
    ///
    /// `UnknownField` is the one cache error that can only come from
    /// inconsistent metadata or a faulty change notifier.
    pub fn is_usage_error(&self) -> bool {
        match self {
            Error::Cache(c) => c.kind != CacheErrorKind::UnknownField,
            Error::Type(_) | Error::Access(_) | Error::Statement(_) => true,
            _ => false,
        }
    }

    /// Get the cache error kind, if this is a cache error.
    pub fn cache_kind(&self) -> Option<CacheErrorKind> {
        match self {
            Error::Cache(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Get the statement error kind, if this is a statement error.
    pub fn statement_kind(&self) -> Option<StatementErrorKind> {
        match self {
            Error::Statement(s) => Some(s.kind),
            _ => None,
        }
    }
}

impl CacheError {
    pub fn new(kind: CacheErrorKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            field: None,
            expected: None,
            actual: None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn expected(mut self, expected: impl fmt::Display) -> Self {
        self.expected = Some(expected.to_string());
        self
    }

    #[must_use]
    pub fn actual(mut self, actual: impl fmt::Display) -> Self {
        self.actual = Some(actual.to_string());
        self
    }
}

impl CacheErrorKind {
    fn describe(self) -> &'static str {
        match self {
            CacheErrorKind::NullId => "id is null",
            CacheErrorKind::NonNullField => "non-null field is null",
            CacheErrorKind::ImmutableField => "immutable field changed",
            CacheErrorKind::UnknownField => "unknown field",
            CacheErrorKind::UnrelatedTable => "field does not belong to table hierarchy",
            CacheErrorKind::NotUnique => "field has no unique index",
            CacheErrorKind::VersionOverflow => "version cannot be incremented",
            CacheErrorKind::AlreadyTracked => "instance is already tracked by another entry",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Access(e) => write!(f, "Access error: {}", e),
            Error::Cache(e) => write!(f, "Cache error: {}", e),
            Error::Statement(e) => write!(f, "Statement error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.table, &self.column) {
            (Some(table), Some(col)) => write!(
                f,
                "expected {} for '{}.{}', found {}",
                self.expected, table, col, self.actual
            ),
            (None, Some(col)) => write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            ),
            _ => write!(f, "expected {}, found {}", self.expected, self.actual),
        }
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.entity, self.field, self.message)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on table '{}'", self.kind.describe(), self.table)?;
        if let Some(field) = &self.field {
            write!(f, ", field '{}'", field)?;
        }
        match (&self.expected, &self.actual) {
            (Some(expected), Some(actual)) => write!(f, " (expected {}, found {})", expected, actual),
            (Some(expected), None) => write!(f, " (expected {})", expected),
            (None, Some(actual)) => write!(f, " (found {})", actual),
            (None, None) => Ok(()),
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{} (table '{}')", self.message, table)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table '{}': {}", self.table, self.message)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<AccessError> for Error {
    fn from(err: AccessError) -> Self {
        Error::Access(err)
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Error::Cache(err)
    }
}

impl From<StatementError> for Error {
    fn from(err: StatementError) -> Self {
        Error::Statement(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_display_carries_context() {
        let err = Error::from(
            CacheError::new(CacheErrorKind::ImmutableField, "orders")
                .field("id")
                .expected(1)
                .actual(2),
        );
        assert_eq!(
            err.to_string(),
            "Cache error: immutable field changed on table 'orders', field 'id' (expected 1, found 2)"
        );
        assert_eq!(err.cache_kind(), Some(CacheErrorKind::ImmutableField));
    }

    #[test]
    fn usage_classification() {
        let unknown = Error::from(CacheError::new(CacheErrorKind::UnknownField, "orders"));
        assert!(!unknown.is_usage_error());

        let null_id = Error::from(CacheError::new(CacheErrorKind::NullId, "orders"));
        assert!(null_id.is_usage_error());

        let mismatch = Error::Statement(StatementError {
            kind: StatementErrorKind::GroupMismatch,
            table: None,
            message: "3 parent groups vs 2 child groups".to_string(),
        });
        assert!(mismatch.is_usage_error());
        assert_eq!(mismatch.statement_kind(), Some(StatementErrorKind::GroupMismatch));
        assert_eq!(mismatch.cache_kind(), None);
    }

    #[test]
    fn type_error_display() {
        let err = TypeError {
            expected: "BIGINT",
            actual: "TEXT".to_string(),
            table: Some("orders".to_string()),
            column: Some("id".to_string()),
        };
        assert_eq!(err.to_string(), "expected BIGINT for 'orders.id', found TEXT");
    }
}
