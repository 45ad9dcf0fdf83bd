//! SQL type definitions and value-kind checks.

use crate::value::Value;

/// SQL data types a mapped column can declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Double,

    // Fixed precision
    Numeric { precision: u8, scale: u8 },
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    VarChar(u32),
    Text,

    // Binary types
    Blob,

    // Date/time types
    Timestamp,

    // UUID
    Uuid,

    // JSON
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Numeric { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            other => other.kind_name().to_string(),
        }
    }

    /// Type name without precision/length parameters.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Numeric { .. } => "NUMERIC",
            SqlType::Decimal { .. } => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::VarChar(_) => "VARCHAR",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    /// Whether a runtime value has a kind this column can hold.
    ///
    /// NULL is accepted by every type; nullability is checked elsewhere.
    /// Narrower integers are accepted by wider integer columns.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::SmallInt, Value::SmallInt(_)) => true,
            (SqlType::Integer, Value::SmallInt(_) | Value::Int(_)) => true,
            (SqlType::BigInt, Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Double, Value::Double(_)) => true,
            (SqlType::Numeric { .. } | SqlType::Decimal { .. }, Value::Decimal(_)) => true,
            (SqlType::Boolean, Value::Bool(_)) => true,
            (SqlType::VarChar(_) | SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Bytes(_)) => true,
            (SqlType::Timestamp, Value::Timestamp(_)) => true,
            (SqlType::Uuid, Value::Uuid(_)) => true,
            (SqlType::Json, Value::Json(_)) => true,
            _ => false,
        }
    }

    /// Whether this type can carry an optimistic-lock version.
    pub const fn is_version_capable(&self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::BigInt | SqlType::Numeric { .. } | SqlType::Decimal { .. }
        )
    }
}
