//! Optimistic-lock version values.

use std::fmt;

use relmap_core::{CacheError, CacheErrorKind, FieldRef, Result, TableId, TableRegistry, TypeError, Value};
use relmap_statement::VersionPredicate;

/// A version column value in its own numeric kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionValue {
    Int(i32),
    BigInt(i64),
    /// Arbitrary-precision integer, as a decimal digit string with an
    /// optional leading `-`
    Decimal(String),
}

impl VersionValue {
    /// Interpret a column value as a version. NULL and non-integer kinds
    /// yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(VersionValue::Int(*v)),
            Value::BigInt(v) => Some(VersionValue::BigInt(*v)),
            Value::Decimal(s) => normalize_decimal(s).map(VersionValue::Decimal),
            _ => None,
        }
    }

    /// The next version, or `None` if a fixed-width kind would overflow.
    pub fn increment(&self) -> Option<Self> {
        match self {
            VersionValue::Int(v) => v.checked_add(1).map(VersionValue::Int),
            VersionValue::BigInt(v) => v.checked_add(1).map(VersionValue::BigInt),
            VersionValue::Decimal(s) => Some(VersionValue::Decimal(increment_decimal(s))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            VersionValue::Int(v) => Value::Int(*v),
            VersionValue::BigInt(v) => Value::BigInt(*v),
            VersionValue::Decimal(s) => Value::Decimal(s.clone()),
        }
    }
}

impl fmt::Display for VersionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionValue::Int(v) => write!(f, "{}", v),
            VersionValue::BigInt(v) => write!(f, "{}", v),
            VersionValue::Decimal(s) => f.write_str(s),
        }
    }
}

/// Accepts `[-]digits` with an optional all-zero fraction; returns the
/// canonical integer form.
fn normalize_decimal(s: &str) -> Option<String> {
    let s = s.trim();
    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty()
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b == b'0')
    {
        return None;
    }
    let digits = int_part.trim_start_matches('0');
    Some(match (digits.is_empty(), negative) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{}", digits),
        (false, false) => digits.to_string(),
    })
}

/// Add one to a canonical decimal integer string.
fn increment_decimal(s: &str) -> String {
    match s.strip_prefix('-') {
        // -n + 1 = -(n - 1)
        Some(magnitude) => {
            let mut digits = magnitude.as_bytes().to_vec();
            for d in digits.iter_mut().rev() {
                if *d == b'0' {
                    *d = b'9';
                } else {
                    *d -= 1;
                    break;
                }
            }
            let trimmed = String::from_utf8_lossy(&digits).trim_start_matches('0').to_string();
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                format!("-{}", trimmed)
            }
        }
        None => {
            let mut digits = s.as_bytes().to_vec();
            let mut carry = true;
            for d in digits.iter_mut().rev() {
                if *d == b'9' {
                    *d = b'0';
                } else {
                    *d += 1;
                    carry = false;
                    break;
                }
            }
            if carry {
                digits.insert(0, b'1');
            }
            String::from_utf8_lossy(&digits).into_owned()
        }
    }
}

/// The version column of one table chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticLock {
    table: &'static str,
    field: FieldRef,
    name: &'static str,
}

impl OptimisticLock {
    /// The lock for rows of `leaf`, if any table of its chain declares a
    /// version field.
    pub fn for_table(registry: &TableRegistry, leaf: TableId) -> Option<Self> {
        let field = registry.version_field(leaf)?;
        let info = registry.field(field)?;
        Some(Self {
            table: registry.name_of(leaf),
            field,
            name: info.name,
        })
    }

    pub fn field(&self) -> FieldRef {
        self.field
    }

    /// Logical name of the version field.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check a version read from an instance: it must be non-null and an
    /// integer kind.
    pub fn check(&self, value: &Value) -> Result<VersionValue> {
        if value.is_null() {
            return Err(CacheError::new(CacheErrorKind::NonNullField, self.table)
                .field(self.name)
                .into());
        }
        VersionValue::from_value(value).ok_or_else(|| {
            TypeError {
                expected: "integer version",
                actual: value.type_name().to_string(),
                table: Some(self.table.to_string()),
                column: Some(self.name.to_string()),
            }
            .into()
        })
    }

    /// The next version after `current`.
    pub fn advance(&self, current: &VersionValue) -> Result<VersionValue> {
        current.increment().ok_or_else(|| {
            CacheError::new(CacheErrorKind::VersionOverflow, self.table)
                .field(self.name)
                .actual(current)
                .into()
        })
    }

    /// WHERE-clause predicate expecting `current`.
    pub fn predicate(&self, current: &VersionValue) -> VersionPredicate {
        VersionPredicate {
            field: self.field,
            value: current.to_value(),
        }
    }
}
