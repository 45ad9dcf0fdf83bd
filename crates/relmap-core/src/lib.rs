//! Core types and traits for relmap.
//!
//! This crate provides the foundations the session cache and the statement
//! layer share:
//!
//! - `Value` for dynamically-typed column values
//! - `TableRegistry` / `TableMeta` / `FieldInfo` for read-only mapping metadata
//! - `Accessor` / `FieldAccessor` / `Entity` for generic field access
//! - `Error` / `Result` for every fallible operation

pub mod accessor;
pub mod error;
pub mod field;
pub mod table;
pub mod types;
pub mod value;

pub use accessor::{Accessor, Entity, FieldAccessor, FieldSlot};
pub use error::{
    AccessError, AccessErrorKind, CacheError, CacheErrorKind, Error, Result,
    SchemaError, SchemaErrorKind, StatementError, StatementErrorKind, TypeError,
};
pub use field::{FieldInfo, FieldRef};
pub use table::{TableId, TableMeta, TableRegistry};
pub use types::SqlType;
pub use value::{KeyValue, Value};
