//! Statement decomposition for relmap.
//!
//! `wrapper` holds the immutable execution units handed to an executor;
//! `builder` renders them for single rows, batches and parent/child table
//! pairs. Nothing here executes SQL.

pub mod builder;
pub mod wrapper;

pub use builder::{
    Assignment, DefaultStatementBuilder, InsertRow, ParamStyle, StatementBuilder, UpdateRequest,
    VersionPredicate,
};
pub use wrapper::{
    BatchWrapper, DomainWrapper, PairOrder, PairWrapper, ParamGroups, ReturningWrapper, Statement,
    VersionedWrapper, Wrapper,
};
