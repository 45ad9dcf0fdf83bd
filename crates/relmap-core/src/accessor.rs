//! Generic field access on domain instances.
//!
//! Instead of reflecting over a domain type at runtime, each entity type
//! publishes a static table of getter/setter function pointers keyed by
//! logical field name. The identity cache only ever sees `dyn Accessor<M>`.
//!
//! # Example
//!
//! ```
//! use relmap_core::{Entity, FieldAccessor, FieldSlot, Value};
//!
//! struct Order {
//!     id: i64,
//!     name: String,
//! }
//!
//! static ORDER_FIELDS: &[FieldSlot<Order>] = &[
//!     FieldSlot {
//!         name: "id",
//!         get: |o| Value::BigInt(o.id),
//!         set: |o, v| {
//!             o.id = v.try_into()?;
//!             Ok(())
//!         },
//!     },
//!     FieldSlot {
//!         name: "name",
//!         get: |o| Value::Text(o.name.clone()),
//!         set: |o, v| {
//!             o.name = v.try_into()?;
//!             Ok(())
//!         },
//!     },
//! ];
//!
//! static ORDER_ACCESSOR: FieldAccessor<Order> = FieldAccessor::new("Order", ORDER_FIELDS);
//!
//! impl Entity for Order {
//!     fn accessor() -> &'static FieldAccessor<Self> {
//!         &ORDER_ACCESSOR
//!     }
//! }
//! ```

use crate::error::{AccessError, AccessErrorKind, Error, Result};
use crate::value::Value;

/// Read and write named fields of a domain instance.
///
/// Implementations must report a missing field and a value of the wrong
/// kind as distinct `AccessErrorKind`s.
pub trait Accessor<M>: Send + Sync {
    /// Read the current value of `field`.
    fn get(&self, instance: &M, field: &str) -> Result<Value>;

    /// Write `value` into `field`.
    fn set(&self, instance: &mut M, field: &str, value: Value) -> Result<()>;
}

/// One getter/setter pair.
pub struct FieldSlot<M: 'static> {
    pub name: &'static str,
    pub get: fn(&M) -> Value,
    pub set: fn(&mut M, Value) -> Result<()>,
}

/// Accessor backed by a static table of `FieldSlot`s.
pub struct FieldAccessor<M: 'static> {
    entity: &'static str,
    slots: &'static [FieldSlot<M>],
}

impl<M: 'static> FieldAccessor<M> {
    pub const fn new(entity: &'static str, slots: &'static [FieldSlot<M>]) -> Self {
        Self { entity, slots }
    }

    /// Entity name used in error messages.
    pub const fn entity(&self) -> &'static str {
        self.entity
    }

    /// Names of every accessible field, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|s| s.name)
    }

    fn slot(&self, field: &str) -> Result<&FieldSlot<M>> {
        self.slots.iter().find(|s| s.name == field).ok_or_else(|| {
            AccessError {
                kind: AccessErrorKind::MissingField,
                entity: self.entity,
                field: field.to_string(),
                message: "no such field".to_string(),
            }
            .into()
        })
    }
}

impl<M: 'static> Accessor<M> for FieldAccessor<M> {
    fn get(&self, instance: &M, field: &str) -> Result<Value> {
        Ok((self.slot(field)?.get)(instance))
    }

    fn set(&self, instance: &mut M, field: &str, value: Value) -> Result<()> {
        let slot = self.slot(field)?;
        (slot.set)(instance, value).map_err(|err| match err {
            Error::Type(t) => AccessError {
                kind: AccessErrorKind::TypeMismatch,
                entity: self.entity,
                field: field.to_string(),
                message: t.to_string(),
            }
            .into(),
            other => other,
        })
    }
}

/// A domain type that can be tracked by the identity cache.
pub trait Entity: Sized + Send + Sync + 'static {
    /// The static accessor for this type.
    fn accessor() -> &'static FieldAccessor<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        id: i64,
        label: Option<String>,
    }

    static ITEM_FIELDS: &[FieldSlot<Item>] = &[
        FieldSlot {
            name: "id",
            get: |i| Value::BigInt(i.id),
            set: |i, v| {
                i.id = v.try_into()?;
                Ok(())
            },
        },
        FieldSlot {
            name: "label",
            get: |i| Value::from(i.label.clone()),
            set: |i, v| {
                i.label = v.try_into()?;
                Ok(())
            },
        },
    ];

    static ITEM_ACCESSOR: FieldAccessor<Item> = FieldAccessor::new("Item", ITEM_FIELDS);

    #[test]
    fn get_and_set() {
        let mut item = Item { id: 1, label: None };
        assert_eq!(ITEM_ACCESSOR.get(&item, "label").unwrap(), Value::Null);
        ITEM_ACCESSOR
            .set(&mut item, "label", Value::Text("x".to_string()))
            .unwrap();
        assert_eq!(item.label.as_deref(), Some("x"));
        assert_eq!(ITEM_ACCESSOR.get(&item, "id").unwrap(), Value::BigInt(1));
    }

    #[test]
    fn missing_field_is_distinguishable() {
        let item = Item { id: 1, label: None };
        let err = ITEM_ACCESSOR.get(&item, "nope").unwrap_err();
        assert!(matches!(
            err,
            Error::Access(AccessError { kind: AccessErrorKind::MissingField, .. })
        ));
    }

    #[test]
    fn type_mismatch_is_distinguishable() {
        let mut item = Item { id: 1, label: None };
        let err = ITEM_ACCESSOR
            .set(&mut item, "id", Value::Text("one".to_string()))
            .unwrap_err();
        match err {
            Error::Access(access) => {
                assert_eq!(access.kind, AccessErrorKind::TypeMismatch);
                assert_eq!(access.field, "id");
                assert_eq!(access.entity, "Item");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(item.id, 1);
    }

    #[test]
    fn field_names_in_order() {
        let names: Vec<_> = ITEM_ACCESSOR.field_names().collect();
        assert_eq!(names, vec!["id", "label"]);
    }
}
