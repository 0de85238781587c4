//! The storable-entity capability and per-shape field descriptors.
//!
//! The store never inspects a value's type at runtime. Instead each shape
//! opts in by implementing [`Entity`], which hands out an
//! [`EntityDescriptor`]: the shape name plus an ordered list of fields, each
//! with a typed getter, a typed setter, and equality. Declaration order is
//! the order diffs are computed in, so it must stay stable.
//!
//! Most shapes are declared with [`entity_shape!`](crate::entity_shape):
//!
//! ```
//! use entitystore_types::{entity_shape, Entity};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: Option<u32>,
//! }
//!
//! entity_shape!(Person as "Person" {
//!     name => "Name",
//!     age => "Age",
//! });
//!
//! assert_eq!(Person::shape_name(), "Person");
//! assert_eq!(Person::descriptor().len(), 2);
//! ```

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

type ReadFn<T> = Box<dyn Fn(&T) -> Result<Value, serde_json::Error> + Send + Sync>;
type EqualFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;
type WriteFn<T> = Box<dyn Fn(&mut T, Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// A value that can be event-sourced by the entity store.
///
/// Implementing this trait is the explicit opt-in: primitives and standard
/// library types never implement it, so they cannot be stored by accident.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The field descriptor for this shape, built once and shared.
    fn descriptor() -> &'static EntityDescriptor<Self>;

    /// The shape name recorded as the event type of every record.
    fn shape_name() -> &'static str {
        Self::descriptor().shape_name()
    }
}

/// One named field of a shape.
///
/// Values cross the descriptor as [`serde_json::Value`] so that a diff can
/// carry them, but reads and writes go through the field's declared type:
/// writing a value deserializes it into that type, which is where a stored
/// `newValue` is coerced back during replay.
pub struct FieldDescriptor<T> {
    name: &'static str,
    read: ReadFn<T>,
    equal: EqualFn<T>,
    write: WriteFn<T>,
}

impl<T: 'static> FieldDescriptor<T> {
    /// Describe a field through a pair of accessors.
    pub fn new<F>(name: &'static str, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self
    where
        F: Serialize + DeserializeOwned + PartialEq + 'static,
    {
        Self {
            name,
            read: Box::new(move |entity: &T| serde_json::to_value(get(entity))),
            equal: Box::new(move |a: &T, b: &T| get(a) == get(b)),
            write: Box::new(
                move |entity: &mut T, value: Value| -> Result<(), serde_json::Error> {
                    *get_mut(entity) = serde_json::from_value(value)?;
                    Ok(())
                },
            ),
        }
    }
}

impl<T> FieldDescriptor<T> {
    /// The field name as it appears in diffs.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Read the field as a JSON value. An absent optional reads as `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field value cannot be serialized.
    pub fn read(&self, entity: &T) -> Result<Value, serde_json::Error> {
        (self.read)(entity)
    }

    /// Compare the field on two values with the field type's own equality.
    pub fn equal(&self, a: &T, b: &T) -> bool {
        (self.equal)(a, b)
    }

    /// Overwrite the field with `value`, coerced to the declared type.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` does not deserialize into the field type.
    /// The entity is left untouched in that case.
    pub fn write(&self, entity: &mut T, value: Value) -> Result<(), serde_json::Error> {
        (self.write)(entity, value)
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered field list of one shape.
pub struct EntityDescriptor<T> {
    shape_name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: 'static> EntityDescriptor<T> {
    /// Start a descriptor for the named shape with no fields.
    pub const fn new(shape_name: &'static str) -> Self {
        Self {
            shape_name,
            fields: Vec::new(),
        }
    }

    /// Append a field. Fields are diffed in the order they are added.
    #[must_use]
    pub fn field<F>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self
    where
        F: Serialize + DeserializeOwned + PartialEq + 'static,
    {
        self.fields.push(FieldDescriptor::new(name, get, get_mut));
        self
    }
}

impl<T> EntityDescriptor<T> {
    /// The shape name, exactly as declared.
    pub const fn shape_name(&self) -> &'static str {
        self.shape_name
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    /// Look a field up by its diff name.
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the shape declares no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T> fmt::Debug for EntityDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("shape_name", &self.shape_name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Implement [`Entity`] for a struct by listing its fields.
///
/// Each entry maps a struct field to the name it carries in diffs. The
/// descriptor is built on first use and cached for the life of the process.
#[macro_export]
macro_rules! entity_shape {
    (
        $ty:ty as $shape:literal {
            $($field:ident => $name:literal),* $(,)?
        }
    ) => {
        impl $crate::Entity for $ty {
            fn descriptor() -> &'static $crate::EntityDescriptor<Self> {
                static DESCRIPTOR: ::std::sync::OnceLock<$crate::EntityDescriptor<$ty>> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| {
                    $crate::EntityDescriptor::<$ty>::new($shape)
                        $(.field($name, |e: &$ty| &e.$field, |e: &mut $ty| &mut e.$field))*
                })
            }
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        label: String,
        weight: Option<u16>,
    }

    crate::entity_shape!(Gadget as "Gadget" {
        label => "Label",
        weight => "Weight",
    });

    fn gadget() -> Gadget {
        Gadget {
            label: "lamp".to_owned(),
            weight: Some(3),
        }
    }

    #[test]
    fn descriptor_keeps_declaration_order() {
        let names: Vec<&str> = Gadget::descriptor()
            .fields()
            .iter()
            .map(FieldDescriptor::name)
            .collect();
        assert_eq!(names, vec!["Label", "Weight"]);
        assert_eq!(Gadget::shape_name(), "Gadget");
    }

    #[test]
    fn read_reports_none_as_null() {
        let mut g = gadget();
        g.weight = None;
        let field = Gadget::descriptor().field_named("Weight").unwrap();
        assert_eq!(field.read(&g).unwrap(), Value::Null);
    }

    #[test]
    fn write_coerces_into_declared_type() {
        let mut g = gadget();
        let field = Gadget::descriptor().field_named("Weight").unwrap();
        field.write(&mut g, serde_json::json!(12)).unwrap();
        assert_eq!(g.weight, Some(12));

        field.write(&mut g, Value::Null).unwrap();
        assert_eq!(g.weight, None);
    }

    #[test]
    fn write_rejects_mistyped_value_without_touching_entity() {
        let mut g = gadget();
        let field = Gadget::descriptor().field_named("Weight").unwrap();
        assert!(field.write(&mut g, serde_json::json!("heavy")).is_err());
        assert_eq!(g, gadget());
    }

    #[test]
    fn equal_uses_field_equality() {
        let a = gadget();
        let mut b = gadget();
        let label = Gadget::descriptor().field_named("Label").unwrap();
        assert!(label.equal(&a, &b));
        b.label = "desk".to_owned();
        assert!(!label.equal(&a, &b));
    }

    #[test]
    fn unknown_field_lookup_is_none() {
        assert!(Gadget::descriptor().field_named("Colour").is_none());
    }
}
