//! Stream naming and shape eligibility.
//!
//! A stream is named `lowercase(shape) + "-" + guid`, where the guid is the
//! hyphenated form of a fresh [`StreamGuid`]. Names are never reused: every
//! insert draws a new guid, and deleted streams stay tombstoned.

use std::collections::HashSet;

use entitystore_types::{Entity, EntityDescriptor, StreamGuid};
use uuid::Uuid;

use crate::error::StoreError;

/// Length of a hyphenated UUID.
const GUID_LEN: usize = 36;

/// Shape names reserved for primitives and standard library types, matched
/// without regard to case.
const PRIMITIVE_SHAPES: &[&str] = &[
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32",
    "u64", "u128", "usize", "f32", "f64", "String", "Vec", "Option", "Result", "Box",
    "HashMap", "BTreeMap", "HashSet", "BTreeSet", "Value", "Uuid", "DateTime", "Duration",
    "Boolean", "Byte", "Int16", "Int32", "Int64", "Single", "Double", "Decimal", "Object",
    "Guid", "DateTimeOffset", "TimeSpan",
];

fn invalid(shape: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidShape {
        shape: shape.to_owned(),
        reason: reason.into(),
    }
}

/// Check that `T` may be stored.
pub fn validate_shape<T: Entity>() -> Result<(), StoreError> {
    validate_descriptor(T::descriptor())
}

/// Check a descriptor: a usable name, at least one field, unique field names.
pub fn validate_descriptor<T>(descriptor: &EntityDescriptor<T>) -> Result<(), StoreError> {
    let shape = descriptor.shape_name();

    if shape.is_empty() {
        return Err(invalid(shape, "shape name is empty"));
    }
    if shape.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(invalid(shape, "shape name contains whitespace or '/'"));
    }
    if PRIMITIVE_SHAPES.iter().any(|p| p.eq_ignore_ascii_case(shape)) {
        return Err(invalid(shape, "primitive and standard types cannot be stored"));
    }
    if descriptor.is_empty() {
        return Err(invalid(shape, "shape declares no fields"));
    }

    let mut seen = HashSet::with_capacity(descriptor.len());
    for field in descriptor.fields() {
        if field.name().is_empty() {
            return Err(invalid(shape, "field name is empty"));
        }
        if !seen.insert(field.name()) {
            return Err(invalid(shape, format!("duplicate field {}", field.name())));
        }
    }
    Ok(())
}

/// Stream name for an entity of `shape` created with `guid`.
pub fn stream_name(shape: &str, guid: StreamGuid) -> String {
    format!("{}-{}", shape.to_lowercase(), guid.into_inner().hyphenated())
}

/// Split a stream name back into its lowercase shape and guid.
///
/// Returns `None` for names this store did not produce.
pub fn parse_stream_name(name: &str) -> Option<(&str, StreamGuid)> {
    let split = name.len().checked_sub(GUID_LEN)?;
    let (head, tail) = name.split_at_checked(split)?;
    let shape = head.strip_suffix('-')?;
    if shape.is_empty() {
        return None;
    }
    let guid = Uuid::try_parse(tail).ok()?;
    Some((shape, StreamGuid::from(guid)))
}
