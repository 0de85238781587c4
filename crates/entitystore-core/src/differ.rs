//! Field-level diffs between two values of the same shape.

use entitystore_types::{Entity, PropertyChange};

use crate::error::StoreError;

/// List the fields that differ between `old` and `new`, in declaration order.
///
/// A field is recorded when exactly one side is null, or when both are set
/// and the field type's equality says they differ. Fields null on both
/// sides, or equal on both sides, are skipped, so `diff(x, x)` is empty.
pub fn diff<T: Entity>(old: &T, new: &T) -> Result<Vec<PropertyChange>, StoreError> {
    let mut changes = Vec::new();

    for field in T::descriptor().fields() {
        let old_value = field.read(old)?;
        let new_value = field.read(new)?;

        let record = match (old_value.is_null(), new_value.is_null()) {
            (true, true) => false,
            (false, false) => !field.equal(old, new),
            _ => true,
        };
        if record {
            changes.push(PropertyChange::new(field.name(), old_value, new_value));
        }
    }

    Ok(changes)
}
