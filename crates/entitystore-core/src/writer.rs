//! Snapshot and diff appends.

use entitystore_db::{EventLog, ExpectedVersion};
use entitystore_types::{Entity, EventRecord, Metadata, PropertyChange, StreamGuid};
use tracing::debug;

use crate::differ::diff;
use crate::error::StoreError;
use crate::naming::{stream_name, validate_shape};
use crate::reconstruct::EntityReconstructor;

/// Appends entity events to the log.
///
/// Writes are unconditional (`ExpectedVersion::Any`): two concurrent
/// updates of the same stream both land, in arrival order.
#[derive(Debug, Clone, Copy)]
pub struct EntityWriter<'a> {
    log: &'a EventLog,
    reconstructor: EntityReconstructor<'a>,
}

impl<'a> EntityWriter<'a> {
    /// Create a writer that reads "before" state through `reconstructor`.
    pub const fn new(log: &'a EventLog, reconstructor: EntityReconstructor<'a>) -> Self {
        Self { log, reconstructor }
    }

    /// Start a new stream with a snapshot of `entity` and return its name.
    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<String, StoreError> {
        validate_shape::<T>()?;

        let shape = T::shape_name();
        let guid = StreamGuid::new();
        let stream = stream_name(shape, guid);
        let record = EventRecord::structured(shape, entity, &Metadata::now(guid, shape))?;

        self.log
            .append_to_stream(&stream, ExpectedVersion::Any, &record)
            .await?;

        debug!(stream = stream.as_str(), shape, "Inserted entity");
        Ok(stream)
    }

    /// Append the diff between the stream's current value and `entity`.
    ///
    /// Returns the recorded changes. A diff is appended even when it is
    /// empty.
    pub async fn update<T: Entity>(
        &self,
        entity: &T,
        stream: &str,
    ) -> Result<Vec<PropertyChange>, StoreError> {
        validate_shape::<T>()?;

        let current = self
            .reconstructor
            .load::<T>(stream)
            .await?
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_owned()))?;

        let changes = diff(&current.state.entity, entity)?;
        let metadata = current.snapshot_metadata.restamped();
        let record = EventRecord::structured(T::shape_name(), &changes, &metadata)?;

        self.log
            .append_to_stream(stream, ExpectedVersion::Any, &record)
            .await?;

        debug!(stream, changes = changes.len(), "Updated entity");
        Ok(changes)
    }

    /// Delete the stream. Deleting a stream that was never written is a no-op.
    pub async fn delete(&self, stream: &str) -> Result<(), StoreError> {
        self.log.delete_stream(stream, ExpectedVersion::Any).await?;
        debug!(stream, "Deleted entity stream");
        Ok(())
    }
}
