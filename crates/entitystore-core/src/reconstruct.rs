//! Replay of a stream into an entity and its change history.
//!
//! Reading is a paged forward scan from position zero. The fold itself is
//! pure ([`replay`]): the first record is the snapshot, every later record
//! is a diff whose `newValue`s are written field by field through the
//! shape's typed setters. Any record that cannot be decoded, or that names
//! a field the shape does not declare, fails the whole call; a partially
//! applied entity is never returned.

use entitystore_db::{EventLog, RecordedEvent, SliceReadStatus};
use entitystore_types::{Entity, EntityWithHistory, HistoryEntry, Metadata, PropertyChange};
use tracing::debug;

use crate::error::StoreError;

/// The outcome of replaying a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Replayed<T> {
    /// Current value and history.
    pub state: EntityWithHistory<T>,
    /// Metadata of the snapshot record.
    pub snapshot_metadata: Metadata,
}

/// Rebuilds entities from their streams.
#[derive(Debug, Clone, Copy)]
pub struct EntityReconstructor<'a> {
    log: &'a EventLog,
    page_size: usize,
}

impl<'a> EntityReconstructor<'a> {
    /// Create a reconstructor reading `page_size` records per request.
    pub const fn new(log: &'a EventLog, page_size: usize) -> Self {
        Self { log, page_size }
    }

    /// Read every record of `stream`, or `None` if it is missing or deleted.
    pub async fn read_all(&self, stream: &str) -> Result<Option<Vec<RecordedEvent>>, StoreError> {
        let page_size = self.page_size.max(1);
        let mut events = Vec::new();
        let mut position = 0_u64;

        loop {
            let slice = self
                .log
                .read_stream_forward(stream, position, page_size)
                .await?;
            match slice.status {
                SliceReadStatus::Success => {}
                SliceReadStatus::StreamNotFound | SliceReadStatus::StreamDeleted => {
                    debug!(stream, status = ?slice.status, "Stream is absent");
                    return Ok(None);
                }
            }

            let advanced = slice.next_position > position;
            position = slice.next_position;
            events.extend(slice.events);
            if slice.is_end_of_stream || !advanced {
                break;
            }
        }

        if events.is_empty() {
            return Ok(None);
        }
        debug!(stream, count = events.len(), "Read stream");
        Ok(Some(events))
    }

    /// Replay `stream`, keeping the snapshot metadata.
    pub async fn load<T: Entity>(&self, stream: &str) -> Result<Option<Replayed<T>>, StoreError> {
        match self.read_all(stream).await? {
            Some(events) => replay(stream, &events).map(Some),
            None => Ok(None),
        }
    }

    /// Current value and full history of `stream`.
    pub async fn reconstruct<T: Entity>(
        &self,
        stream: &str,
    ) -> Result<Option<EntityWithHistory<T>>, StoreError> {
        Ok(self.load(stream).await?.map(|replayed| replayed.state))
    }

    /// Current value of `stream`.
    pub async fn get<T: Entity>(&self, stream: &str) -> Result<Option<T>, StoreError> {
        Ok(self.load(stream).await?.map(|replayed| replayed.state.entity))
    }
}

/// Fold a stream's records into its entity and history.
///
/// `events` must be non-empty and in stream order.
pub fn replay<T: Entity>(stream: &str, events: &[RecordedEvent]) -> Result<Replayed<T>, StoreError> {
    let Some((snapshot, diffs)) = events.split_first() else {
        return Err(StoreError::StreamNotFound(stream.to_owned()));
    };

    let malformed = |event: &RecordedEvent, source: serde_json::Error| StoreError::MalformedEvent {
        stream: stream.to_owned(),
        event_number: event.event_number,
        source,
    };

    let mut entity: T = snapshot
        .record
        .decode_data()
        .map_err(|e| malformed(snapshot, e))?;
    let snapshot_metadata = snapshot
        .record
        .decode_metadata()
        .map_err(|e| malformed(snapshot, e))?;

    let mut history = Vec::with_capacity(diffs.len());
    for event in diffs {
        let changes: Vec<PropertyChange> =
            event.record.decode_data().map_err(|e| malformed(event, e))?;
        let metadata = event
            .record
            .decode_metadata()
            .map_err(|e| malformed(event, e))?;

        apply_changes(&mut entity, &changes).map_err(|failure| match failure {
            ApplyFailure::UnknownField(field) => StoreError::UnknownField {
                stream: stream.to_owned(),
                event_number: event.event_number,
                shape: T::shape_name().to_owned(),
                field,
            },
            ApplyFailure::Coercion(source) => malformed(event, source),
        })?;

        history.push(HistoryEntry {
            recorded_at: metadata.event_entry_date,
            changes,
        });
    }

    Ok(Replayed {
        state: EntityWithHistory { entity, history },
        snapshot_metadata,
    })
}

/// Replay recorded history over a snapshot.
///
/// Folding a reconstructed history over the original snapshot yields the
/// reconstructed entity.
pub fn apply_history<T: Entity>(mut snapshot: T, history: &[HistoryEntry]) -> Result<T, StoreError> {
    for entry in history {
        apply_changes(&mut snapshot, &entry.changes).map_err(|failure| match failure {
            ApplyFailure::UnknownField(field) => StoreError::InvalidShape {
                shape: T::shape_name().to_owned(),
                reason: format!("history changes unknown field {field}"),
            },
            ApplyFailure::Coercion(source) => StoreError::Serialization(source),
        })?;
    }
    Ok(snapshot)
}

enum ApplyFailure {
    UnknownField(String),
    Coercion(serde_json::Error),
}

fn apply_changes<T: Entity>(entity: &mut T, changes: &[PropertyChange]) -> Result<(), ApplyFailure> {
    let descriptor = T::descriptor();
    for change in changes {
        let field = descriptor
            .field_named(&change.name)
            .ok_or_else(|| ApplyFailure::UnknownField(change.name.clone()))?;
        field
            .write(entity, change.new_value.clone())
            .map_err(ApplyFailure::Coercion)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use entitystore_db::{ExpectedVersion, MemoryNode};
    use entitystore_types::{EventRecord, StreamGuid, entity_shape};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: Option<u32>,
    }

    entity_shape!(Person as "Person" { name => "Name", age => "Age" });

    fn recorded(event_number: u64, record: EventRecord) -> RecordedEvent {
        RecordedEvent {
            event_number,
            record,
        }
    }

    fn snapshot(person: &Person, metadata: &Metadata) -> RecordedEvent {
        recorded(0, EventRecord::structured("Person", person, metadata).unwrap())
    }

    fn diff_event(n: u64, changes: &[PropertyChange], metadata: &Metadata) -> RecordedEvent {
        recorded(n, EventRecord::structured("Person", changes, metadata).unwrap())
    }

    fn alice() -> Person {
        Person {
            name: "Alice".to_owned(),
            age: Some(30),
        }
    }

    #[test]
    fn snapshot_only_has_empty_history() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let replayed: Replayed<Person> = replay("s", &[snapshot(&alice(), &metadata)]).unwrap();
        assert_eq!(replayed.state.entity, alice());
        assert!(replayed.state.history.is_empty());
        assert_eq!(replayed.snapshot_metadata, metadata);
    }

    #[test]
    fn diffs_fold_over_snapshot() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let first = vec![PropertyChange::new("Age", json!(30), json!(31))];
        let second = vec![PropertyChange::new("Age", json!(31), json!(null))];
        let events = [
            snapshot(&alice(), &metadata),
            diff_event(1, &first, &metadata.restamped()),
            diff_event(2, &second, &metadata.restamped()),
        ];

        let replayed: Replayed<Person> = replay("s", &events).unwrap();
        assert_eq!(replayed.state.entity.age, None);
        assert_eq!(replayed.state.history.len(), 2);
        assert_eq!(replayed.state.history[0].changes, first);
        assert!(
            replayed.state.history[0].recorded_at <= replayed.state.history[1].recorded_at
        );
    }

    #[test]
    fn empty_diff_is_kept_in_history() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let events = [
            snapshot(&alice(), &metadata),
            diff_event(1, &[], &metadata.restamped()),
        ];
        let replayed: Replayed<Person> = replay("s", &events).unwrap();
        assert_eq!(replayed.state.entity, alice());
        assert_eq!(replayed.state.history.len(), 1);
        assert!(replayed.state.history[0].changes.is_empty());
    }

    #[test]
    fn unknown_field_fails_replay() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let changes = vec![PropertyChange::new("Email", json!(null), json!("a@b"))];
        let events = [snapshot(&alice(), &metadata), diff_event(1, &changes, &metadata)];

        let err = replay::<Person>("s", &events).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnknownField { event_number: 1, ref field, .. } if field == "Email"
        ));
    }

    #[test]
    fn mistyped_new_value_is_malformed() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let changes = vec![PropertyChange::new("Age", json!(30), json!("old"))];
        let events = [snapshot(&alice(), &metadata), diff_event(1, &changes, &metadata)];

        assert!(matches!(
            replay::<Person>("s", &events),
            Err(StoreError::MalformedEvent { event_number: 1, .. })
        ));
    }

    #[test]
    fn corrupt_metadata_is_malformed() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let mut first = snapshot(&alice(), &metadata);
        first.record.metadata = b"{".to_vec();
        assert!(matches!(
            replay::<Person>("s", &[first]),
            Err(StoreError::MalformedEvent { event_number: 0, .. })
        ));
    }

    #[test]
    fn history_refolds_to_entity() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let events = [
            snapshot(&alice(), &metadata),
            diff_event(1, &[PropertyChange::new("Name", json!("Alice"), json!("Al"))], &metadata),
            diff_event(2, &[PropertyChange::new("Age", json!(30), json!(40))], &metadata),
        ];
        let replayed: Replayed<Person> = replay("s", &events).unwrap();
        let refolded = apply_history(alice(), &replayed.state.history).unwrap();
        assert_eq!(refolded, replayed.state.entity);
    }

    #[tokio::test]
    async fn reads_across_pages() {
        let node = MemoryNode::new();
        let log = EventLog::Memory(node.event_log());
        let metadata = Metadata::now(StreamGuid::new(), "Person");

        log.append_to_stream(
            "person-x",
            ExpectedVersion::Any,
            &EventRecord::structured("Person", &alice(), &metadata).unwrap(),
        )
        .await
        .unwrap();
        for age in 31..36_u32 {
            let changes = vec![PropertyChange::new("Age", json!(age.saturating_sub(1)), json!(age))];
            log.append_to_stream(
                "person-x",
                ExpectedVersion::Any,
                &EventRecord::structured("Person", &changes, &metadata.restamped()).unwrap(),
            )
            .await
            .unwrap();
        }

        let reconstructor = EntityReconstructor::new(&log, 2);
        let state = reconstructor
            .reconstruct::<Person>("person-x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.entity.age, Some(35));
        assert_eq!(state.history.len(), 5);
    }

    #[tokio::test]
    async fn missing_stream_is_absent() {
        let node = MemoryNode::new();
        let log = EventLog::Memory(node.event_log());
        let reconstructor = EntityReconstructor::new(&log, 200);
        assert!(reconstructor.get::<Person>("person-none").await.unwrap().is_none());
    }
}
