//! Event records, metadata, and the change history built from them.
//!
//! A stream holds one snapshot record followed by any number of diff
//! records. Both kinds share the same [`EventRecord`] envelope; only the
//! `data` payload differs (a full entity versus a list of
//! [`PropertyChange`]s).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventId, StreamGuid};

/// One field's transition inside a diff event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    /// Field name as declared by the shape.
    pub name: String,
    /// Value before the change (`null` when the field was unset).
    pub old_value: Value,
    /// Value after the change (`null` when the field was cleared).
    pub new_value: Value,
}

impl PropertyChange {
    /// Build a change for the named field.
    pub fn new(name: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            name: name.into(),
            old_value,
            new_value,
        }
    }
}

/// Provenance attached to every record of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Guid the stream was created with.
    pub stream_guid: StreamGuid,
    /// Shape name of the entity held by the stream.
    pub stream_data_type: String,
    /// Wall-clock time the record was written.
    pub event_entry_date: DateTime<Utc>,
}

impl Metadata {
    /// Metadata for a record written now.
    pub fn now(stream_guid: StreamGuid, stream_data_type: impl Into<String>) -> Self {
        Self {
            stream_guid,
            stream_data_type: stream_data_type.into(),
            event_entry_date: Utc::now(),
        }
    }

    /// Copy of this metadata restamped with the current time.
    #[must_use]
    pub fn restamped(&self) -> Self {
        Self {
            event_entry_date: Utc::now(),
            ..self.clone()
        }
    }
}

/// The unit appended to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Unique id of this record.
    pub event_id: EventId,
    /// Event type string; the entity store writes the shape name here.
    pub event_type: String,
    /// Whether `data` holds JSON.
    pub is_structured: bool,
    /// Serialized payload.
    pub data: Vec<u8>,
    /// Serialized [`Metadata`].
    pub metadata: Vec<u8>,
}

impl EventRecord {
    /// Build a JSON record from any serializable payload and its metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if either value fails to serialize.
    pub fn structured<P: Serialize + ?Sized>(
        event_type: impl Into<String>,
        payload: &P,
        metadata: &Metadata,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            is_structured: true,
            data: serde_json::to_vec(payload)?,
            metadata: serde_json::to_vec(metadata)?,
        })
    }

    /// Decode the `data` payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for `P`.
    pub fn decode_data<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Decode the `metadata` payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is not a valid [`Metadata`] object.
    pub fn decode_metadata(&self) -> Result<Metadata, serde_json::Error> {
        serde_json::from_slice(&self.metadata)
    }
}

/// The changes recorded by one diff event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// `eventEntryDate` of the diff record.
    pub recorded_at: DateTime<Utc>,
    /// The changes, in field declaration order.
    pub changes: Vec<PropertyChange>,
}

/// An entity's current value together with every change applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWithHistory<T> {
    /// Current value after folding all diffs over the snapshot.
    pub entity: T,
    /// One entry per diff event, in stream order.
    pub history: Vec<HistoryEntry>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn property_change_uses_camel_case_keys() {
        let change = PropertyChange::new("Age", serde_json::json!(30), serde_json::json!(31));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Age", "oldValue": 30, "newValue": 31})
        );
    }

    #[test]
    fn metadata_wire_shape() {
        let guid = StreamGuid::new();
        let metadata = Metadata::now(guid, "Person");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["streamGuid"], serde_json::json!(guid.to_string()));
        assert_eq!(json["streamDataType"], "Person");
        assert!(json.get("eventEntryDate").is_some());
    }

    #[test]
    fn restamped_keeps_provenance() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let later = metadata.restamped();
        assert_eq!(later.stream_guid, metadata.stream_guid);
        assert_eq!(later.stream_data_type, metadata.stream_data_type);
        assert!(later.event_entry_date >= metadata.event_entry_date);
    }

    #[test]
    fn structured_record_decodes_back() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let changes = vec![PropertyChange::new(
            "Name",
            Value::Null,
            serde_json::json!("Alice"),
        )];
        let record = EventRecord::structured("Person", &changes, &metadata).unwrap();

        assert!(record.is_structured);
        assert_eq!(record.event_type, "Person");
        let decoded: Vec<PropertyChange> = record.decode_data().unwrap();
        assert_eq!(decoded, changes);
        assert_eq!(record.decode_metadata().unwrap(), metadata);
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        let mut record =
            EventRecord::structured("Person", &1, &Metadata::now(StreamGuid::new(), "Person"))
                .unwrap();
        record.metadata = b"not json".to_vec();
        assert!(record.decode_metadata().is_err());
    }
}
