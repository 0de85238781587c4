//! Error types for the entity layer.
//!
//! Transport failures arrive as [`DbError`] and are wrapped exactly once in
//! [`StoreError::Log`]; everything else is a failure of the entity model
//! itself (an ineligible shape, a stream that cannot be replayed).

use entitystore_db::DbError;

use crate::config::ConfigError;

/// Errors returned by entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The shape cannot be stored. Raised before anything is written.
    #[error("invalid shape {shape}: {reason}")]
    InvalidShape {
        /// Shape name as declared.
        shape: String,
        /// What disqualifies it.
        reason: String,
    },

    /// An update targeted a stream that does not reconstruct to an entity.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A diff event names a field the shape does not declare.
    #[error("stream {stream} event {event_number} changes unknown field {field} of {shape}")]
    UnknownField {
        /// Stream being replayed.
        stream: String,
        /// Position of the offending record.
        event_number: u64,
        /// Shape the stream was replayed as.
        shape: String,
        /// The unknown field name.
        field: String,
    },

    /// A record's data or metadata could not be decoded.
    #[error("malformed event {event_number} in stream {stream}: {source}")]
    MalformedEvent {
        /// Stream being replayed.
        stream: String,
        /// Position of the offending record.
        event_number: u64,
        /// The decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// An entity could not be serialized for writing.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The log or the query engine failed.
    #[error("log error: {0}")]
    Log(#[from] DbError),

    /// The client could not be constructed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The client configuration is unusable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
