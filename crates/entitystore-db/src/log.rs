//! The append-only log interface.
//!
//! Streams are read forward in slices. Each slice reports whether the end
//! of the stream was reached and whether the stream exists at all; a
//! missing or deleted stream is a status, not an error.

use std::fmt;

use entitystore_types::EventRecord;

use crate::error::DbError;
use crate::http::HttpEventLog;
use crate::memory::MemoryEventLog;

/// Precondition on the stream's current version for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// Write unconditionally.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event number must equal this value.
    Exact(u64),
}

impl ExpectedVersion {
    /// Value of the `ES-ExpectedVersion` header.
    pub fn header_value(self) -> String {
        match self {
            Self::Any => "-2".to_owned(),
            Self::NoStream => "-1".to_owned(),
            Self::Exact(version) => version.to_string(),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::NoStream => write!(f, "no stream"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// Outcome of reading a stream slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceReadStatus {
    /// The stream exists and the slice was read.
    Success,
    /// The stream has never been written.
    StreamNotFound,
    /// The stream was deleted.
    StreamDeleted,
}

/// A record as stored in a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Zero-based position within the stream.
    pub event_number: u64,
    /// The record as it was appended.
    pub record: EventRecord,
}

/// A page of a forward stream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSlice {
    /// Records in stream order.
    pub events: Vec<RecordedEvent>,
    /// Position to start the next read from.
    pub next_position: u64,
    /// Whether this slice reached the end of the stream.
    pub is_end_of_stream: bool,
    /// Whether the stream exists.
    pub status: SliceReadStatus,
}

impl StreamSlice {
    /// An empty, final slice carrying a non-success status.
    pub const fn missing(from: u64, status: SliceReadStatus) -> Self {
        Self {
            events: Vec::new(),
            next_position: from,
            is_end_of_stream: true,
            status,
        }
    }
}

/// An append-only log backend.
///
/// Uses enum dispatch instead of trait objects because async methods
/// are not dyn-compatible in Rust.
#[derive(Debug, Clone)]
pub enum EventLog {
    /// EventStoreDB over its HTTP API.
    Http(HttpEventLog),
    /// In-process node.
    Memory(MemoryEventLog),
}

impl EventLog {
    /// Append one record to `stream`, creating the stream if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::WrongExpectedVersion`] if `expected` does not hold,
    /// [`DbError::StreamDeleted`] if the stream was deleted, or a transport
    /// error.
    pub async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        record: &EventRecord,
    ) -> Result<(), DbError> {
        match self {
            Self::Http(log) => log.append_to_stream(stream, expected, record).await,
            Self::Memory(log) => log.append_to_stream(stream, expected, record).await,
        }
    }

    /// Read up to `max_count` records starting at position `from`.
    ///
    /// # Errors
    ///
    /// Returns a transport or decoding error. A missing or deleted stream is
    /// reported through [`StreamSlice::status`], not as an error.
    pub async fn read_stream_forward(
        &self,
        stream: &str,
        from: u64,
        max_count: usize,
    ) -> Result<StreamSlice, DbError> {
        match self {
            Self::Http(log) => log.read_stream_forward(stream, from, max_count).await,
            Self::Memory(log) => log.read_stream_forward(stream, from, max_count).await,
        }
    }

    /// Delete `stream`. Its name is never reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::WrongExpectedVersion`] if `expected` does not hold,
    /// [`DbError::StreamDeleted`] if it was already deleted, or a transport
    /// error.
    pub async fn delete_stream(&self, stream: &str, expected: ExpectedVersion) -> Result<(), DbError> {
        match self {
            Self::Http(log) => log.delete_stream(stream, expected).await,
            Self::Memory(log) => log.delete_stream(stream, expected).await,
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "eventstore-http",
            Self::Memory(_) => "memory",
        }
    }
}
