//! Error types for the transport layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`reqwest`] and [`serde_json`] errors and adds the log-service failures
//! the entity layer needs to tell apart.

use crate::log::ExpectedVersion;

/// Errors that can occur talking to the log or the query engine.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The HTTP request could not be completed.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An append or delete was rejected by its expected-version precondition.
    #[error("Wrong expected version on stream {stream}: expected {expected}")]
    WrongExpectedVersion {
        /// Stream the write targeted.
        stream: String,
        /// The precondition that failed.
        expected: ExpectedVersion,
    },

    /// The stream has been deleted and cannot be written to.
    #[error("Stream deleted: {0}")]
    StreamDeleted(String),

    /// The named projection does not exist.
    #[error("Projection not found: {0}")]
    ProjectionNotFound(String),

    /// A projection with this name already exists.
    #[error("Projection already exists: {0}")]
    ProjectionExists(String),

    /// A query was submitted before the index it reads from was enabled.
    #[error("Projection {name} depends on disabled index {index}")]
    IndexDisabled {
        /// The query that cannot run.
        name: String,
        /// The built-in index it needs.
        index: String,
    },

    /// A request URL could not be built.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// The server rejected the credentials.
    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    /// The server answered with a status the operation does not expect.
    #[error("{operation} returned {status}: {body}")]
    UnexpectedStatus {
        /// What was being attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The server answered with a payload that could not be understood.
    #[error("Malformed response from {operation}: {reason}")]
    MalformedResponse {
        /// What was being attempted.
        operation: String,
        /// What was wrong with the payload.
        reason: String,
    },
}
