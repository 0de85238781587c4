//! The continuous-query (projection) engine interface.
//!
//! Enumeration by shape relies on a server-side query folding over the
//! built-in `$streams` feed. The query source is rendered from a template;
//! the in-memory backend evaluates the same query natively.

use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::http::HttpProjections;
use crate::memory::MemoryProjections;

/// Name of the built-in index that feeds one record per stream.
pub const STREAMS_INDEX: &str = "$streams";

/// Query template keeping streams whose event type matches `{{eventType}}`.
const STREAMS_BY_EVENT_TYPE_TEMPLATE: &str = r"fromStream('$streams').
    when({
        $init: function() {
            return { streamIds: [] };
        },
        $any: function(s, e) {
            if (e.data !== null && e.body !== null) {
                if (String(e.eventType).toLowerCase() === '{{eventType}}') {
                    s.streamIds.push(e.streamId);
                }
            }
        }
    });";

/// A continuous query the store knows how to submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectionQuery {
    /// Ids of every stream whose event type, lowercased, equals `event_type`.
    StreamsByEventType {
        /// Lowercased match key.
        event_type: String,
    },
}

impl ProjectionQuery {
    /// Query for all streams of a shape. The key is lowercased here.
    pub fn streams_by_event_type(shape_name: &str) -> Self {
        Self::StreamsByEventType {
            event_type: shape_name.to_lowercase(),
        }
    }

    /// Render the query source submitted to the server.
    pub fn source(&self) -> String {
        match self {
            Self::StreamsByEventType { event_type } => {
                let key = event_type.replace('\\', "\\\\").replace('\'', "\\'");
                STREAMS_BY_EVENT_TYPE_TEMPLATE.replace("{{eventType}}", &key)
            }
        }
    }

    /// The built-in index the query reads from.
    pub const fn index(&self) -> &'static str {
        match self {
            Self::StreamsByEventType { .. } => STREAMS_INDEX,
        }
    }
}

/// Materialized state of a stream-by-type query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIdSearchResult {
    /// Matching stream ids in feed order. May contain duplicates.
    #[serde(rename = "streamIds", default)]
    pub stream_ids: Vec<String>,
}

impl StreamIdSearchResult {
    /// Parse a result body.
    ///
    /// Returns `None` while the query has not produced state yet (empty
    /// body, or an object without `streamIds`).
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn parse(body: &str) -> Result<Option<Self>, serde_json::Error> {
        if body.trim().is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(body)?;
        if value.get("streamIds").is_none() {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}

/// A continuous-query engine backend.
///
/// Uses enum dispatch instead of trait objects because async methods
/// are not dyn-compatible in Rust.
#[derive(Debug, Clone)]
pub enum ProjectionEngine {
    /// EventStoreDB projections over HTTP.
    Http(HttpProjections),
    /// In-process node.
    Memory(MemoryProjections),
}

impl ProjectionEngine {
    /// Enable a projection, typically a built-in index such as [`STREAMS_INDEX`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ProjectionNotFound`] for an unknown name, or a
    /// transport error.
    pub async fn enable(&self, name: &str) -> Result<(), DbError> {
        match self {
            Self::Http(engine) => engine.enable(name).await,
            Self::Memory(engine) => engine.enable(name).await,
        }
    }

    /// Create and start a continuous query under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ProjectionExists`] if the name is taken, or a
    /// transport error.
    pub async fn create_continuous(&self, name: &str, query: &ProjectionQuery) -> Result<(), DbError> {
        match self {
            Self::Http(engine) => engine.create_continuous(name, query).await,
            Self::Memory(engine) => engine.create_continuous(name, query).await,
        }
    }

    /// Fetch the query's materialized result, `None` if not produced yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ProjectionNotFound`] for an unknown name, a
    /// decoding error, or a transport error.
    pub async fn get_result(&self, name: &str) -> Result<Option<StreamIdSearchResult>, DbError> {
        match self {
            Self::Http(engine) => engine.get_result(name).await,
            Self::Memory(engine) => engine.get_result(name).await,
        }
    }

    /// Stop a running query.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ProjectionNotFound`] for an unknown name, or a
    /// transport error.
    pub async fn disable(&self, name: &str) -> Result<(), DbError> {
        match self {
            Self::Http(engine) => engine.disable(name).await,
            Self::Memory(engine) => engine.disable(name).await,
        }
    }

    /// Remove a query and its state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ProjectionNotFound`] for an unknown name, or a
    /// transport error.
    pub async fn delete(&self, name: &str) -> Result<(), DbError> {
        match self {
            Self::Http(engine) => engine.delete(name).await,
            Self::Memory(engine) => engine.delete(name).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn query_key_is_lowercased() {
        let query = ProjectionQuery::streams_by_event_type("Person");
        assert_eq!(
            query,
            ProjectionQuery::StreamsByEventType {
                event_type: "person".to_owned()
            }
        );
        assert_eq!(query.index(), STREAMS_INDEX);
    }

    #[test]
    fn source_substitutes_key() {
        let source = ProjectionQuery::streams_by_event_type("Person").source();
        assert!(source.contains("=== 'person'"));
        assert!(source.contains("fromStream('$streams')"));
        assert!(!source.contains("{{eventType}}"));
    }

    #[test]
    fn source_escapes_quotes() {
        let source = ProjectionQuery::streams_by_event_type("o'brien").source();
        assert!(source.contains(r"=== 'o\'brien'"));
    }

    #[test]
    fn parse_result_with_ids() {
        let parsed = StreamIdSearchResult::parse(r#"{"streamIds":["person-1","person-2"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.stream_ids, vec!["person-1", "person-2"]);
    }

    #[test]
    fn parse_result_not_ready() {
        assert!(StreamIdSearchResult::parse("").unwrap().is_none());
        assert!(StreamIdSearchResult::parse("  ").unwrap().is_none());
        assert!(StreamIdSearchResult::parse("{}").unwrap().is_none());
    }

    #[test]
    fn parse_result_rejects_garbage() {
        assert!(StreamIdSearchResult::parse("<html>").is_err());
    }
}
