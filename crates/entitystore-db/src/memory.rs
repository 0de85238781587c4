//! In-process log node.
//!
//! [`MemoryNode`] keeps streams, the `$streams` feed, and projections behind
//! one lock and hands out cheap handles implementing both backend
//! interfaces. It mirrors the server's observable behaviour closely enough
//! for the entity layer not to notice: expected versions are enforced,
//! deleted streams stay tombstoned, and the stream-by-type query only runs
//! once `$streams` has been enabled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use entitystore_types::EventRecord;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DbError;
use crate::log::{ExpectedVersion, RecordedEvent, SliceReadStatus, StreamSlice};
use crate::projections::{ProjectionQuery, STREAMS_INDEX, StreamIdSearchResult};

/// Built-in projections the node knows how to enable.
const SYSTEM_PROJECTIONS: [&str; 4] = [
    STREAMS_INDEX,
    "$by_category",
    "$by_event_type",
    "$stream_by_category",
];

#[derive(Debug, Default)]
struct StoredStream {
    events: Vec<RecordedEvent>,
    deleted: bool,
}

impl StoredStream {
    fn last_event_number(&self) -> Option<u64> {
        self.events.last().map(|event| event.event_number)
    }
}

#[derive(Debug)]
struct Projection {
    query: ProjectionQuery,
    enabled: bool,
}

#[derive(Debug, Default)]
struct NodeState {
    streams: HashMap<String, StoredStream>,
    /// Stream names in creation order, as the `$streams` index feeds them.
    feed: Vec<String>,
    projections: HashMap<String, Projection>,
    enabled_system: HashSet<String>,
}

impl NodeState {
    fn check_expected(
        stream: &str,
        current: Option<&StoredStream>,
        expected: ExpectedVersion,
    ) -> Result<(), DbError> {
        let last = current.and_then(StoredStream::last_event_number);
        let holds = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => last.is_none(),
            ExpectedVersion::Exact(version) => last == Some(version),
        };
        if holds {
            Ok(())
        } else {
            Err(DbError::WrongExpectedVersion {
                stream: stream.to_owned(),
                expected,
            })
        }
    }

    fn evaluate(&self, query: &ProjectionQuery) -> StreamIdSearchResult {
        match query {
            ProjectionQuery::StreamsByEventType { event_type } => {
                let stream_ids = self
                    .feed
                    .iter()
                    .filter(|name| {
                        self.streams
                            .get(name.as_str())
                            .and_then(|stream| stream.events.first())
                            .is_some_and(|first| {
                                first.record.event_type.to_lowercase() == *event_type
                            })
                    })
                    .cloned()
                    .collect();
                StreamIdSearchResult { stream_ids }
            }
        }
    }
}

/// Shared in-process node.
#[derive(Debug, Default)]
pub struct MemoryNode {
    state: RwLock<NodeState>,
}

impl MemoryNode {
    /// Create an empty node.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle implementing the log interface.
    pub fn event_log(self: &Arc<Self>) -> MemoryEventLog {
        MemoryEventLog {
            node: Arc::clone(self),
        }
    }

    /// Handle implementing the query-engine interface.
    pub fn projections(self: &Arc<Self>) -> MemoryProjections {
        MemoryProjections {
            node: Arc::clone(self),
        }
    }

    /// Names of the user projections currently defined.
    pub async fn projection_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.projections.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Log handle onto a [`MemoryNode`].
#[derive(Debug, Clone)]
pub struct MemoryEventLog {
    node: Arc<MemoryNode>,
}

impl MemoryEventLog {
    pub(crate) async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        record: &EventRecord,
    ) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;

        let current = state.streams.get(stream);
        if current.is_some_and(|s| s.deleted) {
            return Err(DbError::StreamDeleted(stream.to_owned()));
        }
        NodeState::check_expected(stream, current, expected)?;

        if !state.streams.contains_key(stream) {
            state.feed.push(stream.to_owned());
        }
        let stored = state.streams.entry(stream.to_owned()).or_default();
        let event_number = stored
            .last_event_number()
            .map_or(0, |last| last.saturating_add(1));
        stored.events.push(RecordedEvent {
            event_number,
            record: record.clone(),
        });

        debug!(stream, event_number, "Appended event (memory)");
        Ok(())
    }

    pub(crate) async fn read_stream_forward(
        &self,
        stream: &str,
        from: u64,
        max_count: usize,
    ) -> Result<StreamSlice, DbError> {
        let state = self.node.state.read().await;

        let Some(stored) = state.streams.get(stream) else {
            return Ok(StreamSlice::missing(from, SliceReadStatus::StreamNotFound));
        };
        if stored.deleted {
            return Ok(StreamSlice::missing(from, SliceReadStatus::StreamDeleted));
        }

        let skip = usize::try_from(from).unwrap_or(usize::MAX);
        let events: Vec<RecordedEvent> = stored
            .events
            .iter()
            .skip(skip)
            .take(max_count)
            .cloned()
            .collect();
        let next_position = events
            .last()
            .map_or(from, |event| event.event_number.saturating_add(1));
        let is_end_of_stream = stored
            .last_event_number()
            .is_none_or(|last| next_position > last);

        Ok(StreamSlice {
            events,
            next_position,
            is_end_of_stream,
            status: SliceReadStatus::Success,
        })
    }

    pub(crate) async fn delete_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;

        let Some(stored) = state.streams.get_mut(stream) else {
            NodeState::check_expected(stream, None, expected)?;
            debug!(stream, "Delete of a stream that was never written (memory)");
            return Ok(());
        };
        if stored.deleted {
            return Err(DbError::StreamDeleted(stream.to_owned()));
        }
        NodeState::check_expected(stream, Some(&*stored), expected)?;
        stored.deleted = true;

        debug!(stream, "Deleted stream (memory)");
        Ok(())
    }
}

/// Query-engine handle onto a [`MemoryNode`].
#[derive(Debug, Clone)]
pub struct MemoryProjections {
    node: Arc<MemoryNode>,
}

impl MemoryProjections {
    pub(crate) async fn enable(&self, name: &str) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;
        if SYSTEM_PROJECTIONS.contains(&name) {
            state.enabled_system.insert(name.to_owned());
            return Ok(());
        }
        let projection = state
            .projections
            .get_mut(name)
            .ok_or_else(|| DbError::ProjectionNotFound(name.to_owned()))?;
        projection.enabled = true;
        Ok(())
    }

    pub(crate) async fn disable(&self, name: &str) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;
        if SYSTEM_PROJECTIONS.contains(&name) {
            state.enabled_system.remove(name);
            return Ok(());
        }
        let projection = state
            .projections
            .get_mut(name)
            .ok_or_else(|| DbError::ProjectionNotFound(name.to_owned()))?;
        projection.enabled = false;
        Ok(())
    }

    pub(crate) async fn create_continuous(
        &self,
        name: &str,
        query: &ProjectionQuery,
    ) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;
        if state.projections.contains_key(name) || SYSTEM_PROJECTIONS.contains(&name) {
            return Err(DbError::ProjectionExists(name.to_owned()));
        }
        state.projections.insert(
            name.to_owned(),
            Projection {
                query: query.clone(),
                enabled: true,
            },
        );
        Ok(())
    }

    pub(crate) async fn get_result(
        &self,
        name: &str,
    ) -> Result<Option<StreamIdSearchResult>, DbError> {
        let state = self.node.state.read().await;
        let projection = state
            .projections
            .get(name)
            .ok_or_else(|| DbError::ProjectionNotFound(name.to_owned()))?;

        let index = projection.query.index();
        if !state.enabled_system.contains(index) {
            return Err(DbError::IndexDisabled {
                name: name.to_owned(),
                index: index.to_owned(),
            });
        }
        if !projection.enabled {
            return Ok(None);
        }
        Ok(Some(state.evaluate(&projection.query)))
    }

    pub(crate) async fn delete(&self, name: &str) -> Result<(), DbError> {
        let mut state = self.node.state.write().await;
        state
            .projections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DbError::ProjectionNotFound(name.to_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use entitystore_types::{Metadata, StreamGuid};

    use super::*;
    use crate::log::EventLog;
    use crate::projections::ProjectionEngine;

    fn record(event_type: &str) -> EventRecord {
        let metadata = Metadata::now(StreamGuid::new(), event_type);
        EventRecord::structured(event_type, &serde_json::json!({}), &metadata).unwrap()
    }

    fn handles() -> (EventLog, ProjectionEngine) {
        let node = MemoryNode::new();
        (
            EventLog::Memory(node.event_log()),
            ProjectionEngine::Memory(node.projections()),
        )
    }

    #[tokio::test]
    async fn read_missing_stream_reports_not_found() {
        let (log, _) = handles();
        let slice = log.read_stream_forward("person-x", 0, 10).await.unwrap();
        assert_eq!(slice.status, SliceReadStatus::StreamNotFound);
        assert!(slice.is_end_of_stream);
    }

    #[tokio::test]
    async fn append_then_read_in_pages() {
        let (log, _) = handles();
        for _ in 0..5 {
            log.append_to_stream("s", ExpectedVersion::Any, &record("Person"))
                .await
                .unwrap();
        }

        let first = log.read_stream_forward("s", 0, 2).await.unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.next_position, 2);
        assert!(!first.is_end_of_stream);

        let last = log.read_stream_forward("s", 4, 2).await.unwrap();
        assert_eq!(last.events.len(), 1);
        assert_eq!(last.next_position, 5);
        assert!(last.is_end_of_stream);
    }

    #[tokio::test]
    async fn page_ending_exactly_at_tail_is_end() {
        let (log, _) = handles();
        for _ in 0..4 {
            log.append_to_stream("s", ExpectedVersion::Any, &record("Person"))
                .await
                .unwrap();
        }
        let slice = log.read_stream_forward("s", 2, 2).await.unwrap();
        assert!(slice.is_end_of_stream);
    }

    #[tokio::test]
    async fn expected_versions_are_enforced() {
        let (log, _) = handles();
        log.append_to_stream("s", ExpectedVersion::NoStream, &record("Person"))
            .await
            .unwrap();

        let again = log
            .append_to_stream("s", ExpectedVersion::NoStream, &record("Person"))
            .await;
        assert!(matches!(again, Err(DbError::WrongExpectedVersion { .. })));

        log.append_to_stream("s", ExpectedVersion::Exact(0), &record("Person"))
            .await
            .unwrap();
        let stale = log
            .append_to_stream("s", ExpectedVersion::Exact(0), &record("Person"))
            .await;
        assert!(matches!(stale, Err(DbError::WrongExpectedVersion { .. })));
    }

    #[tokio::test]
    async fn deleted_stream_is_tombstoned() {
        let (log, _) = handles();
        log.append_to_stream("s", ExpectedVersion::Any, &record("Person"))
            .await
            .unwrap();
        log.delete_stream("s", ExpectedVersion::Any).await.unwrap();

        let slice = log.read_stream_forward("s", 0, 10).await.unwrap();
        assert_eq!(slice.status, SliceReadStatus::StreamDeleted);

        let append = log
            .append_to_stream("s", ExpectedVersion::Any, &record("Person"))
            .await;
        assert!(matches!(append, Err(DbError::StreamDeleted(_))));

        let second_delete = log.delete_stream("s", ExpectedVersion::Any).await;
        assert!(matches!(second_delete, Err(DbError::StreamDeleted(_))));
    }

    #[tokio::test]
    async fn query_requires_streams_index() {
        let (_, engine) = handles();
        let query = ProjectionQuery::streams_by_event_type("Person");
        engine.create_continuous("q", &query).await.unwrap();

        let result = engine.get_result("q").await;
        assert!(matches!(result, Err(DbError::IndexDisabled { .. })));
    }

    #[tokio::test]
    async fn query_matches_first_event_type_case_insensitively() {
        let (log, engine) = handles();
        engine.enable(STREAMS_INDEX).await.unwrap();
        log.append_to_stream("person-1", ExpectedVersion::Any, &record("Person"))
            .await
            .unwrap();
        log.append_to_stream("order-1", ExpectedVersion::Any, &record("Order"))
            .await
            .unwrap();
        log.append_to_stream("person-2", ExpectedVersion::Any, &record("PERSON"))
            .await
            .unwrap();

        let query = ProjectionQuery::streams_by_event_type("Person");
        engine.create_continuous("q", &query).await.unwrap();
        let result = engine.get_result("q").await.unwrap().unwrap();
        assert_eq!(result.stream_ids, vec!["person-1", "person-2"]);
    }

    #[tokio::test]
    async fn projection_lifecycle() {
        let node = MemoryNode::new();
        let engine = ProjectionEngine::Memory(node.projections());
        engine.enable(STREAMS_INDEX).await.unwrap();
        let query = ProjectionQuery::streams_by_event_type("Person");

        engine.create_continuous("q", &query).await.unwrap();
        assert!(matches!(
            engine.create_continuous("q", &query).await,
            Err(DbError::ProjectionExists(_))
        ));
        assert_eq!(node.projection_names().await, vec!["q"]);

        engine.disable("q").await.unwrap();
        assert!(engine.get_result("q").await.unwrap().is_none());

        engine.delete("q").await.unwrap();
        assert!(node.projection_names().await.is_empty());
        assert!(matches!(
            engine.get_result("q").await,
            Err(DbError::ProjectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn enabling_unknown_projection_fails() {
        let (_, engine) = handles();
        assert!(matches!(
            engine.enable("nope").await,
            Err(DbError::ProjectionNotFound(_))
        ));
    }
}
