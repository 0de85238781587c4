//! EventStoreDB HTTP API backend.
//!
//! Stream traffic and projection management go to two endpoints, each
//! served by its own [`HttpTransport`]. Both transports share one
//! [`reqwest::Client`] (and therefore one connection pool) and one
//! [`ConnectionMonitor`].
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | append | `POST /streams/{stream}` |
//! | read forward | `GET /streams/{stream}/{from}/forward/{count}?embed=body` |
//! | delete stream | `DELETE /streams/{stream}` with `ES-HardDelete: true` |
//! | create query | `POST /projections/continuous?name=..` |
//! | query result | `GET /projection/{name}/result` |
//! | enable / disable | `POST /projection/{name}/command/{enable,disable}` |
//! | delete query | `DELETE /projection/{name}` |
//!
//! Stream and projection names are percent-encoded as single path
//! segments, so `/`, `?` and `#` in a name never reach another resource.

use std::fmt;
use std::net::SocketAddr;

use entitystore_types::{EventId, EventRecord};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::connection::{ConnectionMonitor, ConnectionStatus};
use crate::error::DbError;
use crate::log::{ExpectedVersion, RecordedEvent, SliceReadStatus, StreamSlice};
use crate::projections::{ProjectionQuery, StreamIdSearchResult};

/// Content type for a batch of events posted to a stream.
const EVENTS_CONTENT_TYPE: &str = "application/vnd.eventstore.events+json";

/// Content type for Atom feed pages.
const ATOM_CONTENT_TYPE: &str = "application/vnd.eventstore.atom+json";

/// Header carrying the expected-version precondition.
const EXPECTED_VERSION_HEADER: &str = "ES-ExpectedVersion";

/// Header turning a stream delete into a tombstone.
const HARD_DELETE_HEADER: &str = "ES-HardDelete";

/// Basic-auth credentials for the log service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One HTTP endpoint of the log service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    monitor: ConnectionMonitor,
}

impl HttpTransport {
    /// Create a transport for `endpoint`.
    pub fn new(
        client: reqwest::Client,
        endpoint: SocketAddr,
        credentials: Option<Credentials>,
        monitor: ConnectionMonitor,
    ) -> Self {
        Self {
            client,
            base_url: format!("http://{endpoint}"),
            credentials,
            monitor,
        }
    }

    /// Base URL every request path is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL for a path made of `segments`, each percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Result<Url, DbError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| DbError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| DbError::InvalidUrl(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Build an authenticated request for the path made of `segments`.
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, DbError> {
        let builder = self.client.request(method, self.url(segments)?);
        Ok(match &self.credentials {
            Some(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => builder,
        })
    }

    /// Send a request, reporting the outcome to the connection monitor.
    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<Response, DbError> {
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.monitor.record_unreachable(&e);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.monitor.set(ConnectionStatus::Failed);
            return Err(DbError::Unauthorized(format!("{operation} returned {status}")));
        }

        self.monitor.set(ConnectionStatus::Connected);
        Ok(response)
    }
}

/// Turn a response the operation did not expect into an error.
async fn unexpected(operation: &str, response: Response) -> DbError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_owned());
    DbError::UnexpectedStatus {
        operation: operation.to_owned(),
        status,
        body,
    }
}

fn malformed(operation: &str, reason: impl Into<String>) -> DbError {
    DbError::MalformedResponse {
        operation: operation.to_owned(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Append-only log over the `/streams` API.
#[derive(Debug, Clone)]
pub struct HttpEventLog {
    transport: HttpTransport,
}

impl HttpEventLog {
    /// Create a log bound to the stream endpoint.
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Append one record.
    pub(crate) async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        record: &EventRecord,
    ) -> Result<(), DbError> {
        let body = serde_json::to_vec(&Value::Array(vec![event_body(record)?]))?;
        let request = self
            .transport
            .request(Method::POST, &["streams", stream])?
            .header(CONTENT_TYPE, EVENTS_CONTENT_TYPE)
            .header(EXPECTED_VERSION_HEADER, expected.header_value())
            .body(body);
        let response = self.transport.send(request, "append").await?;

        match response.status() {
            status if status.is_success() => {
                debug!(stream, event_type = record.event_type.as_str(), "Appended event");
                Ok(())
            }
            StatusCode::BAD_REQUEST if expected != ExpectedVersion::Any => {
                Err(DbError::WrongExpectedVersion {
                    stream: stream.to_owned(),
                    expected,
                })
            }
            StatusCode::GONE => Err(DbError::StreamDeleted(stream.to_owned())),
            _ => Err(unexpected("append", response).await),
        }
    }

    /// Read one forward page.
    pub(crate) async fn read_stream_forward(
        &self,
        stream: &str,
        from: u64,
        max_count: usize,
    ) -> Result<StreamSlice, DbError> {
        let (from_segment, count_segment) = (from.to_string(), max_count.to_string());
        let request = self
            .transport
            .request(
                Method::GET,
                &["streams", stream, &from_segment, "forward", &count_segment],
            )?
            .query(&[("embed", "body")])
            .header(ACCEPT, ATOM_CONTENT_TYPE);
        let response = self.transport.send(request, "read forward").await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(StreamSlice::missing(from, SliceReadStatus::StreamNotFound)),
            StatusCode::GONE => Ok(StreamSlice::missing(from, SliceReadStatus::StreamDeleted)),
            status if status.is_success() => {
                let feed: Value = response.json().await?;
                let slice = parse_feed(&feed, from, max_count)?;
                debug!(stream, from, count = slice.events.len(), "Read stream slice");
                Ok(slice)
            }
            _ => Err(unexpected("read forward", response).await),
        }
    }

    /// Tombstone a stream. Later appends fail and the name stays dead.
    pub(crate) async fn delete_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<(), DbError> {
        let request = self.delete_request(stream, expected)?;
        let response = self.transport.send(request, "delete stream").await?;

        match response.status() {
            status if status.is_success() => {
                debug!(stream, "Deleted stream");
                Ok(())
            }
            StatusCode::NOT_FOUND if expected == ExpectedVersion::Any => {
                debug!(stream, "Delete of a stream that was never written");
                Ok(())
            }
            StatusCode::BAD_REQUEST => Err(DbError::WrongExpectedVersion {
                stream: stream.to_owned(),
                expected,
            }),
            StatusCode::GONE => Err(DbError::StreamDeleted(stream.to_owned())),
            _ => Err(unexpected("delete stream", response).await),
        }
    }

    fn delete_request(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<RequestBuilder, DbError> {
        Ok(self
            .transport
            .request(Method::DELETE, &["streams", stream])?
            .header(EXPECTED_VERSION_HEADER, expected.header_value())
            .header(HARD_DELETE_HEADER, "true"))
    }
}

/// JSON body of one event in an append batch.
fn event_body(record: &EventRecord) -> Result<Value, DbError> {
    let data = if record.is_structured {
        serde_json::from_slice(&record.data)?
    } else {
        Value::String(String::from_utf8_lossy(&record.data).into_owned())
    };
    let metadata = if record.metadata.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&record.metadata)?
    };

    Ok(serde_json::json!({
        "eventId": record.event_id,
        "eventType": record.event_type,
        "data": data,
        "metadata": metadata,
    }))
}

/// Decode an Atom feed page into a slice.
///
/// Entries arrive newest first; the slice is returned in stream order.
fn parse_feed(feed: &Value, from: u64, max_count: usize) -> Result<StreamSlice, DbError> {
    let entries = feed
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("read forward", "feed has no entries array"))?;

    let mut events = entries
        .iter()
        .map(parse_entry)
        .collect::<Result<Vec<_>, _>>()?;
    events.sort_by_key(|event| event.event_number);

    let next_position = events
        .last()
        .map_or(from, |event| event.event_number.saturating_add(1));
    let head_of_stream = feed
        .get("headOfStream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(StreamSlice {
        is_end_of_stream: head_of_stream || events.len() < max_count,
        events,
        next_position,
        status: SliceReadStatus::Success,
    })
}

/// Decode one feed entry read with `embed=body`.
fn parse_entry(entry: &Value) -> Result<RecordedEvent, DbError> {
    let event_id = entry
        .get("eventId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<uuid::Uuid>().ok())
        .map(EventId::from)
        .ok_or_else(|| malformed("read forward", "entry has no valid eventId"))?;
    let event_type = entry
        .get("eventType")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("read forward", "entry has no eventType"))?
        .to_owned();
    let event_number = entry
        .get("eventNumber")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("read forward", "entry has no eventNumber"))?;
    let is_structured = entry.get("isJson").and_then(Value::as_bool).unwrap_or(true);

    Ok(RecordedEvent {
        event_number,
        record: EventRecord {
            event_id,
            event_type,
            is_structured,
            data: embedded_bytes(entry.get("data"))?,
            metadata: embedded_bytes(entry.get("metaData"))?,
        },
    })
}

/// Embedded bodies come back as JSON strings; tolerate inline objects too.
fn embedded_bytes(value: Option<&Value>) -> Result<Vec<u8>, DbError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(other) => Ok(serde_json::to_vec(other)?),
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Continuous-query engine over the `/projection` API.
#[derive(Debug, Clone)]
pub struct HttpProjections {
    transport: HttpTransport,
}

impl HttpProjections {
    /// Create a projection manager bound to the management endpoint.
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    async fn command(&self, name: &str, command: &str) -> Result<(), DbError> {
        let operation = format!("{command} projection");
        let request = self
            .transport
            .request(Method::POST, &["projection", name, "command", command])?
            .header(CONTENT_TYPE, "application/json")
            .body(Vec::new());
        let response = self.transport.send(request, &operation).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(DbError::ProjectionNotFound(name.to_owned())),
            _ => Err(unexpected(&operation, response).await),
        }
    }

    pub(crate) async fn enable(&self, name: &str) -> Result<(), DbError> {
        self.command(name, "enable").await
    }

    pub(crate) async fn disable(&self, name: &str) -> Result<(), DbError> {
        self.command(name, "disable").await
    }

    pub(crate) async fn create_continuous(
        &self,
        name: &str,
        query: &ProjectionQuery,
    ) -> Result<(), DbError> {
        let request = self
            .transport
            .request(Method::POST, &["projections", "continuous"])?
            .query(&[
                ("name", name),
                ("type", "JS"),
                ("enabled", "yes"),
                ("emit", "no"),
                ("trackemittedstreams", "no"),
            ])
            .header(CONTENT_TYPE, "application/json")
            .body(query.source());
        let response = self.transport.send(request, "create projection").await?;

        match response.status() {
            status if status.is_success() => {
                debug!(projection = name, "Created continuous projection");
                Ok(())
            }
            StatusCode::CONFLICT => Err(DbError::ProjectionExists(name.to_owned())),
            _ => Err(unexpected("create projection", response).await),
        }
    }

    pub(crate) async fn get_result(
        &self,
        name: &str,
    ) -> Result<Option<StreamIdSearchResult>, DbError> {
        let request = self
            .transport
            .request(Method::GET, &["projection", name, "result"])?
            .header(ACCEPT, "application/json");
        let response = self.transport.send(request, "projection result").await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.text().await?;
                Ok(StreamIdSearchResult::parse(&body)?)
            }
            StatusCode::NOT_FOUND => Err(DbError::ProjectionNotFound(name.to_owned())),
            _ => Err(unexpected("projection result", response).await),
        }
    }

    pub(crate) async fn delete(&self, name: &str) -> Result<(), DbError> {
        let request = self
            .transport
            .request(Method::DELETE, &["projection", name])?
            .query(&[
                ("deleteStateStream", "yes"),
                ("deleteCheckpointStream", "yes"),
                ("deleteEmittedStreams", "no"),
            ]);
        let response = self.transport.send(request, "delete projection").await?;

        match response.status() {
            status if status.is_success() => {
                debug!(projection = name, "Deleted projection");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(DbError::ProjectionNotFound(name.to_owned())),
            _ => Err(unexpected("delete projection", response).await),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use entitystore_types::{Metadata, StreamGuid};

    use super::*;

    fn entry(number: u64, data: &str) -> Value {
        serde_json::json!({
            "eventId": uuid::Uuid::new_v4().to_string(),
            "eventType": "Person",
            "eventNumber": number,
            "isJson": true,
            "data": data,
            "metaData": "{\"streamDataType\":\"Person\"}",
        })
    }

    #[test]
    fn transport_base_url_from_endpoint() {
        let endpoint: SocketAddr = "127.0.0.1:2113".parse().unwrap();
        let transport =
            HttpTransport::new(reqwest::Client::new(), endpoint, None, ConnectionMonitor::new());
        assert_eq!(transport.base_url(), "http://127.0.0.1:2113");
    }

    fn log() -> HttpEventLog {
        let endpoint: SocketAddr = "127.0.0.1:2113".parse().unwrap();
        HttpEventLog::new(HttpTransport::new(
            reqwest::Client::new(),
            endpoint,
            None,
            ConnectionMonitor::new(),
        ))
    }

    #[test]
    fn stream_delete_is_a_hard_delete() {
        let request = log()
            .delete_request("person-1", ExpectedVersion::Any)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::DELETE);
        assert_eq!(request.url().as_str(), "http://127.0.0.1:2113/streams/person-1");
        assert_eq!(request.headers()[HARD_DELETE_HEADER], "true");
        assert_eq!(request.headers()[EXPECTED_VERSION_HEADER], "-2");
    }

    #[test]
    fn names_are_encoded_as_single_segments() {
        let url = log()
            .transport
            .url(&["streams", "a/b?c#d%e", "0", "forward", "20"])
            .unwrap();
        assert_eq!(url.path(), "/streams/a%2Fb%3Fc%23d%25e/0/forward/20");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn plain_names_are_unchanged() {
        let url = log()
            .transport
            .url(&["projection", "streams-for-type-person-0a1b", "result"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:2113/projection/streams-for-type-person-0a1b/result"
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "admin".to_owned(),
            password: "changeit".to_owned(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("changeit"));
    }

    #[test]
    fn event_body_embeds_json_payloads() {
        let metadata = Metadata::now(StreamGuid::new(), "Person");
        let record =
            EventRecord::structured("Person", &serde_json::json!({"Name": "Alice"}), &metadata)
                .unwrap();
        let body = event_body(&record).unwrap();

        assert_eq!(body["eventType"], "Person");
        assert_eq!(body["data"]["Name"], "Alice");
        assert_eq!(body["metadata"]["streamDataType"], "Person");
        assert_eq!(body["eventId"], record.event_id.to_string());
    }

    #[test]
    fn parse_feed_orders_entries_oldest_first() {
        let feed = serde_json::json!({
            "headOfStream": true,
            "entries": [entry(2, "[]"), entry(1, "[]"), entry(0, "{}")],
        });
        let slice = parse_feed(&feed, 0, 200).unwrap();

        let numbers: Vec<u64> = slice.events.iter().map(|e| e.event_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(slice.next_position, 3);
        assert!(slice.is_end_of_stream);
        assert_eq!(slice.status, SliceReadStatus::Success);
        assert_eq!(slice.events[0].record.data, b"{}".to_vec());
    }

    #[test]
    fn parse_feed_full_page_is_not_end() {
        let feed = serde_json::json!({
            "headOfStream": false,
            "entries": [entry(3, "[]"), entry(2, "[]")],
        });
        let slice = parse_feed(&feed, 2, 2).unwrap();
        assert!(!slice.is_end_of_stream);
        assert_eq!(slice.next_position, 4);
    }

    #[test]
    fn parse_feed_empty_page_keeps_position() {
        let feed = serde_json::json!({"headOfStream": true, "entries": []});
        let slice = parse_feed(&feed, 5, 200).unwrap();
        assert!(slice.events.is_empty());
        assert_eq!(slice.next_position, 5);
        assert!(slice.is_end_of_stream);
    }

    #[test]
    fn parse_feed_without_entries_is_malformed() {
        let feed = serde_json::json!({"title": "nope"});
        assert!(matches!(
            parse_feed(&feed, 0, 200),
            Err(DbError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn parse_entry_accepts_inline_object_data() {
        let mut value = entry(0, "");
        value["data"] = serde_json::json!({"Name": "Bob"});
        let event = parse_entry(&value).unwrap();
        let data: Value = serde_json::from_slice(&event.record.data).unwrap();
        assert_eq!(data["Name"], "Bob");
    }

    #[test]
    fn parse_entry_requires_event_number() {
        let mut value = entry(0, "{}");
        value.as_object_mut().unwrap().remove("eventNumber");
        assert!(parse_entry(&value).is_err());
    }
}
