//! The store client: connection lifecycle and the public operations.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use entitystore_db::{
    ConnectionMonitor, ConnectionStatus, EventLog, HttpEventLog, HttpProjections, HttpTransport,
    MemoryNode, ProjectionEngine, STREAMS_INDEX,
};
use entitystore_types::{Entity, EntityWithHistory, PropertyChange};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{BackendKind, StoreConfig};
use crate::error::StoreError;
use crate::reconstruct::EntityReconstructor;
use crate::type_index::TypeIndex;
use crate::writer::EntityWriter;

#[derive(Debug)]
struct Inner {
    log: EventLog,
    engine: ProjectionEngine,
    monitor: ConnectionMonitor,
    page_size: usize,
    poll_interval: Duration,
}

/// A connected entity store.
///
/// Cloning is cheap; clones share the transports and the connection status.
/// Every operation resolves only after all of its log calls have completed.
#[derive(Debug, Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}

impl EntityStore {
    /// Build a client from `config` and enable the `$streams` index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for unusable settings,
    /// [`StoreError::Connection`] if the host does not resolve, or the
    /// transport error raised while enabling the index.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let monitor = ConnectionMonitor::new();

        let (log, engine) = match config.backend {
            BackendKind::Memory => {
                let node = MemoryNode::new();
                (
                    EventLog::Memory(node.event_log()),
                    ProjectionEngine::Memory(node.projections()),
                )
            }
            BackendKind::Http => match http_backends(config, &monitor).await {
                Ok(backends) => backends,
                Err(e) => {
                    monitor.set(ConnectionStatus::Failed);
                    return Err(e);
                }
            },
        };

        if let Err(e) = engine.enable(STREAMS_INDEX).await {
            warn!(error = %e, "Failed to enable the streams index");
            monitor.set(ConnectionStatus::Failed);
            return Err(e.into());
        }
        monitor.set(ConnectionStatus::Connected);

        info!(
            backend = log.name(),
            host = config.host.as_str(),
            stream_port = config.stream_port,
            http_port = config.http_port,
            "Entity store connected"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                log,
                engine,
                monitor,
                page_size: config.page_size,
                poll_interval: config.query_poll_interval(),
            }),
        })
    }

    /// A client backed by a fresh in-process node.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&StoreConfig::memory()).await
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.monitor.status()
    }

    /// Subscribe to connection status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.monitor.subscribe()
    }

    /// Store `entity` as a new stream and return the stream name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidShape`] before writing anything if `T`
    /// cannot be stored, or the transport error.
    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<String, StoreError> {
        self.writer().insert(entity).await
    }

    /// Record the changes from the stream's current value to `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamNotFound`] if the stream is missing or
    /// deleted, a replay error, or the transport error.
    pub async fn update<T: Entity>(
        &self,
        entity: &T,
        stream: &str,
    ) -> Result<Vec<PropertyChange>, StoreError> {
        self.writer().update(entity, stream).await
    }

    /// Current value of the entity in `stream`, `None` if missing or deleted.
    pub async fn get<T: Entity>(&self, stream: &str) -> Result<Option<T>, StoreError> {
        self.reconstructor().get(stream).await
    }

    /// Current value and change history, `None` if missing or deleted.
    pub async fn get_with_history<T: Entity>(
        &self,
        stream: &str,
    ) -> Result<Option<EntityWithHistory<T>>, StoreError> {
        self.reconstructor().reconstruct(stream).await
    }

    /// Delete `stream`. Its name is never reused.
    pub async fn delete(&self, stream: &str) -> Result<(), StoreError> {
        self.writer().delete(stream).await
    }

    /// Every live entity of shape `T` with its stream name.
    pub async fn entities<T: Entity>(&self) -> Result<Vec<(String, T)>, StoreError> {
        self.type_index().entities().await
    }

    /// Names of every live stream of shape `T`.
    pub async fn stream_names<T: Entity>(&self) -> Result<Vec<String>, StoreError> {
        self.type_index().stream_names::<T>().await
    }

    fn reconstructor(&self) -> EntityReconstructor<'_> {
        EntityReconstructor::new(&self.inner.log, self.inner.page_size)
    }

    fn writer(&self) -> EntityWriter<'_> {
        EntityWriter::new(&self.inner.log, self.reconstructor())
    }

    fn type_index(&self) -> TypeIndex<'_> {
        TypeIndex::new(
            &self.inner.engine,
            self.reconstructor(),
            self.inner.poll_interval,
        )
    }
}

/// Resolve the host and build both HTTP endpoints over one shared client.
async fn http_backends(
    config: &StoreConfig,
    monitor: &ConnectionMonitor,
) -> Result<(EventLog, ProjectionEngine), StoreError> {
    let stream_endpoint = resolve(&config.host, config.stream_port).await?;
    let http_endpoint = SocketAddr::new(stream_endpoint.ip(), config.http_port);

    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;
    let credentials = config.credentials();

    let streams = HttpTransport::new(
        client.clone(),
        stream_endpoint,
        credentials.clone(),
        monitor.clone(),
    );
    let management = HttpTransport::new(client, http_endpoint, credentials, monitor.clone());

    Ok((
        EventLog::Http(HttpEventLog::new(streams)),
        ProjectionEngine::Http(HttpProjections::new(management)),
    ))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, StoreError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| StoreError::Connection(format!("failed to resolve {host}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| StoreError::Connection(format!("{host} resolved to no addresses")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_client_is_connected() {
        let store = EntityStore::in_memory().await.unwrap();
        assert_eq!(store.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_connection_error() {
        let config = StoreConfig {
            host: "does-not-exist.invalid".to_owned(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            EntityStore::connect(&config).await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let config = StoreConfig {
            page_size: 0,
            ..StoreConfig::memory()
        };
        assert!(matches!(
            EntityStore::connect(&config).await,
            Err(StoreError::Config(_))
        ));
    }
}
