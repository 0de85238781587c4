//! Enumeration of every stream belonging to a shape.
//!
//! The log keeps no index of its own, so enumeration submits a continuous
//! query that folds over the `$streams` feed, waits for its result, and
//! tears it down again. The query lives inside a [`QueryLease`]: it is
//! released explicitly on the normal path, and a lease dropped mid-flight
//! (an error or a cancelled future) schedules its own teardown.

use std::collections::HashSet;
use std::time::Duration;

use entitystore_db::{DbError, ProjectionEngine, ProjectionQuery};
use entitystore_types::Entity;
use futures::{StreamExt as _, TryStreamExt as _};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::reconstruct::EntityReconstructor;

/// Streams reconstructed concurrently while enumerating entities.
const RECONSTRUCT_CONCURRENCY: usize = 8;

/// Disable then delete a query. Deletion is attempted even if disabling
/// fails; the delete outcome is what gets reported.
async fn teardown(engine: &ProjectionEngine, name: &str) -> Result<(), DbError> {
    if let Err(e) = engine.disable(name).await {
        warn!(projection = name, error = %e, "Failed to disable query; deleting anyway");
    }
    engine.delete(name).await?;
    info!(projection = name, "Query torn down");
    Ok(())
}

/// Exclusive ownership of one ephemeral continuous query.
#[derive(Debug)]
pub struct QueryLease {
    engine: ProjectionEngine,
    name: String,
    released: bool,
}

impl QueryLease {
    /// Submit `query` under a fresh unique name.
    pub async fn acquire(
        engine: &ProjectionEngine,
        shape: &str,
        query: &ProjectionQuery,
    ) -> Result<Self, StoreError> {
        let name = format!(
            "streams-for-type-{}-{}",
            shape.to_lowercase(),
            Uuid::new_v4().simple()
        );
        engine.create_continuous(&name, query).await?;
        debug!(projection = name.as_str(), shape, "Query submitted");

        Ok(Self {
            engine: engine.clone(),
            name,
            released: false,
        })
    }

    /// The query's name on the engine.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tear the query down now.
    ///
    /// The lease only counts as released once teardown has finished. If
    /// this future is dropped first, dropping the lease schedules the
    /// teardown again.
    pub async fn release(&mut self) -> Result<(), StoreError> {
        if self.released {
            return Ok(());
        }
        let outcome = teardown(&self.engine, &self.name).await;
        self.released = true;
        outcome?;
        Ok(())
    }
}

impl Drop for QueryLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(projection = self.name.as_str(), "Query lease dropped without release");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(projection = self.name.as_str(), "No runtime to tear query down; it leaks");
            return;
        };
        let engine = self.engine.clone();
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(e) = teardown(&engine, &name).await {
                warn!(projection = name.as_str(), error = %e, "Deferred query teardown failed");
            }
        });
    }
}

/// Finds the streams of a shape and reconstructs them.
#[derive(Debug, Clone, Copy)]
pub struct TypeIndex<'a> {
    engine: &'a ProjectionEngine,
    reconstructor: EntityReconstructor<'a>,
    poll_interval: Duration,
}

impl<'a> TypeIndex<'a> {
    /// Create an index polling for query results every `poll_interval`.
    pub const fn new(
        engine: &'a ProjectionEngine,
        reconstructor: EntityReconstructor<'a>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            reconstructor,
            poll_interval,
        }
    }

    /// Names of every stream whose event type matches the shape name,
    /// case-insensitively, de-duplicated in feed order. Deleted streams
    /// may still be listed.
    pub async fn matching_stream_ids(&self, shape: &str) -> Result<Vec<String>, StoreError> {
        let query = ProjectionQuery::streams_by_event_type(shape);
        let mut lease = QueryLease::acquire(self.engine, shape, &query).await?;

        let polled = self.poll(lease.name()).await;
        let released = lease.release().await;

        let ids = polled?;
        released?;

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        debug!(shape, streams = unique.len(), "Stream ids enumerated");
        Ok(unique)
    }

    /// Every live entity of shape `T`, paired with its stream name.
    pub async fn entities<T: Entity>(&self) -> Result<Vec<(String, T)>, StoreError> {
        let ids = self.matching_stream_ids(T::shape_name()).await?;
        let reconstructor = self.reconstructor;

        let found: Vec<Option<(String, T)>> = futures::stream::iter(ids)
            .map(|stream| async move {
                let entity = reconstructor.get::<T>(&stream).await?;
                Ok::<_, StoreError>(entity.map(|entity| (stream, entity)))
            })
            .buffered(RECONSTRUCT_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(found.into_iter().flatten().collect())
    }

    /// Names of every live stream of shape `T`.
    pub async fn stream_names<T: Entity>(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entities::<T>()
            .await?
            .into_iter()
            .map(|(stream, _)| stream)
            .collect())
    }

    async fn poll(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let mut attempts = 0_u32;
        loop {
            if let Some(result) = self.engine.get_result(name).await? {
                return Ok(result.stream_ids);
            }
            attempts = attempts.saturating_add(1);
            debug!(projection = name, attempts, "Query result not ready");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
