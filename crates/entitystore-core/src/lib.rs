//! Event-sourced entity persistence.
//!
//! Each entity lives in its own stream: one snapshot record written on
//! insert, then one diff record per update listing the fields that changed.
//! The current value and the full change history are both rebuilt from the
//! same records.
//!
//! ```text
//! insert  --> EntityWriter --------------------------------> append snapshot
//! update  --> EntityWriter --> EntityReconstructor --> diff --> append diff
//! get     --> EntityReconstructor --> read forward --> fold
//! entities --> TypeIndex --> continuous query --> EntityReconstructor per stream
//! ```
//!
//! # Modules
//!
//! - [`client`] -- [`EntityStore`], the connection lifecycle and public operations
//! - [`naming`] -- Stream names and shape eligibility
//! - [`differ`] -- Field-level diffs
//! - [`reconstruct`] -- Paged stream reads and the replay fold
//! - [`writer`] -- Snapshot and diff appends
//! - [`type_index`] -- Enumeration by shape through a scoped continuous query
//! - [`config`] -- Client configuration from the environment or YAML
//! - [`error`] -- [`StoreError`]

pub mod client;
pub mod config;
pub mod differ;
pub mod error;
pub mod naming;
pub mod reconstruct;
pub mod type_index;
pub mod writer;

// Re-export primary types for convenience.
pub use client::EntityStore;
pub use config::{BackendKind, ConfigError, StoreConfig};
pub use differ::diff;
pub use entitystore_db::ConnectionStatus;
pub use entitystore_types::{
    Entity, EntityDescriptor, EntityWithHistory, FieldDescriptor, HistoryEntry, Metadata,
    PropertyChange, StreamGuid, entity_shape,
};
pub use error::StoreError;
pub use naming::{parse_stream_name, stream_name, validate_shape};
pub use reconstruct::{EntityReconstructor, Replayed, apply_history, replay};
pub use type_index::{QueryLease, TypeIndex};
pub use writer::EntityWriter;
