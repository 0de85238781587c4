//! Transport layer for the entity store: the append-only log and the
//! continuous-query (projection) engine.
//!
//! The entity layer never talks to a server directly. It goes through two
//! narrow interfaces, [`EventLog`] and [`ProjectionEngine`], each of which
//! dispatches to one of two backends:
//!
//! ```text
//! EntityStore
//!     |
//!     +-- EventLog ---------> HttpEventLog    (EventStoreDB /streams API)
//!     |                   \-> MemoryEventLog  (in-process node)
//!     |
//!     +-- ProjectionEngine -> HttpProjections (EventStoreDB /projection API)
//!                         \-> MemoryProjections
//! ```
//!
//! # Modules
//!
//! - [`log`] -- Stream append/read/delete interface and slice types
//! - [`projections`] -- Continuous-query interface and the stream-by-type query
//! - [`http`] -- EventStoreDB HTTP API backend (`reqwest`)
//! - [`memory`] -- In-process node implementing both interfaces
//! - [`connection`] -- Connection status tracking
//! - [`error`] -- Shared error types

pub mod connection;
pub mod error;
pub mod http;
pub mod log;
pub mod memory;
pub mod projections;

// Re-export primary types for convenience.
pub use connection::{ConnectionMonitor, ConnectionStatus};
pub use error::DbError;
pub use http::{Credentials, HttpEventLog, HttpProjections, HttpTransport};
pub use log::{EventLog, ExpectedVersion, RecordedEvent, SliceReadStatus, StreamSlice};
pub use memory::{MemoryEventLog, MemoryNode, MemoryProjections};
pub use projections::{ProjectionEngine, ProjectionQuery, STREAMS_INDEX, StreamIdSearchResult};
