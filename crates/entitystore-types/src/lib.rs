//! Shared type definitions for the event-sourced entity store.
//!
//! This crate is the single source of truth for the values that travel
//! between the entity layer and the log transports: identifiers, the event
//! record written to a stream, the metadata attached to every record, and the
//! property changes that make up a diff event.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for stream and event identifiers
//! - [`entity`] -- The [`Entity`] capability and per-shape field descriptors
//! - [`event`] -- Event records, metadata, property changes, and history

pub mod entity;
pub mod event;
pub mod ids;

// Re-export all public types at crate root for convenience.
pub use entity::{Entity, EntityDescriptor, FieldDescriptor};
pub use event::{EntityWithHistory, EventRecord, HistoryEntry, Metadata, PropertyChange};
pub use ids::{EventId, StreamGuid};
