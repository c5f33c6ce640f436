//! Typed studio notifications
//!
//! This crate defines the closed set of notifications produced by the
//! controlled studio application, the registry of known event types, and
//! the conversion from raw `{eventType, eventData}` notifications into
//! immutable [`Event`] records.

pub mod error;
pub mod event;
pub mod registry;
pub mod types;

pub use error::EventError;
pub use event::{Event, EventMetadata, EventTimestamp};
pub use registry::TypeRegistry;
pub use types::{EventCategory, EventPayload, EventPriority, EventType};
