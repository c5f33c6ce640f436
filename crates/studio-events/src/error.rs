//! Error types for event parsing and validation

use thiserror::Error;

/// Errors raised while building or validating events
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    /// Notification did not carry an event type
    #[error("Missing event type")]
    MissingEventType,

    /// Event type is not known to the type registry
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload does not match the schema of its event type
    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// Custom event names may not shadow built-in notification types
    #[error("Reserved event type name: {0}")]
    ReservedName(String),
}
