//! Error types for the event bus

use studio_events::EventError;
use thiserror::Error;

/// Errors returned by bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// Malformed registration, unknown event type or bad replay parameters
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Event queue is at capacity; the caller decides whether to retry or drop
    #[error("Event queue full (capacity {capacity})")]
    Overflow { capacity: usize },

    /// Bus has been stopped
    #[error("Event bus is stopped")]
    Closed,

    /// Recording is not armed
    #[error("Recorder is not armed")]
    NotRecording,

    /// Event model error (unknown type, schema violation)
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// IO error (recording persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single handler invocation. Contained by the bus.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Handler returned an error
    #[error("{0}")]
    Failed(String),

    /// Handler exceeded the per-handler timeout
    #[error("Timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Handler task panicked
    #[error("Handler panicked")]
    Panicked,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
