//! Event recording and the persisted recording format

use crate::error::BusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use studio_events::{Event, TypeRegistry};
use tokio::time::Instant;

/// An event captured while the recorder was armed
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Offset from the arming instant
    pub offset: Duration,
    pub event: Arc<Event>,
}

/// Persisted form of one recorded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub offset_ms: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

/// Outcome of a replay
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Events re-emitted into the bus
    pub emitted: usize,
    /// Events rejected because the queue was full
    pub dropped: usize,
    pub elapsed: Duration,
}

/// Ordered, immutable capture of an event stream
#[derive(Debug, Clone)]
pub struct Recording {
    started_at: Option<DateTime<Utc>>,
    duration: Duration,
    events: Vec<RecordedEvent>,
}

impl Recording {
    /// Wall-clock arming time (unknown for recordings loaded from disk)
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time between arming and stopping
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Convert to the persisted `{offset_ms, type, payload}` list
    pub fn to_entries(&self) -> Result<Vec<RecordingEntry>, BusError> {
        self.events
            .iter()
            .map(|recorded| -> Result<RecordingEntry, BusError> {
                Ok(RecordingEntry {
                    offset_ms: u64::try_from(recorded.offset.as_millis()).unwrap_or(u64::MAX),
                    event_type: recorded.event.event_type().to_string(),
                    payload: recorded.event.payload().to_fields()?,
                })
            })
            .collect()
    }

    /// Rebuild a recording from persisted entries, validating every type
    pub fn from_entries(
        entries: Vec<RecordingEntry>,
        registry: &TypeRegistry,
    ) -> Result<Self, BusError> {
        let mut events = Vec::with_capacity(entries.len());
        let mut last = Duration::ZERO;

        for (index, entry) in entries.into_iter().enumerate() {
            let offset = Duration::from_millis(entry.offset_ms);
            if offset < last {
                return Err(BusError::Validation(format!(
                    "Recording entry {index} goes back in time ({}ms < {}ms)",
                    entry.offset_ms,
                    last.as_millis()
                )));
            }
            last = offset;

            let event = Event::from_parts(&entry.event_type, entry.payload, registry)?;
            events.push(RecordedEvent {
                offset,
                event: Arc::new(event),
            });
        }

        Ok(Self {
            started_at: None,
            duration: last,
            events,
        })
    }

    pub fn to_json(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string_pretty(&self.to_entries()?)?)
    }

    pub fn from_json(json: &str, registry: &TypeRegistry) -> Result<Self, BusError> {
        let entries: Vec<RecordingEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries, registry)
    }
}

struct Session {
    armed_at: Instant,
    started_at: DateTime<Utc>,
    events: Vec<RecordedEvent>,
}

/// Captures emitted events while armed
#[derive(Default)]
pub(crate) struct Recorder {
    session: Mutex<Option<Session>>,
}

impl Recorder {
    /// Arm capture, discarding any unfinished session
    pub(crate) fn start(&self) {
        let mut session = lock(&self.session);
        if session.is_some() {
            tracing::warn!("Recorder re-armed, discarding previous capture");
        }
        *session = Some(Session {
            armed_at: Instant::now(),
            started_at: Utc::now(),
            events: Vec::new(),
        });
        tracing::info!("Started event recording");
    }

    pub(crate) fn stop(&self) -> Option<Recording> {
        let session = lock(&self.session).take()?;
        let recording = Recording {
            started_at: Some(session.started_at),
            duration: session.armed_at.elapsed(),
            events: session.events,
        };
        tracing::info!(
            "Stopped event recording, captured {} events",
            recording.len()
        );
        Some(recording)
    }

    pub(crate) fn is_armed(&self) -> bool {
        lock(&self.session).is_some()
    }

    pub(crate) fn record(&self, event: &Arc<Event>) {
        if let Some(session) = lock(&self.session).as_mut() {
            session.events.push(RecordedEvent {
                offset: session.armed_at.elapsed(),
                event: Arc::clone(event),
            });
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
