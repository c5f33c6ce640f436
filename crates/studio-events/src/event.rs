//! Immutable event records

use crate::error::EventError;
use crate::registry::TypeRegistry;
use crate::types::{EventCategory, EventPayload, EventPriority, EventType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Capture time of an event
#[derive(Debug, Clone, Copy)]
pub struct EventTimestamp {
    /// Monotonic capture instant (used for offsets and gaps)
    pub monotonic: Instant,
    /// Wall-clock capture time
    pub wall: DateTime<Utc>,
}

impl EventTimestamp {
    #[must_use]
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Out-of-band information attached to an event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventMetadata {
    /// Set on events re-emitted by the replayer
    pub replayed: bool,
    /// Producer of the event (adapter name, rule name, ...)
    pub source: Option<String>,
    /// Offset inside the recording this event was replayed from
    pub recorded_offset: Option<Duration>,
}

/// A typed, immutable notification
#[derive(Debug, Clone)]
pub struct Event {
    id: Uuid,
    payload: EventPayload,
    timestamp: EventTimestamp,
    metadata: EventMetadata,
}

impl Event {
    /// Create an event captured now
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            timestamp: EventTimestamp::now(),
            metadata: EventMetadata::default(),
        }
    }

    /// Create a synthetic event
    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Self::new(EventPayload::custom(name, data))
    }

    /// Convert a raw notification of the form `{"eventType": .., "eventData": {..}}`
    pub fn from_raw(raw: &Value, registry: &TypeRegistry) -> Result<Self, EventError> {
        let name = raw
            .get("eventType")
            .and_then(Value::as_str)
            .ok_or(EventError::MissingEventType)?;
        let event_type = registry.resolve(name)?;
        let data = raw.get("eventData").cloned().unwrap_or(Value::Null);
        let payload = EventPayload::from_fields(&event_type, data)?;
        tracing::trace!("Parsed {} notification", event_type);
        Ok(Self::new(payload))
    }

    /// Rebuild an event from its persisted `(type, payload)` form
    pub fn from_parts(
        type_name: &str,
        fields: Value,
        registry: &TypeRegistry,
    ) -> Result<Self, EventError> {
        let event_type = registry.resolve(type_name)?;
        Ok(Self::new(EventPayload::from_fields(&event_type, fields)?))
    }

    /// Attach the producer name
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Fresh copy of this event marked as replayed
    #[must_use]
    pub fn replayed(&self, offset: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: self.payload.clone(),
            timestamp: EventTimestamp::now(),
            metadata: EventMetadata {
                replayed: true,
                source: self.metadata.source.clone(),
                recorded_offset: Some(offset),
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    #[must_use]
    pub fn timestamp(&self) -> &EventTimestamp {
        &self.timestamp
    }

    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn is_replayed(&self) -> bool {
        self.metadata.replayed
    }

    #[must_use]
    pub fn category(&self) -> EventCategory {
        self.event_type().category()
    }

    #[must_use]
    pub fn priority(&self) -> EventPriority {
        self.event_type().priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_scene_change() {
        let registry = TypeRegistry::new();
        let raw = json!({
            "eventType": "CurrentProgramSceneChanged",
            "eventIntent": 4,
            "eventData": { "sceneName": "Gameplay", "sceneUuid": "abc" }
        });
        let event = Event::from_raw(&raw, &registry).unwrap();
        assert_eq!(event.event_type(), EventType::CurrentProgramSceneChanged);
        assert_eq!(event.payload().scene_name(), Some("Gameplay"));
        assert!(!event.is_replayed());
    }

    #[test]
    fn test_from_raw_rejects_unknown_type() {
        let registry = TypeRegistry::new();
        let raw = json!({ "eventType": "VendorEvent", "eventData": {} });
        assert_eq!(
            Event::from_raw(&raw, &registry).unwrap_err(),
            EventError::UnknownEventType("VendorEvent".into())
        );
    }

    #[test]
    fn test_from_raw_requires_type() {
        let registry = TypeRegistry::new();
        assert_eq!(
            Event::from_raw(&json!({ "eventData": {} }), &registry).unwrap_err(),
            EventError::MissingEventType
        );
    }

    #[test]
    fn test_from_raw_accepts_registered_custom_type() {
        let registry = TypeRegistry::new();
        registry.register_custom("ChatBurst").unwrap();
        let raw = json!({ "eventType": "ChatBurst", "eventData": { "count": 3 } });
        let event = Event::from_raw(&raw, &registry).unwrap();
        assert_eq!(event.event_type(), EventType::Custom("ChatBurst".into()));
        assert_eq!(event.payload().field("count"), Some(json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replayed_copy_is_marked() {
        let original = Event::custom("Tick", json!({})).with_source("adapter");
        tokio::time::advance(Duration::from_secs(2)).await;
        let copy = original.replayed(Duration::from_millis(1500));
        assert!(copy.is_replayed());
        assert_ne!(copy.id(), original.id());
        assert_eq!(copy.payload(), original.payload());
        assert_eq!(copy.metadata().source.as_deref(), Some("adapter"));
        assert_eq!(
            copy.metadata().recorded_offset,
            Some(Duration::from_millis(1500))
        );
        assert!(copy.timestamp().monotonic > original.timestamp().monotonic);
    }
}
