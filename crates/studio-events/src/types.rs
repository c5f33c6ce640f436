//! Event type tags and payload schemas

use crate::error::EventError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stable tag identifying a notification kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    CurrentProgramSceneChanged,
    SceneCreated,
    SceneRemoved,
    SceneNameChanged,
    InputCreated,
    InputRemoved,
    InputMuteStateChanged,
    InputVolumeChanged,
    StreamStateChanged,
    RecordStateChanged,
    ExitStarted,
    StudioModeStateChanged,
    /// Synthetic event type; must be registered before use
    Custom(String),
}

impl EventType {
    /// All built-in notification types
    #[must_use]
    pub fn builtins() -> [EventType; 12] {
        [
            Self::CurrentProgramSceneChanged,
            Self::SceneCreated,
            Self::SceneRemoved,
            Self::SceneNameChanged,
            Self::InputCreated,
            Self::InputRemoved,
            Self::InputMuteStateChanged,
            Self::InputVolumeChanged,
            Self::StreamStateChanged,
            Self::RecordStateChanged,
            Self::ExitStarted,
            Self::StudioModeStateChanged,
        ]
    }

    /// Resolve a type name. Names that are not built-in become `Custom`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::builtins()
            .into_iter()
            .find(|t| t.as_str() == name)
            .unwrap_or_else(|| Self::Custom(name.to_string()))
    }

    /// Wire name of this type
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CurrentProgramSceneChanged => "CurrentProgramSceneChanged",
            Self::SceneCreated => "SceneCreated",
            Self::SceneRemoved => "SceneRemoved",
            Self::SceneNameChanged => "SceneNameChanged",
            Self::InputCreated => "InputCreated",
            Self::InputRemoved => "InputRemoved",
            Self::InputMuteStateChanged => "InputMuteStateChanged",
            Self::InputVolumeChanged => "InputVolumeChanged",
            Self::StreamStateChanged => "StreamStateChanged",
            Self::RecordStateChanged => "RecordStateChanged",
            Self::ExitStarted => "ExitStarted",
            Self::StudioModeStateChanged => "StudioModeStateChanged",
            Self::Custom(name) => name,
        }
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Category used for filtering
    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            Self::CurrentProgramSceneChanged
            | Self::SceneCreated
            | Self::SceneRemoved
            | Self::SceneNameChanged => EventCategory::Scenes,
            Self::InputCreated
            | Self::InputRemoved
            | Self::InputMuteStateChanged
            | Self::InputVolumeChanged => EventCategory::Inputs,
            Self::StreamStateChanged | Self::RecordStateChanged => EventCategory::Outputs,
            Self::ExitStarted => EventCategory::General,
            Self::StudioModeStateChanged => EventCategory::Ui,
            Self::Custom(_) => EventCategory::Custom,
        }
    }

    /// Importance of the notification
    #[must_use]
    pub fn priority(&self) -> EventPriority {
        match self {
            Self::InputMuteStateChanged => EventPriority::High,
            Self::StreamStateChanged | Self::RecordStateChanged | Self::ExitStarted => {
                EventPriority::Critical
            }
            _ => EventPriority::Normal,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

/// Event categories for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    General,
    Scenes,
    Inputs,
    Outputs,
    Ui,
    Custom,
}

/// Event priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Payload of a notification, one variant per known type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    CurrentProgramSceneChanged {
        scene_name: String,
        #[serde(default)]
        scene_uuid: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SceneCreated {
        scene_name: String,
        #[serde(default)]
        scene_uuid: Option<String>,
        #[serde(default)]
        is_group: bool,
    },
    #[serde(rename_all = "camelCase")]
    SceneRemoved {
        scene_name: String,
        #[serde(default)]
        scene_uuid: Option<String>,
        #[serde(default)]
        is_group: bool,
    },
    #[serde(rename_all = "camelCase")]
    SceneNameChanged {
        old_scene_name: String,
        scene_name: String,
        #[serde(default)]
        scene_uuid: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    InputCreated {
        input_name: String,
        #[serde(default)]
        input_uuid: Option<String>,
        #[serde(default)]
        input_kind: String,
        #[serde(default)]
        unversioned_input_kind: String,
        #[serde(default)]
        input_settings: Value,
    },
    #[serde(rename_all = "camelCase")]
    InputRemoved {
        input_name: String,
        #[serde(default)]
        input_uuid: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    InputMuteStateChanged {
        input_name: String,
        #[serde(default)]
        input_uuid: Option<String>,
        #[serde(default)]
        input_muted: bool,
    },
    #[serde(rename_all = "camelCase")]
    InputVolumeChanged {
        input_name: String,
        #[serde(default)]
        input_uuid: Option<String>,
        #[serde(default = "unity_gain")]
        input_volume_mul: f64,
        #[serde(default)]
        input_volume_db: f64,
    },
    #[serde(rename_all = "camelCase")]
    StreamStateChanged {
        output_active: bool,
        output_state: String,
    },
    #[serde(rename_all = "camelCase")]
    RecordStateChanged {
        output_active: bool,
        output_state: String,
        #[serde(default)]
        output_path: Option<String>,
    },
    ExitStarted {},
    #[serde(rename_all = "camelCase")]
    StudioModeStateChanged { studio_mode_enabled: bool },
    /// Synthetic event. Serialized by name, never through the serde tag.
    #[serde(skip)]
    Custom { name: String, data: Value },
}

fn unity_gain() -> f64 {
    1.0
}

impl EventPayload {
    /// Type tag of this payload
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::CurrentProgramSceneChanged { .. } => EventType::CurrentProgramSceneChanged,
            Self::SceneCreated { .. } => EventType::SceneCreated,
            Self::SceneRemoved { .. } => EventType::SceneRemoved,
            Self::SceneNameChanged { .. } => EventType::SceneNameChanged,
            Self::InputCreated { .. } => EventType::InputCreated,
            Self::InputRemoved { .. } => EventType::InputRemoved,
            Self::InputMuteStateChanged { .. } => EventType::InputMuteStateChanged,
            Self::InputVolumeChanged { .. } => EventType::InputVolumeChanged,
            Self::StreamStateChanged { .. } => EventType::StreamStateChanged,
            Self::RecordStateChanged { .. } => EventType::RecordStateChanged,
            Self::ExitStarted {} => EventType::ExitStarted,
            Self::StudioModeStateChanged { .. } => EventType::StudioModeStateChanged,
            Self::Custom { name, .. } => EventType::Custom(name.clone()),
        }
    }

    /// Build a custom payload
    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Self::Custom {
            name: name.into(),
            data,
        }
    }

    /// Named field map of this payload (camelCase keys)
    pub fn to_fields(&self) -> Result<Value, EventError> {
        if let Self::Custom { data, .. } = self {
            return Ok(data.clone());
        }

        let mut tagged = serde_json::to_value(self).map_err(|e| EventError::InvalidPayload {
            event_type: self.event_type().to_string(),
            reason: e.to_string(),
        })?;

        Ok(tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Rebuild a payload from its type tag and field map
    pub fn from_fields(event_type: &EventType, fields: Value) -> Result<Self, EventError> {
        if let EventType::Custom(name) = event_type {
            return Ok(Self::Custom {
                name: name.clone(),
                data: fields,
            });
        }

        let fields = if fields.is_null() {
            Value::Object(Map::new())
        } else {
            fields
        };

        let mut tagged = Map::new();
        tagged.insert("type".into(), Value::String(event_type.as_str().to_string()));
        tagged.insert("payload".into(), fields);

        serde_json::from_value(Value::Object(tagged)).map_err(|e| EventError::InvalidPayload {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })
    }

    /// Look up a single field by its camelCase name
    ///
    /// Agrees with [`to_fields`](Self::to_fields) without building the whole map.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match (self, name) {
            (Self::Custom { data, .. }, _) => return data.get(name).cloned(),
            (
                Self::CurrentProgramSceneChanged { scene_name, .. }
                | Self::SceneCreated { scene_name, .. }
                | Self::SceneRemoved { scene_name, .. }
                | Self::SceneNameChanged { scene_name, .. },
                "sceneName",
            ) => Value::from(scene_name.as_str()),
            (
                Self::CurrentProgramSceneChanged { scene_uuid, .. }
                | Self::SceneCreated { scene_uuid, .. }
                | Self::SceneRemoved { scene_uuid, .. }
                | Self::SceneNameChanged { scene_uuid, .. },
                "sceneUuid",
            ) => Value::from(scene_uuid.clone()),
            (
                Self::SceneCreated { is_group, .. } | Self::SceneRemoved { is_group, .. },
                "isGroup",
            ) => Value::from(*is_group),
            (Self::SceneNameChanged { old_scene_name, .. }, "oldSceneName") => {
                Value::from(old_scene_name.as_str())
            }
            (
                Self::InputCreated { input_name, .. }
                | Self::InputRemoved { input_name, .. }
                | Self::InputMuteStateChanged { input_name, .. }
                | Self::InputVolumeChanged { input_name, .. },
                "inputName",
            ) => Value::from(input_name.as_str()),
            (
                Self::InputCreated { input_uuid, .. }
                | Self::InputRemoved { input_uuid, .. }
                | Self::InputMuteStateChanged { input_uuid, .. }
                | Self::InputVolumeChanged { input_uuid, .. },
                "inputUuid",
            ) => Value::from(input_uuid.clone()),
            (Self::InputCreated { input_kind, .. }, "inputKind") => Value::from(input_kind.as_str()),
            (
                Self::InputCreated {
                    unversioned_input_kind,
                    ..
                },
                "unversionedInputKind",
            ) => Value::from(unversioned_input_kind.as_str()),
            (Self::InputCreated { input_settings, .. }, "inputSettings") => input_settings.clone(),
            (Self::InputMuteStateChanged { input_muted, .. }, "inputMuted") => {
                Value::from(*input_muted)
            }
            (Self::InputVolumeChanged { input_volume_mul, .. }, "inputVolumeMul") => {
                Value::from(*input_volume_mul)
            }
            (Self::InputVolumeChanged { input_volume_db, .. }, "inputVolumeDb") => {
                Value::from(*input_volume_db)
            }
            (
                Self::StreamStateChanged { output_active, .. }
                | Self::RecordStateChanged { output_active, .. },
                "outputActive",
            ) => Value::from(*output_active),
            (
                Self::StreamStateChanged { output_state, .. }
                | Self::RecordStateChanged { output_state, .. },
                "outputState",
            ) => Value::from(output_state.as_str()),
            (Self::RecordStateChanged { output_path, .. }, "outputPath") => {
                Value::from(output_path.clone())
            }
            (
                Self::StudioModeStateChanged {
                    studio_mode_enabled,
                },
                "studioModeEnabled",
            ) => Value::from(*studio_mode_enabled),
            _ => return None,
        };
        Some(value)
    }

    /// Scene name for scene notifications
    #[must_use]
    pub fn scene_name(&self) -> Option<&str> {
        match self {
            Self::CurrentProgramSceneChanged { scene_name, .. }
            | Self::SceneCreated { scene_name, .. }
            | Self::SceneRemoved { scene_name, .. }
            | Self::SceneNameChanged { scene_name, .. } => Some(scene_name),
            _ => None,
        }
    }

    /// Input name for input notifications
    #[must_use]
    pub fn input_name(&self) -> Option<&str> {
        match self {
            Self::InputCreated { input_name, .. }
            | Self::InputRemoved { input_name, .. }
            | Self::InputMuteStateChanged { input_name, .. }
            | Self::InputVolumeChanged { input_name, .. } => Some(input_name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names_resolve() {
        for event_type in EventType::builtins() {
            assert_eq!(EventType::from_name(event_type.as_str()), event_type);
            assert!(!event_type.is_custom());
        }
        assert_eq!(
            EventType::from_name("ChatBurst"),
            EventType::Custom("ChatBurst".to_string())
        );
    }

    #[test]
    fn test_priority_and_category() {
        assert_eq!(EventType::InputMuteStateChanged.priority(), EventPriority::High);
        assert_eq!(EventType::StreamStateChanged.priority(), EventPriority::Critical);
        assert_eq!(EventType::SceneCreated.priority(), EventPriority::Normal);
        assert_eq!(EventType::RecordStateChanged.category(), EventCategory::Outputs);
        assert_eq!(
            EventType::Custom("x".into()).category(),
            EventCategory::Custom
        );
    }

    #[test]
    fn test_fields_use_camel_case() {
        let payload = EventPayload::InputMuteStateChanged {
            input_name: "Mic".into(),
            input_uuid: None,
            input_muted: true,
        };
        let fields = payload.to_fields().unwrap();
        assert_eq!(fields["inputName"], "Mic");
        assert_eq!(fields["inputMuted"], true);
        assert_eq!(payload.field("inputMuted"), Some(json!(true)));
    }

    #[test]
    fn test_field_agrees_with_field_map() {
        let payloads = vec![
            EventPayload::SceneNameChanged {
                old_scene_name: "Intro".into(),
                scene_name: "Opening".into(),
                scene_uuid: Some("a1".into()),
            },
            EventPayload::SceneRemoved {
                scene_name: "Old".into(),
                scene_uuid: None,
                is_group: true,
            },
            EventPayload::InputCreated {
                input_name: "Cam".into(),
                input_uuid: Some("c1".into()),
                input_kind: "v4l2_input".into(),
                unversioned_input_kind: "v4l2_input".into(),
                input_settings: json!({ "device": "/dev/video0" }),
            },
            EventPayload::InputVolumeChanged {
                input_name: "Desktop".into(),
                input_uuid: None,
                input_volume_mul: 0.5,
                input_volume_db: -6.02,
            },
            EventPayload::RecordStateChanged {
                output_active: true,
                output_state: "OBS_WEBSOCKET_OUTPUT_STARTED".into(),
                output_path: Some("/tmp/take1.mkv".into()),
            },
            EventPayload::StudioModeStateChanged {
                studio_mode_enabled: false,
            },
            EventPayload::custom("ChatBurst", json!({ "count": 12 })),
        ];

        for payload in payloads {
            let fields = payload.to_fields().unwrap();
            let map = fields.as_object().unwrap();
            assert!(!map.is_empty());
            for (name, value) in map {
                assert_eq!(payload.field(name).as_ref(), Some(value), "{name}");
            }
            assert_eq!(payload.field("noSuchField"), None);
        }
    }

    #[test]
    fn test_from_fields_applies_defaults() {
        let payload = EventPayload::from_fields(
            &EventType::InputVolumeChanged,
            json!({ "inputName": "Desktop Audio" }),
        )
        .unwrap();
        assert_eq!(
            payload,
            EventPayload::InputVolumeChanged {
                input_name: "Desktop Audio".into(),
                input_uuid: None,
                input_volume_mul: 1.0,
                input_volume_db: 0.0,
            }
        );
    }

    #[test]
    fn test_from_fields_rejects_missing_required_field() {
        let err = EventPayload::from_fields(&EventType::StreamStateChanged, json!({}))
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload { .. }));
    }

    #[test]
    fn test_exit_started_has_empty_field_map() {
        let payload = EventPayload::from_fields(&EventType::ExitStarted, Value::Null).unwrap();
        assert_eq!(payload, EventPayload::ExitStarted {});
        assert_eq!(payload.to_fields().unwrap(), json!({}));
    }

    #[test]
    fn test_custom_payload_keeps_data() {
        let payload = EventPayload::custom("ChatBurst", json!({ "count": 12 }));
        assert_eq!(payload.event_type(), EventType::Custom("ChatBurst".into()));
        assert_eq!(payload.to_fields().unwrap(), json!({ "count": 12 }));
        let rebuilt =
            EventPayload::from_fields(&payload.event_type(), json!({ "count": 12 })).unwrap();
        assert_eq!(rebuilt, payload);
    }
}
