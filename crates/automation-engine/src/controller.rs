//! Outbound contract towards the controlled studio application

use crate::error::ControllerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One logical operation issued by an action step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Switch the program scene
    SetCurrentScene { scene_name: String },
    /// Set the mute state of an input
    SetInputMute { input_name: String, muted: bool },
    ToggleInputMute { input_name: String },
    /// Set an input level, either in dB or as a multiplier
    SetInputVolume {
        input_name: String,
        #[serde(default)]
        volume_db: Option<f64>,
        #[serde(default)]
        volume_mul: Option<f64>,
    },
    /// Replace the text of a text source
    SetTextSource { source_name: String, text: String },
    StartRecord,
    StopRecord,
    StartStream,
    StopStream,
    /// Any request not covered above
    Raw {
        request_type: String,
        #[serde(default)]
        data: Value,
    },
}

impl Operation {
    /// Request name understood by the remote application
    #[must_use]
    pub fn request_type(&self) -> &str {
        match self {
            Self::SetCurrentScene { .. } => "SetCurrentProgramScene",
            Self::SetInputMute { .. } => "SetInputMute",
            Self::ToggleInputMute { .. } => "ToggleInputMute",
            Self::SetInputVolume { .. } => "SetInputVolume",
            Self::SetTextSource { .. } => "SetInputSettings",
            Self::StartRecord => "StartRecord",
            Self::StopRecord => "StopRecord",
            Self::StartStream => "StartStream",
            Self::StopStream => "StopStream",
            Self::Raw { request_type, .. } => request_type,
        }
    }

    /// Request data in the remote application's field naming
    #[must_use]
    pub fn request_data(&self) -> Value {
        match self {
            Self::SetCurrentScene { scene_name } => json!({ "sceneName": scene_name }),
            Self::SetInputMute { input_name, muted } => {
                json!({ "inputName": input_name, "inputMuted": muted })
            }
            Self::ToggleInputMute { input_name } => json!({ "inputName": input_name }),
            Self::SetInputVolume {
                input_name,
                volume_db,
                volume_mul,
            } => {
                let mut data = json!({ "inputName": input_name });
                if let Some(db) = volume_db {
                    data["inputVolumeDb"] = json!(db);
                }
                if let Some(mul) = volume_mul {
                    data["inputVolumeMul"] = json!(mul);
                }
                data
            }
            Self::SetTextSource { source_name, text } => json!({
                "inputName": source_name,
                "inputSettings": { "text": text },
            }),
            Self::StartRecord | Self::StopRecord | Self::StartStream | Self::StopStream => {
                json!({})
            }
            Self::Raw { data, .. } => data.clone(),
        }
    }
}

/// The external application the engine drives
#[async_trait]
pub trait Controller: Send + Sync {
    /// Issue one operation and return the response data
    async fn execute(&self, operation: &Operation) -> Result<Value, ControllerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serde_shape() {
        let op = Operation::SetInputMute {
            input_name: "Mic".into(),
            muted: true,
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "set_input_mute");
        assert_eq!(value["input_name"], "Mic");

        let parsed: Operation = serde_json::from_value(json!({ "type": "start_stream" })).unwrap();
        assert_eq!(parsed, Operation::StartStream);
    }

    #[test]
    fn test_volume_request_data_omits_unset_level() {
        let op = Operation::SetInputVolume {
            input_name: "Desktop".into(),
            volume_db: Some(-12.0),
            volume_mul: None,
        };
        assert_eq!(op.request_type(), "SetInputVolume");
        assert_eq!(
            op.request_data(),
            json!({ "inputName": "Desktop", "inputVolumeDb": -12.0 })
        );
    }

    #[test]
    fn test_raw_request_passthrough() {
        let op = Operation::Raw {
            request_type: "SaveReplayBuffer".into(),
            data: json!({ "x": 1 }),
        };
        assert_eq!(op.request_type(), "SaveReplayBuffer");
        assert_eq!(op.request_data(), json!({ "x": 1 }));
    }
}
