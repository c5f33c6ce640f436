//! Recording persistence using JSON file storage

use crate::error::BusError;
use crate::recorder::{Recording, RecordingEntry};
use std::path::Path;
use studio_events::TypeRegistry;
use tokio::fs;

/// Load a recording from a JSON file
pub async fn load_recording(path: &Path, registry: &TypeRegistry) -> Result<Recording, BusError> {
    let contents = fs::read_to_string(path).await?;
    let entries: Vec<RecordingEntry> = serde_json::from_str(&contents)?;
    let recording = Recording::from_entries(entries, registry)?;
    tracing::info!("Loaded {} recorded events from {:?}", recording.len(), path);
    Ok(recording)
}

/// Save a recording to a JSON file atomically
pub async fn save_recording(path: &Path, recording: &Recording) -> Result<(), BusError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = recording.to_json()?;

    // Write atomically: write to temp file, then rename
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} recorded events to {:?}", recording.len(), path);
    Ok(())
}
