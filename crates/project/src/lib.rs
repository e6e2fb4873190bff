mod catalog;
mod load;
mod save;
mod store;

use serde::{Deserialize, Serialize};

pub use catalog::{load_catalog, merge_sounds, store_catalog, unique_name};
pub use load::{
    LoadedProject, OfflineClip, load_autosave, load_project, parse_project, sound_from_data,
};
pub use save::{
    build_project, project_to_json, save_autosave, save_project, sound_to_data, unix_millis,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};

pub const PROJECT_VERSION: &str = "1.0";
/// Store key of the arrangement snapshot written after every edit.
pub const AUTOSAVE_KEY: &str = "dawProjectAutoSave";
/// Store key of the sound catalog produced by the recording/upload page.
pub const CATALOG_KEY: &str = "soundRecordings";

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_SECONDS_PER_BEAT: f64 = 0.5;

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

fn default_seconds_per_beat() -> f64 {
    DEFAULT_SECONDS_PER_BEAT
}

fn default_counter() -> u64 {
    1
}

/// Portable project document. Also the shape of the auto-save snapshot,
/// which omits `sounds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sounds: Vec<SoundData>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default = "default_counter")]
    pub track_name_counter: u64,
    #[serde(default = "default_counter")]
    pub track_id_counter: u64,
    #[serde(default)]
    pub is_time_mode: bool,
    #[serde(default = "default_seconds_per_beat")]
    pub seconds_per_beat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clips: Vec<ClipData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipData {
    pub id: u64,
    #[serde(default)]
    pub sound_data: Option<SoundData>,
    /// Position units.
    #[serde(default)]
    pub start_time: f64,
    /// Width in position units.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub track_id: Option<u64>,
}

/// A sound record as persisted: audio travels as a `data:` URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundData {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

/// Arrangement-wide settings carried alongside the tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectSettings {
    pub bpm: f64,
    pub is_time_mode: bool,
    pub seconds_per_beat: f64,
    pub track_name_counter: u64,
    pub track_id_counter: u64,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            is_time_mode: false,
            seconds_per_beat: DEFAULT_SECONDS_PER_BEAT,
            track_name_counter: 1,
            track_id_counter: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a project file: missing version")]
    MissingVersion,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
