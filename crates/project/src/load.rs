use crate::{
    AUTOSAVE_KEY, DEFAULT_BPM, DEFAULT_SECONDS_PER_BEAT, KeyValueStore, Project, ProjectError,
    ProjectSettings, SoundData,
};
use daw_transport::{AssetId, Clip, ClipId, DEFAULT_CLIP_WIDTH, SoundAsset, Track, TrackId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A clip that was in the file but could not be restored.
#[derive(Debug, Clone)]
pub struct OfflineClip {
    pub track_id: TrackId,
    pub clip_id: ClipId,
    /// Sound name, when the record had one.
    pub name: String,
    pub error: String,
}

#[derive(Debug)]
pub struct LoadedProject {
    pub settings: ProjectSettings,
    pub tracks: Vec<Track>,
    /// The file's sound catalog, before name-collision resolution.
    pub sounds: Vec<SoundAsset>,
    /// Clips dropped because their sound record was missing or corrupt.
    pub offline_clips: Vec<OfflineClip>,
}

impl LoadedProject {
    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|t| t.clips().len()).sum()
    }
}

pub fn sound_from_data(data: &SoundData) -> anyhow::Result<SoundAsset> {
    let name = data.name.trim();
    if name.is_empty() {
        anyhow::bail!("sound {} has no name", data.id);
    }
    let uri = data
        .audio_data
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("sound '{name}' has no audio data"))?;
    let pcm = daw_decode::parse_data_uri(uri)
        .map_err(|e| anyhow::anyhow!("sound '{name}' has corrupt audio data: {e}"))?;

    let mut asset = SoundAsset::new(AssetId(data.id), name, pcm).with_tags(data.tags.clone());
    asset.duration_seconds = data.duration.filter(|d| d.is_finite() && *d > 0.0);
    asset.created_at = data.created_at;
    Ok(asset)
}

/// Parse a portable project file. Files without a `version` are rejected;
/// individual corrupt clips and sounds are dropped with a warning.
pub fn parse_project(json: &str) -> Result<LoadedProject, ProjectError> {
    let project: Project = serde_json::from_str(json)?;
    if project.version.is_none() {
        return Err(ProjectError::MissingVersion);
    }
    Ok(restore(project))
}

pub fn load_project(path: &Path) -> Result<LoadedProject, ProjectError> {
    let json = std::fs::read_to_string(path)?;
    let loaded = parse_project(&json)?;
    log::info!(
        "project loaded from {}: {} tracks, {} clips",
        path.display(),
        loaded.tracks.len(),
        loaded.clip_count()
    );
    Ok(loaded)
}

/// Read the auto-save snapshot. Missing or unreadable snapshots yield `None`.
pub fn load_autosave(store: &dyn KeyValueStore) -> Option<LoadedProject> {
    let raw = store.get(AUTOSAVE_KEY)?;
    match serde_json::from_str::<Project>(&raw) {
        Ok(project) => Some(restore(project)),
        Err(e) => {
            log::warn!("ignoring unreadable auto-save snapshot: {e}");
            None
        }
    }
}

fn restore(project: Project) -> LoadedProject {
    let settings = ProjectSettings {
        bpm: positive_or(project.bpm, DEFAULT_BPM),
        is_time_mode: project.is_time_mode,
        seconds_per_beat: positive_or(project.seconds_per_beat, DEFAULT_SECONDS_PER_BEAT),
        track_name_counter: project.track_name_counter.max(1),
        track_id_counter: project.track_id_counter.max(1),
    };

    // Clips embed their sound; identical records share one asset.
    let mut assets: HashMap<(u64, String), Arc<SoundAsset>> = HashMap::new();
    let mut offline_clips = Vec::new();
    let mut tracks = Vec::with_capacity(project.tracks.len());

    for track_data in project.tracks {
        let track_id = TrackId(track_data.id);
        let mut track = Track::new(track_id, track_data.name);

        for clip_data in track_data.clips {
            let clip_id = ClipId(clip_data.id);
            let Some(sound) = clip_data.sound_data else {
                log::warn!("dropping clip {clip_id:?}: no sound data");
                offline_clips.push(OfflineClip {
                    track_id,
                    clip_id,
                    name: String::new(),
                    error: "no sound data".to_string(),
                });
                continue;
            };

            let key = (sound.id, sound.name.clone());
            let asset = match assets.get(&key) {
                Some(asset) => asset.clone(),
                None => match sound_from_data(&sound) {
                    Ok(asset) => {
                        let asset = Arc::new(asset);
                        assets.insert(key, asset.clone());
                        asset
                    }
                    Err(e) => {
                        log::warn!("dropping clip {clip_id:?}: {e}");
                        offline_clips.push(OfflineClip {
                            track_id,
                            clip_id,
                            name: sound.name,
                            error: e.to_string(),
                        });
                        continue;
                    }
                },
            };

            let start = if clip_data.start_time.is_finite() {
                clip_data.start_time.max(0.0)
            } else {
                0.0
            };
            track.push_clip(Clip {
                id: clip_id,
                asset,
                track_id,
                start,
                width: positive_or(clip_data.duration, DEFAULT_CLIP_WIDTH),
            });
        }

        tracks.push(track);
    }

    let sounds = project
        .sounds
        .iter()
        .filter_map(|data| match sound_from_data(data) {
            Ok(asset) => Some(asset),
            Err(e) => {
                log::warn!("skipping project sound: {e}");
                None
            }
        })
        .collect();

    LoadedProject {
        settings,
        tracks,
        sounds,
        offline_clips,
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn sound_json(id: u64, name: &str, audio: &str) -> serde_json::Value {
        json!({ "id": id, "name": name, "tags": ["vox"], "audioData": audio })
    }

    const GOOD_AUDIO: &str = "data:audio/wav;base64,UklGRg==";

    #[test]
    fn test_missing_version_is_rejected() {
        let result = parse_project(r#"{"bpm": 120, "tracks": []}"#);
        assert!(matches!(result, Err(ProjectError::MissingVersion)));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let result = parse_project("not json at all");
        assert!(matches!(result, Err(ProjectError::Json(_))));
    }

    #[test]
    fn test_load_project_file_not_found() {
        let result = load_project(Path::new("/nonexistent/project.json"));
        assert!(matches!(result, Err(ProjectError::Io(_))));
    }

    #[test]
    fn test_corrupt_clips_go_offline() {
        let doc = json!({
            "version": "1.0",
            "bpm": 100,
            "tracks": [{
                "id": 1,
                "name": "Track 1",
                "clips": [
                    { "id": 1, "soundData": sound_json(7, "hello", GOOD_AUDIO), "startTime": 50, "duration": 200 },
                    { "id": 2, "startTime": 0, "duration": 100 },
                    { "id": 3, "soundData": sound_json(8, "", GOOD_AUDIO), "startTime": 0, "duration": 100 },
                    { "id": 4, "soundData": sound_json(9, "broken", "no-comma"), "startTime": 0, "duration": 100 }
                ]
            }]
        });

        let loaded = parse_project(&doc.to_string()).expect("parse");

        assert_eq!(loaded.settings.bpm, 100.0);
        assert_eq!(loaded.tracks[0].clips().len(), 1);
        assert_eq!(loaded.tracks[0].clips()[0].asset.name, "hello");
        let offline: Vec<u64> = loaded.offline_clips.iter().map(|c| c.clip_id.0).collect();
        assert_eq!(offline, vec![2, 3, 4]);
    }

    #[test]
    fn test_clips_with_same_sound_share_asset() {
        let doc = json!({
            "version": "1.0",
            "tracks": [
                { "id": 1, "name": "Track 1", "clips": [
                    { "id": 1, "soundData": sound_json(7, "hello", GOOD_AUDIO) }
                ]},
                { "id": 2, "name": "Track 2", "clips": [
                    { "id": 2, "soundData": sound_json(7, "hello", GOOD_AUDIO) }
                ]}
            ]
        });

        let loaded = parse_project(&doc.to_string()).expect("parse");
        let a = &loaded.tracks[0].clips()[0].asset;
        let b = &loaded.tracks[1].clips()[0].asset;
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(loaded.tracks[1].clips()[0].width, DEFAULT_CLIP_WIDTH);
    }

    #[test]
    fn test_invalid_settings_fall_back_to_defaults() {
        let doc = json!({ "version": "1.0", "bpm": 0, "secondsPerBeat": -1, "trackNameCounter": 0 });
        let loaded = parse_project(&doc.to_string()).expect("parse");

        assert_eq!(loaded.settings.bpm, DEFAULT_BPM);
        assert_eq!(loaded.settings.seconds_per_beat, DEFAULT_SECONDS_PER_BEAT);
        assert_eq!(loaded.settings.track_name_counter, 1);
    }

    #[test]
    fn test_load_project_reads_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("song.json");
        let doc = json!({ "version": "1.0", "isTimeMode": true, "sounds": [sound_json(3, "bell", GOOD_AUDIO)] });
        std::fs::write(&path, doc.to_string()).expect("write");

        let loaded = load_project(&path).expect("load");
        assert!(loaded.settings.is_time_mode);
        assert_eq!(loaded.sounds.len(), 1);
        assert!(loaded.sounds[0].tags.contains("vox"));
    }

    #[test]
    fn test_autosave_missing_or_corrupt_is_none() {
        let mut store = MemoryStore::new();
        assert!(load_autosave(&store).is_none());

        store.set(AUTOSAVE_KEY, "{{{".to_string()).unwrap();
        assert!(load_autosave(&store).is_none());
    }
}
