use crate::{
    AUTOSAVE_KEY, ClipData, KeyValueStore, PROJECT_VERSION, Project, ProjectError,
    ProjectSettings, SoundData, TrackData,
};
use daw_transport::{SoundAsset, Track};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const AUDIO_MIME: &str = "audio/wav";

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn sound_to_data(asset: &SoundAsset) -> SoundData {
    SoundData {
        id: asset.id.0,
        name: asset.name.clone(),
        tags: asset.tags.iter().cloned().collect(),
        duration: asset.duration_seconds,
        audio_data: Some(daw_decode::encode_data_uri(&asset.pcm, AUDIO_MIME)),
        created_at: asset.created_at,
    }
}

pub fn build_project(
    settings: &ProjectSettings,
    tracks: &[Track],
    sounds: &[Arc<SoundAsset>],
) -> Project {
    Project {
        version: Some(PROJECT_VERSION.to_string()),
        bpm: settings.bpm,
        tracks: tracks
            .iter()
            .map(|track| TrackData {
                id: track.id.0,
                name: track.name.clone(),
                clips: track
                    .clips()
                    .iter()
                    .map(|clip| ClipData {
                        id: clip.id.0,
                        sound_data: Some(sound_to_data(&clip.asset)),
                        start_time: clip.start,
                        duration: clip.width,
                        track_id: Some(track.id.0),
                    })
                    .collect(),
            })
            .collect(),
        sounds: sounds.iter().map(|sound| sound_to_data(sound)).collect(),
        timestamp: unix_millis(),
        track_name_counter: settings.track_name_counter,
        track_id_counter: settings.track_id_counter,
        is_time_mode: settings.is_time_mode,
        seconds_per_beat: settings.seconds_per_beat,
    }
}

pub fn project_to_json(project: &Project) -> Result<String, ProjectError> {
    Ok(serde_json::to_string_pretty(project)?)
}

/// Write a portable project file including the sound catalog.
pub fn save_project(
    path: &Path,
    settings: &ProjectSettings,
    tracks: &[Track],
    sounds: &[Arc<SoundAsset>],
) -> Result<(), ProjectError> {
    let json = project_to_json(&build_project(settings, tracks, sounds))?;

    let partial = path.with_extension("json.part");
    let result = File::create(&partial)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            writer.write_all(json.as_bytes())?;
            writer.flush()
        })
        .and_then(|()| std::fs::rename(&partial, path));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&partial);
        return Err(e.into());
    }

    log::info!("project saved to {}", path.display());
    Ok(())
}

/// Snapshot the arrangement into the store. The snapshot is fully
/// serialized before the store is touched, so a failure leaves the previous
/// snapshot in place.
pub fn save_autosave(
    store: &mut dyn KeyValueStore,
    settings: &ProjectSettings,
    tracks: &[Track],
) -> Result<(), ProjectError> {
    let json = serde_json::to_string(&build_project(settings, tracks, &[]))?;
    store.set(AUTOSAVE_KEY, json)?;
    Ok(())
}
