//! The editing session: one arrangement, its transport and drag controller,
//! the decoded-audio cache, the external store and the audio output.
//!
//! This is the error boundary. Every public operation returns a
//! [`SessionError`] with a bounded user-facing message instead of panicking,
//! and every arrangement mutation is written through to the store.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::arrangement::{Arrangement, PlaceError};
use crate::clip_ops::{referenced_assets, render_clips};
use crate::drag::{DragConfig, DragController, DragPreview, DragSource, DropOutcome};
use crate::playback::{PlaybackState, Transport};
use crate::time::{TimeContext, TimeMode};
use daw_decode::AudioCache;
use daw_project::{KeyValueStore, OfflineClip, ProjectError};
use daw_render::{EXPORT_SAMPLE_RATE, RenderError};
use daw_transport::{AssetId, AudioBuffer, ClipId, SoundAsset, TrackId, VoiceId, VoiceSink};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("nothing to export")]
    NothingToExport,

    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),

    #[error("could not save: {0}")]
    Persist(#[source] ProjectError),

    #[error("invalid project file: {0}")]
    InvalidProject(#[source] ProjectError),

    #[error("export failed: {0}")]
    Export(#[source] RenderError),

    #[error(transparent)]
    Place(#[from] PlaceError),

    #[error("unknown sound {0:?}")]
    UnknownSound(AssetId),

    #[error("preview failed: {0}")]
    Preview(String),
}

impl SessionError {
    /// Text fit to show the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::NothingToExport => {
                "Nothing to export. Place at least one sound on the timeline first."
            }
            SessionError::AudioUnavailable(_) => "Audio output is not available on this system.",
            SessionError::Persist(_) => "Could not save the project. The previous save is unchanged.",
            SessionError::InvalidProject(_) => "This file is not a valid project.",
            SessionError::Export(_) => "Export failed. No file was written.",
            SessionError::Place(_) => "That sound cannot be placed on the timeline.",
            SessionError::UnknownSound(_) => "That sound is no longer in the library.",
            SessionError::Preview(_) => "That sound could not be played.",
        }
    }
}

impl From<RenderError> for SessionError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::NothingToExport => SessionError::NothingToExport,
            other => SessionError::Export(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Timing for a fresh arrangement; a restored one keeps its own.
    pub time: TimeContext,
    pub drag: DragConfig,
    pub export_sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            time: TimeContext::default(),
            drag: DragConfig::default(),
            export_sample_rate: EXPORT_SAMPLE_RATE,
        }
    }
}

/// What opening a project file brought in.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub tracks: usize,
    pub clips: usize,
    pub imported_sounds: usize,
    pub offline_clips: Vec<OfflineClip>,
}

/// A library sound auditioned outside the arrangement.
#[derive(Debug, Clone, Copy)]
struct Preview {
    voice: VoiceId,
    sound: AssetId,
}

pub struct Session {
    arrangement: Arrangement,
    transport: Transport,
    drag: DragController,
    cache: AudioCache,
    store: Box<dyn KeyValueStore>,
    sink: Option<Box<dyn VoiceSink>>,
    sounds: Vec<Arc<SoundAsset>>,
    preview: Option<Preview>,
    export_sample_rate: u32,
}

impl Session {
    /// Restore the sound catalog and the auto-saved arrangement from `store`.
    pub fn new(mut store: Box<dyn KeyValueStore>, config: SessionConfig) -> Self {
        let sounds = daw_project::load_catalog(store.as_mut());
        let arrangement = Arrangement::load_from_store(store.as_ref())
            .unwrap_or_else(|| Arrangement::new(config.time));

        let mut session = Self {
            arrangement,
            transport: Transport::new(),
            drag: DragController::new(config.drag),
            cache: AudioCache::new(),
            store,
            sink: None,
            sounds,
            preview: None,
            export_sample_rate: config.export_sample_rate,
        };
        session.intern_assets();
        session.settle();
        log::info!(
            "session ready: {} tracks, {} clips, {} sounds",
            session.arrangement.tracks().len(),
            session.arrangement.clip_count(),
            session.sounds.len()
        );
        session
    }

    pub fn with_sink(mut self, sink: Box<dyn VoiceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach the default output device.
    pub fn with_default_output(self) -> Result<Self, SessionError> {
        let engine =
            daw_engine::start().map_err(|e| SessionError::AudioUnavailable(e.to_string()))?;
        Ok(self.with_sink(Box::new(engine)))
    }

    pub fn arrangement(&self) -> &Arrangement {
        &self.arrangement
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn drag(&self) -> &DragController {
        &self.drag
    }

    pub fn sounds(&self) -> &[Arc<SoundAsset>] {
        &self.sounds
    }

    pub fn sound(&self, id: AssetId) -> Option<&Arc<SoundAsset>> {
        self.sounds.iter().find(|s| s.id == id)
    }

    pub fn has_audio_output(&self) -> bool {
        self.sink.is_some()
    }

    /// Decoded buffers currently held.
    pub fn cached_audio(&self) -> usize {
        self.cache.len()
    }

    // --- arrangement ---

    pub fn add_track(&mut self) -> Result<TrackId, SessionError> {
        let id = self.arrangement.add_track();
        self.persist()?;
        Ok(id)
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<bool, SessionError> {
        let Some(track) = self.arrangement.remove_track(id) else {
            return Ok(false);
        };
        if let Some(sink) = self.sink.as_deref_mut() {
            for clip in track.clips() {
                self.transport.cancel_clip(clip.id, sink);
            }
        }
        self.release_unreferenced();
        self.persist()?;
        Ok(true)
    }

    /// Place a catalog sound.
    pub fn place_sound(
        &mut self,
        sound: AssetId,
        track: TrackId,
        raw_position: f64,
    ) -> Result<ClipId, SessionError> {
        let asset = self
            .sound(sound)
            .cloned()
            .ok_or(SessionError::UnknownSound(sound))?;
        self.place_asset(asset, track, raw_position)
    }

    pub fn place_asset(
        &mut self,
        asset: Arc<SoundAsset>,
        track: TrackId,
        raw_position: f64,
    ) -> Result<ClipId, SessionError> {
        let duration = self.duration_of(&asset);
        let id = self
            .arrangement
            .place_clip(asset, track, raw_position, duration)?;
        self.persist()?;
        Ok(id)
    }

    pub fn move_clip(
        &mut self,
        clip: ClipId,
        from: TrackId,
        to: TrackId,
        raw_position: f64,
        grab_offset: f64,
    ) -> Result<bool, SessionError> {
        if !self
            .arrangement
            .move_clip(clip, from, to, raw_position, grab_offset)
        {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn remove_clip(&mut self, track: TrackId, clip: ClipId) -> Result<bool, SessionError> {
        if self
            .drag
            .remove_clip(track, clip, &mut self.arrangement)
            .is_none()
        {
            return Ok(false);
        }
        if let Some(sink) = self.sink.as_deref_mut() {
            self.transport.cancel_clip(clip, sink);
        }
        self.release_unreferenced();
        self.persist()?;
        Ok(true)
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<bool, SessionError> {
        self.retime(|arrangement, cache| arrangement.set_bpm(bpm, |a| decoded_duration(cache, a)))
    }

    pub fn set_seconds_per_beat(&mut self, seconds_per_beat: f64) -> Result<bool, SessionError> {
        self.retime(|arrangement, cache| {
            arrangement.set_seconds_per_beat(seconds_per_beat, |a| decoded_duration(cache, a))
        })
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) -> Result<(), SessionError> {
        self.retime(|arrangement, cache| {
            arrangement.set_time_mode(mode, |a| decoded_duration(cache, a))
        })
    }

    pub fn toggle_time_mode(&mut self) -> Result<TimeMode, SessionError> {
        self.retime(|arrangement, cache| {
            arrangement.toggle_time_mode(|a| decoded_duration(cache, a))
        })
    }

    /// Discard the arrangement and its auto-save, back to one empty track.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.halt();
        self.arrangement.reset();
        self.cache.clear();
        self.store
            .remove(daw_project::AUTOSAVE_KEY)
            .map_err(|e| persist_error(e.into()))
    }

    /// Add a recorded or uploaded sound to the catalog, renaming it on a
    /// name clash.
    pub fn add_sound(&mut self, mut sound: SoundAsset) -> Result<Arc<SoundAsset>, SessionError> {
        let taken: HashSet<String> = self.sounds.iter().map(|s| s.name.clone()).collect();
        sound.name = daw_project::unique_name(&sound.name, &taken);
        sound.id = AssetId(self.next_asset_id());
        let sound = Arc::new(sound);

        let mut sounds = self.sounds.clone();
        sounds.push(sound.clone());
        daw_project::store_catalog(self.store.as_mut(), &sounds).map_err(persist_error)?;
        self.sounds = sounds;
        Ok(sound)
    }

    // --- gestures ---

    pub fn begin_sound_drag(
        &mut self,
        sound: AssetId,
        x: f64,
        y: f64,
        grab_offset: f64,
        now: Instant,
    ) -> Result<(), SessionError> {
        let asset = self
            .sound(sound)
            .cloned()
            .ok_or(SessionError::UnknownSound(sound))?;
        let duration_secs = self.duration_of(&asset);
        self.drag.press(
            DragSource::NewSound {
                asset,
                duration_secs,
            },
            x,
            y,
            grab_offset,
            now,
        );
        Ok(())
    }

    /// Press on an existing clip. Returns `false` if there is no such clip.
    pub fn begin_clip_drag(&mut self, clip: ClipId, x: f64, y: f64, grab_offset: f64, now: Instant) -> bool {
        let Some(found) = self.arrangement.clip(clip) else {
            return false;
        };
        let source = DragSource::Clip {
            clip_id: found.id,
            from_track: found.track_id,
            width: found.width,
        };
        self.drag.press(source, x, y, grab_offset, now);
        true
    }

    pub fn drag_to(
        &mut self,
        x: f64,
        y: f64,
        target: Option<TrackId>,
        now: Instant,
    ) -> Option<DragPreview> {
        let time = *self.arrangement.time();
        self.drag.pointer_move(x, y, target, &time, now).copied()
    }

    pub fn drop_at(&mut self, x: f64, target: Option<TrackId>) -> Result<DropOutcome, SessionError> {
        let outcome = self.drag.drop(x, target, &mut self.arrangement);
        match &outcome {
            DropOutcome::Rejected(e) => log::warn!("drop rejected: {e}"),
            DropOutcome::Stale => log::warn!("dragged clip disappeared before the drop"),
            _ => {}
        }
        if outcome.mutated() {
            self.persist()?;
        }
        Ok(outcome)
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.drag.cancel()
    }

    // --- transport ---

    pub fn playback_state(&self) -> PlaybackState {
        self.transport.state()
    }

    /// Start playback. Fails before touching anything when there is no
    /// audio output.
    pub fn play(&mut self, now: Instant) -> Result<usize, SessionError> {
        if self.sink.is_none() {
            return Err(no_output());
        }
        self.stop_preview();
        let Some(sink) = self.sink.as_deref_mut() else {
            return Err(no_output());
        };
        let cache = &mut self.cache;
        Ok(self
            .transport
            .play(now, &self.arrangement, |a| cache.get_or_decode(a), sink))
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(sink) = self.sink.as_deref_mut() {
            self.transport.pause(now, sink);
        }
    }

    pub fn stop(&mut self) {
        self.stop_preview();
        if let Some(sink) = self.sink.as_deref_mut() {
            self.transport.stop(sink);
        }
    }

    /// Audition a library sound from its start. Returns `false` without
    /// sounding anything while the arrangement plays, a gesture is active or
    /// another preview is still sounding.
    pub fn preview_sound(&mut self, sound: AssetId) -> Result<bool, SessionError> {
        let asset = self
            .sound(sound)
            .cloned()
            .ok_or(SessionError::UnknownSound(sound))?;
        if self.transport.is_playing() || self.drag.is_active() || self.preview.is_some() {
            log::debug!("not previewing '{}': busy", asset.name);
            return Ok(false);
        }
        let Some(sink) = self.sink.as_deref_mut() else {
            return Err(no_output());
        };

        // Only a clip's decode is kept in the cache; a preview owns its own.
        let audio = match self.cache.get(asset.id) {
            Some(audio) => audio,
            None => daw_decode::decode_bytes(&asset.pcm)
                .map_err(|e| SessionError::Preview(format!("'{}': {e}", asset.name)))?,
        };
        let voice = self.transport.allocate_voice();
        sink.start_voice(voice, audio, 0.0)
            .map_err(|e| SessionError::Preview(format!("'{}': {e}", asset.name)))?;
        self.preview = Some(Preview { voice, sound });
        Ok(true)
    }

    /// The sound currently being previewed.
    pub fn previewing(&self) -> Option<AssetId> {
        self.preview.map(|p| p.sound)
    }

    /// Silence the preview. Returns whether one was sounding.
    pub fn stop_preview(&mut self) -> bool {
        let Some(preview) = self.preview.take() else {
            return false;
        };
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.stop_voice(preview.voice);
        }
        true
    }

    pub fn seek(&mut self, position: f64, now: Instant) {
        let Some(sink) = self.sink.as_deref_mut() else {
            return;
        };
        let cache = &mut self.cache;
        self.transport.seek(
            position,
            now,
            &self.arrangement,
            |a| cache.get_or_decode(a),
            sink,
        );
    }

    /// Drive time-based work: the transport position and the drag watchdog.
    /// Returns the playhead position.
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.drag.tick(now);
        let Some(sink) = self.sink.as_deref_mut() else {
            return self.transport.position();
        };
        // The transport never runs alongside a preview, so draining the
        // finished voices here steals none of its own.
        if let Some(preview) = self.preview {
            if sink.finished_voices().contains(&preview.voice) {
                log::debug!("preview of {:?} finished", preview.sound);
                self.preview = None;
            }
        }
        self.transport.tick(now, sink)
    }

    // --- export and files ---

    pub fn render(&mut self) -> Result<AudioBuffer, SessionError> {
        let clips = render_clips(&self.arrangement);
        let cache = &mut self.cache;
        let buffer =
            daw_render::render_mixdown(&clips, self.export_sample_rate, |a| cache.get_or_decode(a))?;
        Ok(buffer)
    }

    pub fn export_wav_bytes(&mut self) -> Result<Vec<u8>, SessionError> {
        let buffer = self.render()?;
        Ok(daw_render::encode_wav(&buffer)?)
    }

    pub fn export_wav(&mut self, path: &Path) -> Result<(), SessionError> {
        let buffer = self.render()?;
        daw_render::write_wav(&buffer, path)?;
        Ok(())
    }

    pub fn save_project(&self, path: &Path) -> Result<(), SessionError> {
        daw_project::save_project(
            path,
            &self.arrangement.settings(),
            self.arrangement.tracks(),
            &self.sounds,
        )
        .map_err(persist_error)
    }

    /// Replace the arrangement with a project file and merge its sounds into
    /// the catalog.
    pub fn open_project(&mut self, path: &Path) -> Result<LoadReport, SessionError> {
        let loaded = daw_project::load_project(path).map_err(SessionError::InvalidProject)?;

        self.halt();
        let mut report = LoadReport {
            tracks: loaded.tracks.len(),
            clips: loaded.clip_count(),
            imported_sounds: 0,
            offline_clips: loaded.offline_clips.clone(),
        };
        for offline in &report.offline_clips {
            log::warn!(
                "clip {:?} ('{}') could not be restored: {}",
                offline.clip_id,
                offline.name,
                offline.error
            );
        }

        // Sounds only embedded in clips join the catalog too, unless the
        // catalog already holds the identical sound.
        let mut incoming = loaded.sounds;
        for track in &loaded.tracks {
            for clip in track.clips() {
                let asset = &clip.asset;
                let known = |s: &SoundAsset| s.name == asset.name && s.pcm == asset.pcm;
                if !incoming.iter().any(known) && !self.sounds.iter().any(|s| known(s.as_ref())) {
                    incoming.push((**asset).clone());
                }
            }
        }
        let originals: Vec<(String, Arc<[u8]>)> = incoming
            .iter()
            .map(|s| (s.name.clone(), s.pcm.clone()))
            .collect();
        let imported = daw_project::merge_sounds(&self.sounds, incoming);

        let mut arrangement = Arrangement::from_parts(loaded.settings, loaded.tracks);
        arrangement.map_assets(|asset| {
            originals
                .iter()
                .position(|(name, pcm)| *name == asset.name && *pcm == asset.pcm)
                .map_or(asset, |index| imported[index].clone())
        });
        report.imported_sounds = imported.len();
        if !imported.is_empty() {
            let mut sounds = self.sounds.clone();
            sounds.extend(imported);
            daw_project::store_catalog(self.store.as_mut(), &sounds).map_err(persist_error)?;
            self.sounds = sounds;
        }

        self.arrangement = arrangement;
        self.cache.clear();
        self.intern_assets();
        self.settle();
        self.persist()?;
        Ok(report)
    }

    /// Stop playback, drop any gesture and release the audio output.
    /// Calling it again does nothing.
    pub fn close(&mut self) {
        self.halt();
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        self.cache.clear();
    }

    // --- internals ---

    fn persist(&mut self) -> Result<(), SessionError> {
        self.arrangement
            .persist_to_store(self.store.as_mut())
            .map_err(persist_error)
    }

    fn halt(&mut self) {
        self.drag.cleanup();
        self.stop();
    }

    /// Apply a timing change. Playback restarts under the new timing.
    fn retime<T>(
        &mut self,
        change: impl FnOnce(&mut Arrangement, &AudioCache) -> T,
    ) -> Result<T, SessionError> {
        let now = Instant::now();
        let was_playing = self.transport.is_playing();
        if was_playing {
            self.pause(now);
        }
        let result = change(&mut self.arrangement, &self.cache);
        if was_playing {
            self.play(now)?;
        }
        self.persist()?;
        Ok(result)
    }

    fn settle(&mut self) {
        let cache = &self.cache;
        self.arrangement
            .recompute_durations(|a| decoded_duration(cache, a));
    }

    /// Real duration of a sound: from cache, else decoded now, else the
    /// recorded metadata, else unknown.
    fn duration_of(&mut self, asset: &SoundAsset) -> f64 {
        match self.cache.get_or_decode(asset) {
            Ok(audio) => audio.duration_secs(),
            Err(e) => {
                log::warn!("{e}");
                asset.duration_seconds.unwrap_or(f64::NAN)
            }
        }
    }

    fn release_unreferenced(&mut self) {
        let live = referenced_assets(&self.arrangement);
        let released = self.cache.retain_assets(&live);
        if released > 0 {
            log::debug!("released {released} decoded buffers");
        }
    }

    /// An id used neither by the catalog nor by any placed clip.
    fn next_asset_id(&self) -> u64 {
        self.sounds
            .iter()
            .map(|s| s.id)
            .chain(referenced_assets(&self.arrangement))
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// One id per distinct sound, one `Arc` per id. Decoded audio is cached
    /// by id, so two different sounds must never share one.
    fn intern_assets(&mut self) {
        let mut known: HashMap<AssetId, Arc<SoundAsset>> =
            self.sounds.iter().map(|s| (s.id, s.clone())).collect();
        let mut next_id = self.next_asset_id();

        self.arrangement.map_assets(|asset| match known.get(&asset.id) {
            Some(existing) if existing.name == asset.name && existing.pcm == asset.pcm => {
                existing.clone()
            }
            Some(_) => {
                if let Some(same) = known.values().find(|k| k.pcm == asset.pcm) {
                    return same.clone();
                }
                let mut renumbered = (*asset).clone();
                renumbered.id = AssetId(next_id);
                next_id += 1;
                let renumbered = Arc::new(renumbered);
                known.insert(renumbered.id, renumbered.clone());
                renumbered
            }
            None => {
                known.insert(asset.id, asset.clone());
                asset
            }
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn no_output() -> SessionError {
    SessionError::AudioUnavailable("no output device attached".to_string())
}

fn persist_error(error: ProjectError) -> SessionError {
    log::error!("save failed: {error}");
    SessionError::Persist(error)
}

fn decoded_duration(cache: &AudioCache, asset: &SoundAsset) -> anyhow::Result<f64> {
    match cache.get(asset.id) {
        Some(audio) => Ok(audio.duration_secs()),
        None => daw_decode::duration_secs(&asset.pcm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::tests::RecordingSink;
    use daw_project::{CATALOG_KEY, FileStore, MemoryStore, StoreError};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn wav(seconds: f64) -> Vec<u8> {
        wav_of(seconds, 8_000)
    }

    fn wav_of(seconds: f64, value: i16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..(seconds * 8_000.0) as usize {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn session() -> Session {
        Session::new(Box::new(MemoryStore::new()), SessionConfig::default())
    }

    fn first_track(session: &Session) -> TrackId {
        session.arrangement().tracks()[0].id
    }

    /// Lets a test inspect the sink after handing it to the session.
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<RecordingSink>>);

    impl VoiceSink for SharedSink {
        fn start_voice(
            &mut self,
            voice: VoiceId,
            audio: daw_transport::AudioArc,
            offset_secs: f64,
        ) -> anyhow::Result<()> {
            self.0.borrow_mut().start_voice(voice, audio, offset_secs)
        }

        fn stop_voice(&mut self, voice: VoiceId) {
            self.0.borrow_mut().stop_voice(voice);
        }

        fn stop_all(&mut self) {
            self.0.borrow_mut().stop_all();
        }

        fn finished_voices(&mut self) -> Vec<VoiceId> {
            self.0.borrow_mut().finished_voices()
        }

        fn close(&mut self) {
            self.0.borrow_mut().close();
        }
    }

    /// Store whose writes always fail.
    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _: &str) -> Option<String> {
            None
        }

        fn set(&mut self, _: &str, _: String) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&mut self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_place_uses_decoded_duration() {
        let mut session = session();
        let sound = session
            .add_sound(SoundAsset::new(AssetId(1), "hello", wav(2.0)))
            .unwrap();
        let track = first_track(&session);

        let id = session.place_sound(sound.id, track, 37.0).unwrap();

        let clip = session.arrangement().clip(id).unwrap();
        assert_eq!(clip.start, 50.0);
        assert!((clip.width - 400.0).abs() < 1e-6);
    }

    #[test]
    fn test_undecodable_sound_gets_default_width() {
        let mut session = session();
        let track = first_track(&session);
        let asset = Arc::new(SoundAsset::new(AssetId(9), "noise", b"not audio".to_vec()));

        let id = session.place_asset(asset, track, 0.0).unwrap();
        assert_eq!(session.arrangement().clip(id).unwrap().width, 400.0);
    }

    #[test]
    fn test_play_without_output_is_refused() {
        let mut session = session();
        let result = session.play(Instant::now());
        assert!(matches!(result, Err(SessionError::AudioUnavailable(_))));
        assert_eq!(session.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_empty_export_is_reported() {
        let mut session = session();
        let err = session.export_wav_bytes().unwrap_err();
        assert!(matches!(err, SessionError::NothingToExport));
        assert!(err.user_message().starts_with("Nothing to export"));
    }

    #[test]
    fn test_failed_persist_is_reported() {
        let mut session = Session::new(Box::new(FailingStore), SessionConfig::default());
        let err = session.add_track().unwrap_err();
        assert!(matches!(err, SessionError::Persist(_)));
        assert!(err.user_message().contains("previous save is unchanged"));
    }

    #[test]
    fn test_removing_last_clip_releases_decoded_audio() {
        let mut session = session();
        let track = first_track(&session);
        let asset = Arc::new(SoundAsset::new(AssetId(1), "hello", wav(0.5)));
        let a = session.place_asset(asset.clone(), track, 0.0).unwrap();
        let b = session.place_asset(asset, track, 400.0).unwrap();
        assert_eq!(session.cached_audio(), 1);

        assert!(session.remove_clip(track, a).unwrap());
        assert_eq!(session.cached_audio(), 1);
        assert!(session.remove_clip(track, b).unwrap());
        assert_eq!(session.cached_audio(), 0);
        assert!(!session.remove_clip(track, b).unwrap());
    }

    #[test]
    fn test_tempo_change_while_playing_restarts_voices() {
        let mut session = session().with_sink(Box::new(RecordingSink::default()));
        let track = first_track(&session);
        let asset = Arc::new(SoundAsset::new(AssetId(1), "hello", wav(1.0)));
        session.place_asset(asset, track, 0.0).unwrap();
        let t0 = Instant::now();

        session.play(t0).unwrap();
        session.tick(t0 + Duration::from_millis(100));
        session.set_bpm(60.0).unwrap();

        assert!(session.transport().is_playing());
        assert_eq!(session.arrangement().time().bpm, 60.0);
        assert!((session.arrangement().clips().next().unwrap().width - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_sound_drag_places_clip_and_persists() {
        let mut store = MemoryStore::new();
        let catalog = serde_json::json!([{
            "id": 4,
            "name": "hello",
            "audioData": daw_decode::encode_data_uri(&wav(2.0), "audio/wav"),
        }]);
        store.set(CATALOG_KEY, catalog.to_string()).unwrap();
        let mut session = Session::new(Box::new(store), SessionConfig::default());
        let track = first_track(&session);
        let t0 = Instant::now();

        session.begin_sound_drag(AssetId(4), 0.0, 0.0, 0.0, t0).unwrap();
        let preview = session
            .drag_to(37.0, 10.0, Some(track), t0 + Duration::from_millis(20))
            .expect("dragging");
        assert_eq!(preview.left, 50.0);
        assert!((preview.width - 400.0).abs() < 1e-6);

        let outcome = session.drop_at(37.0, Some(track)).unwrap();
        assert!(outcome.mutated());
        assert_eq!(session.arrangement().clip_count(), 1);
        assert!(session.store.get(daw_project::AUTOSAVE_KEY).is_some());
    }

    #[test]
    fn test_reset_clears_autosave() {
        let mut session = session();
        session.add_track().unwrap();
        assert!(session.store.get(daw_project::AUTOSAVE_KEY).is_some());

        session.reset().unwrap();
        assert_eq!(session.arrangement().tracks().len(), 1);
        assert!(session.store.get(daw_project::AUTOSAVE_KEY).is_none());
    }

    #[test]
    fn test_clashing_asset_ids_are_renumbered() {
        let mut session = session();
        session
            .add_sound(SoundAsset::new(AssetId(1), "kick", wav(0.5)))
            .unwrap();
        let catalog_id = session.sounds()[0].id;
        let track = first_track(&session);
        let other = Arc::new(SoundAsset::new(catalog_id, "snare", wav(1.0)));
        session.place_asset(other, track, 0.0).unwrap();

        session.intern_assets();

        let clip = session.arrangement().clips().next().unwrap();
        assert_ne!(clip.asset.id, catalog_id);
        assert_eq!(clip.asset.name, "snare");
    }
    #[test]
    fn test_overlapping_clips_sum_in_export() {
        let config = SessionConfig {
            export_sample_rate: 8_000,
            ..SessionConfig::default()
        };
        let mut session = Session::new(Box::new(MemoryStore::new()), config);
        let first = first_track(&session);
        let second = session.add_track().unwrap();
        let asset = Arc::new(SoundAsset::new(AssetId(1), "hello", wav(1.0)));
        session.place_asset(asset.clone(), first, 0.0).unwrap();
        session.place_asset(asset, second, 0.0).unwrap();

        let buffer = session.render().unwrap();
        assert_eq!(buffer.channels, 2);
        assert!((buffer.duration_secs() - 1.0).abs() < 0.01);
        let expected = 2.0 * 8_000.0 / 32_768.0;
        assert!((buffer.sample(4_000, 0) - expected).abs() < 0.01);
        assert!((buffer.sample(4_000, 1) - expected).abs() < 0.01);

        let bytes = session.export_wav_bytes().unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }

    #[test]
    fn test_edits_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let clip_id = {
            let mut session = Session::new(
                Box::new(FileStore::open(dir.path()).unwrap()),
                SessionConfig::default(),
            );
            let track = session.add_track().unwrap();
            session.set_bpm(90.0).unwrap();
            let asset = Arc::new(SoundAsset::new(AssetId(1), "hello", wav(1.0)));
            session.place_asset(asset, track, 120.0).unwrap()
        };

        let session = Session::new(
            Box::new(FileStore::open(dir.path()).unwrap()),
            SessionConfig::default(),
        );
        assert_eq!(session.arrangement().tracks().len(), 2);
        assert_eq!(session.arrangement().time().bpm, 90.0);
        let clip = session.arrangement().clip(clip_id).expect("restored clip");
        assert_eq!(clip.start, 100.0);
        assert!((clip.width - 150.0).abs() < 1e-6);
        assert_eq!(clip.asset.name, "hello");
    }

    #[test]
    fn test_open_project_renames_clashing_sounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");

        let mut author = session();
        author
            .add_sound(SoundAsset::new(AssetId(1), "kick", wav(0.25)))
            .unwrap();
        let track = first_track(&author);
        author.place_sound(AssetId(1), track, 0.0).unwrap();
        author.save_project(&path).unwrap();

        let mut session = session();
        session
            .add_sound(SoundAsset::new(AssetId(1), "kick", wav(0.5)))
            .unwrap();
        let report = session.open_project(&path).unwrap();

        assert_eq!(report.tracks, 1);
        assert_eq!(report.clips, 1);
        assert_eq!(report.imported_sounds, 1);
        assert!(report.offline_clips.is_empty());
        let names: Vec<&str> = session.sounds().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["kick", "kick (1)"]);

        let clip = session.arrangement().clips().next().unwrap();
        assert_eq!(clip.asset.name, "kick (1)");
        assert!(Arc::ptr_eq(&clip.asset, &session.sounds()[1]));
    }

    #[test]
    fn test_open_invalid_project_keeps_arrangement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"{"bpm": 100}"#).unwrap();

        let mut session = session();
        session.add_track().unwrap();
        let err = session.open_project(&path).unwrap_err();

        assert!(matches!(err, SessionError::InvalidProject(_)));
        assert_eq!(session.arrangement().tracks().len(), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session().with_sink(Box::new(RecordingSink::default()));
        assert!(session.has_audio_output());
        session.close();
        session.close();
        assert!(!session.has_audio_output());
        assert!(matches!(
            session.play(Instant::now()),
            Err(SessionError::AudioUnavailable(_))
        ));
    }
    #[test]
    fn test_added_sound_avoids_ids_held_by_clips() {
        let config = SessionConfig {
            export_sample_rate: 8_000,
            ..SessionConfig::default()
        };
        let mut session = Session::new(Box::new(MemoryStore::new()), config);
        let first = first_track(&session);
        let second = session.add_track().unwrap();
        let old = Arc::new(SoundAsset::new(AssetId(1), "old", wav_of(1.0, 8_000)));
        let old_clip = session.place_asset(old, first, 0.0).unwrap();

        let added = session
            .add_sound(SoundAsset::new(AssetId(1), "new", wav_of(0.5, -16_000)))
            .unwrap();
        assert_ne!(added.id, AssetId(1));

        let new_clip = session.place_sound(added.id, second, 0.0).unwrap();
        assert!((session.arrangement().clip(new_clip).unwrap().width - 100.0).abs() < 1e-6);

        session.remove_clip(first, old_clip).unwrap();
        let buffer = session.render().unwrap();
        let expected = -16_000.0 / 32_768.0;
        assert!((buffer.sample(2_000, 0) - expected).abs() < 0.01);
    }

    #[test]
    fn test_preview_is_released_once_when_stopped() {
        let sink = SharedSink::default();
        let mut session = session().with_sink(Box::new(sink.clone()));
        let sound = session
            .add_sound(SoundAsset::new(AssetId(1), "hello", wav(0.5)))
            .unwrap();

        assert!(session.preview_sound(sound.id).unwrap());
        assert_eq!(session.previewing(), Some(sound.id));
        assert!(!session.preview_sound(sound.id).unwrap());
        let voice = sink.0.borrow().started[0].0;

        assert!(session.stop_preview());
        assert!(!session.stop_preview());
        session.close();

        let recorded = sink.0.borrow();
        assert_eq!(recorded.started.len(), 1);
        assert_eq!(recorded.stopped, [voice]);
        assert_eq!(session.cached_audio(), 0);
    }

    #[test]
    fn test_preview_that_ends_is_not_stopped_again() {
        let sink = SharedSink::default();
        let mut session = session().with_sink(Box::new(sink.clone()));
        let sound = session
            .add_sound(SoundAsset::new(AssetId(1), "hello", wav(0.5)))
            .unwrap();

        assert!(session.preview_sound(sound.id).unwrap());
        let voice = sink.0.borrow().started[0].0;
        sink.0.borrow_mut().finished.push(voice);
        session.tick(Instant::now());

        assert_eq!(session.previewing(), None);
        assert!(!session.stop_preview());
        session.close();
        assert!(sink.0.borrow().stopped.is_empty());
    }

    #[test]
    fn test_preview_refused_while_busy() {
        let mut session = session();
        let sound = session
            .add_sound(SoundAsset::new(AssetId(1), "hello", wav(0.5)))
            .unwrap();
        assert!(matches!(
            session.preview_sound(sound.id),
            Err(SessionError::AudioUnavailable(_))
        ));
        assert!(matches!(
            session.preview_sound(AssetId(99)),
            Err(SessionError::UnknownSound(_))
        ));

        let sink = SharedSink::default();
        let mut session = session.with_sink(Box::new(sink.clone()));
        let t0 = Instant::now();
        session.begin_sound_drag(sound.id, 0.0, 0.0, 0.0, t0).unwrap();
        assert!(!session.preview_sound(sound.id).unwrap());
        session.cancel_drag();

        let track = first_track(&session);
        session.place_sound(sound.id, track, 0.0).unwrap();
        session.play(t0).unwrap();
        assert!(!session.preview_sound(sound.id).unwrap());
        assert_eq!(session.previewing(), None);
    }

    #[test]
    fn test_play_stops_a_running_preview() {
        let sink = SharedSink::default();
        let mut session = session().with_sink(Box::new(sink.clone()));
        let sound = session
            .add_sound(SoundAsset::new(AssetId(1), "hello", wav(0.5)))
            .unwrap();
        assert!(session.preview_sound(sound.id).unwrap());
        let voice = sink.0.borrow().started[0].0;

        session.play(Instant::now()).unwrap();
        assert_eq!(session.previewing(), None);
        assert_eq!(sink.0.borrow().stopped, [voice]);
    }

    #[test]
    fn test_open_project_catalogs_sounds_only_in_clips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");

        let mut author = session();
        let track = first_track(&author);
        let embedded = Arc::new(SoundAsset::new(AssetId(7), "kick", wav(0.25)));
        author.place_asset(embedded, track, 0.0).unwrap();
        author.save_project(&path).unwrap();

        let mut session = session();
        session
            .add_sound(SoundAsset::new(AssetId(1), "kick", wav(0.5)))
            .unwrap();
        let report = session.open_project(&path).unwrap();

        assert_eq!(report.imported_sounds, 1);
        let names: Vec<&str> = session.sounds().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["kick", "kick (1)"]);
        let clip = session.arrangement().clips().next().unwrap();
        assert!(Arc::ptr_eq(&clip.asset, &session.sounds()[1]));
    }
}
