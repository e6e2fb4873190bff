//! The clip/track store.
//!
//! Clip geometry lives in position units, so every change to the timing
//! parameters is followed by a duration recompute before the setter returns.
//! Recomputes are tagged with a generation; results computed under older
//! parameters are dropped.

use crate::snap::snap;
use crate::time::{TimeContext, TimeMode};
use daw_project::{KeyValueStore, LoadedProject, ProjectError, ProjectSettings};
use daw_transport::{Clip, ClipId, SoundAsset, Track, TrackId};
use rayon::prelude::*;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    #[error("sound has no name")]
    MissingName,

    #[error("sound '{0}' has no audio")]
    MissingAudio(String),

    #[error("unknown track {0:?}")]
    UnknownTrack(TrackId),
}

/// One clip's duration to resolve, stamped with the generation it was
/// requested under.
#[derive(Debug, Clone)]
pub struct DurationRequest {
    pub generation: u64,
    pub clip_id: ClipId,
    pub asset: Arc<SoundAsset>,
}

#[derive(Debug)]
pub struct DurationResult {
    pub generation: u64,
    pub clip_id: ClipId,
    pub duration: anyhow::Result<f64>,
}

#[derive(Debug, Clone)]
pub struct Arrangement {
    tracks: Vec<Track>,
    time: TimeContext,
    track_id_counter: u64,
    track_name_counter: u64,
    last_track_id: u64,
    next_clip_id: u64,
    generation: u64,
}

impl Default for Arrangement {
    fn default() -> Self {
        Self::new(TimeContext::default())
    }
}

impl Arrangement {
    /// A fresh arrangement holding a single "Track 1".
    pub fn new(time: TimeContext) -> Self {
        let first_id = daw_project::unix_millis().max(1);
        Self {
            tracks: vec![Track::new(TrackId(first_id), "Track 1")],
            time: sanitize_time(time, TimeContext::default()),
            track_id_counter: 1,
            track_name_counter: 1,
            last_track_id: first_id,
            next_clip_id: 1,
            generation: 0,
        }
    }

    pub fn from_parts(settings: ProjectSettings, tracks: Vec<Track>) -> Self {
        let mode = if settings.is_time_mode {
            TimeMode::Seconds
        } else {
            TimeMode::Beat
        };
        let time = sanitize_time(
            TimeContext::new(mode, settings.bpm, settings.seconds_per_beat),
            TimeContext::default(),
        );

        if tracks.is_empty() {
            let mut arrangement = Self::new(time);
            arrangement.track_id_counter = settings.track_id_counter.max(1);
            arrangement.track_name_counter = settings.track_name_counter.max(1);
            return arrangement;
        }

        let last_track_id = tracks.iter().map(|t| t.id.0).max().unwrap_or(0);
        let next_clip_id = tracks
            .iter()
            .flat_map(|t| t.clips())
            .map(|c| c.id.0)
            .max()
            .map_or(1, |id| id + 1);

        Self {
            tracks,
            time,
            track_id_counter: settings.track_id_counter.max(1),
            track_name_counter: settings.track_name_counter.max(1),
            last_track_id,
            next_clip_id,
            generation: 0,
        }
    }

    pub fn from_loaded(loaded: LoadedProject) -> Self {
        Self::from_parts(loaded.settings, loaded.tracks)
    }

    /// Restore the auto-save snapshot, if there is a readable one.
    pub fn load_from_store(store: &dyn KeyValueStore) -> Option<Self> {
        let loaded = daw_project::load_autosave(store)?;
        for offline in &loaded.offline_clips {
            log::warn!(
                "auto-save clip {:?} on track {:?} dropped: {}",
                offline.clip_id,
                offline.track_id,
                offline.error
            );
        }
        Some(Self::from_loaded(loaded))
    }

    pub fn persist_to_store(&self, store: &mut dyn KeyValueStore) -> Result<(), ProjectError> {
        daw_project::save_autosave(store, &self.settings(), &self.tracks)
    }

    pub fn settings(&self) -> ProjectSettings {
        ProjectSettings {
            bpm: self.time.bpm,
            is_time_mode: self.time.mode.is_seconds(),
            seconds_per_beat: self.time.seconds_per_beat,
            track_name_counter: self.track_name_counter,
            track_id_counter: self.track_id_counter,
        }
    }

    pub fn time(&self) -> &TimeContext {
        &self.time
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.tracks.iter().flat_map(|t| t.clips())
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips().find(|c| c.id == id)
    }

    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|t| t.clips().len()).sum()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn add_track(&mut self) -> TrackId {
        self.track_id_counter += 1;
        let candidate = daw_project::unix_millis() + self.track_id_counter;
        let id = candidate.max(self.last_track_id + 1);
        self.last_track_id = id;

        self.track_name_counter += 1;
        let name = format!("Track {}", self.track_name_counter);
        log::debug!("added {name} ({id})");

        self.tracks.push(Track::new(TrackId(id), name));
        TrackId(id)
    }

    /// Remove a track and its clips. The last remaining track is kept.
    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        if self.tracks.len() <= 1 {
            log::debug!("refusing to remove the last track");
            return None;
        }
        let index = self.tracks.iter().position(|t| t.id == id)?;
        Some(self.tracks.remove(index))
    }

    /// Place `asset` on a track at the snapped position, sized from its
    /// real duration.
    pub fn place_clip(
        &mut self,
        asset: Arc<SoundAsset>,
        track_id: TrackId,
        raw_position: f64,
        duration_secs: f64,
    ) -> Result<ClipId, PlaceError> {
        if asset.name.trim().is_empty() {
            log::warn!("ignoring placement of a sound without a name");
            return Err(PlaceError::MissingName);
        }
        if asset.pcm.is_empty() {
            log::warn!("ignoring placement of '{}': no audio", asset.name);
            return Err(PlaceError::MissingAudio(asset.name.clone()));
        }

        let start = snap(&self.time, raw_position);
        let width = self.time.width_for_duration(duration_secs);
        let id = ClipId(self.next_clip_id);

        let track = self
            .track_mut(track_id)
            .ok_or(PlaceError::UnknownTrack(track_id))?;
        track.push_clip(Clip {
            id,
            asset,
            track_id,
            start,
            width,
        });
        self.next_clip_id += 1;
        Ok(id)
    }

    /// Relocate a clip to `snap(raw_position - grab_offset)` on `to`, keeping
    /// its id and width.
    pub fn move_clip(
        &mut self,
        clip_id: ClipId,
        from: TrackId,
        to: TrackId,
        raw_position: f64,
        grab_offset: f64,
    ) -> bool {
        if self.track(to).is_none() {
            log::warn!("cannot move clip {clip_id:?}: unknown track {to:?}");
            return false;
        }
        let start = snap(&self.time, raw_position - grab_offset);

        if from == to {
            let Some(clip) = self.track_mut(from).and_then(|t| t.clip_mut(clip_id)) else {
                log::warn!("cannot move clip {clip_id:?}: not on track {from:?}");
                return false;
            };
            clip.start = start;
            return true;
        }

        let Some(mut clip) = self.track_mut(from).and_then(|t| t.remove_clip(clip_id)) else {
            log::warn!("cannot move clip {clip_id:?}: not on track {from:?}");
            return false;
        };
        clip.start = start;
        match self.track_mut(to) {
            Some(track) => track.push_clip(clip),
            None => false,
        }
    }

    pub fn remove_clip(&mut self, track_id: TrackId, clip_id: ClipId) -> Option<Clip> {
        self.track_mut(track_id)?.remove_clip(clip_id)
    }

    /// Swap the asset handle of every clip, e.g. to share one `Arc` per sound.
    pub fn map_assets<F>(&mut self, mut f: F)
    where
        F: FnMut(Arc<SoundAsset>) -> Arc<SoundAsset>,
    {
        for track in &mut self.tracks {
            for clip in track.clips_mut() {
                clip.asset = f(clip.asset.clone());
            }
        }
    }

    /// Start a recompute under the current parameters. Results from any
    /// earlier request become stale.
    pub fn begin_recompute(&mut self) -> Vec<DurationRequest> {
        self.generation += 1;
        let generation = self.generation;
        self.clips()
            .map(|clip| DurationRequest {
                generation,
                clip_id: clip.id,
                asset: clip.asset.clone(),
            })
            .collect()
    }

    /// Apply resolved durations. Returns how many clips were rewritten.
    pub fn apply_durations(&mut self, results: impl IntoIterator<Item = DurationResult>) -> usize {
        let mut applied = 0;
        for result in results {
            if result.generation != self.generation {
                log::debug!(
                    "discarding stale duration for clip {:?} (generation {} < {})",
                    result.clip_id,
                    result.generation,
                    self.generation
                );
                continue;
            }
            let time = self.time;
            let Some(clip) = self
                .tracks
                .iter_mut()
                .find_map(|t| t.clip_mut(result.clip_id))
            else {
                continue;
            };
            match result.duration {
                Ok(seconds) => {
                    clip.width = time.width_for_duration(seconds);
                    applied += 1;
                }
                Err(e) => log::warn!(
                    "keeping width of clip {:?} ('{}'): {e}",
                    clip.id,
                    clip.asset.name
                ),
            }
        }
        applied
    }

    /// Rewrite every clip's width from its asset's real duration.
    pub fn recompute_durations<F>(&mut self, resolve: F) -> usize
    where
        F: Fn(&SoundAsset) -> anyhow::Result<f64> + Sync,
    {
        let requests = self.begin_recompute();
        let results: Vec<DurationResult> = requests
            .par_iter()
            .map(|request| DurationResult {
                generation: request.generation,
                clip_id: request.clip_id,
                duration: resolve(&request.asset),
            })
            .collect();
        self.apply_durations(results)
    }

    pub fn set_bpm<F>(&mut self, bpm: f64, resolve: F) -> bool
    where
        F: Fn(&SoundAsset) -> anyhow::Result<f64> + Sync,
    {
        if !bpm.is_finite() || bpm <= 0.0 {
            log::warn!("ignoring invalid tempo {bpm}");
            return false;
        }
        self.time.bpm = bpm;
        self.recompute_durations(resolve);
        true
    }

    pub fn set_seconds_per_beat<F>(&mut self, seconds_per_beat: f64, resolve: F) -> bool
    where
        F: Fn(&SoundAsset) -> anyhow::Result<f64> + Sync,
    {
        if !seconds_per_beat.is_finite() || seconds_per_beat <= 0.0 {
            log::warn!("ignoring invalid seconds per beat {seconds_per_beat}");
            return false;
        }
        self.time.seconds_per_beat = seconds_per_beat;
        self.recompute_durations(resolve);
        true
    }

    pub fn set_time_mode<F>(&mut self, mode: TimeMode, resolve: F)
    where
        F: Fn(&SoundAsset) -> anyhow::Result<f64> + Sync,
    {
        self.time.mode = mode;
        self.recompute_durations(resolve);
    }

    pub fn toggle_time_mode<F>(&mut self, resolve: F) -> TimeMode
    where
        F: Fn(&SoundAsset) -> anyhow::Result<f64> + Sync,
    {
        let mode = self.time.mode.toggled();
        self.set_time_mode(mode, resolve);
        mode
    }

    /// Back to a single empty "Track 1" at the default tempo.
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self::new(TimeContext::default());
        self.generation = generation;
    }
}

fn sanitize_time(time: TimeContext, fallback: TimeContext) -> TimeContext {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    TimeContext {
        mode: time.mode,
        bpm: if valid(time.bpm) { time.bpm } else { fallback.bpm },
        seconds_per_beat: if valid(time.seconds_per_beat) {
            time.seconds_per_beat
        } else {
            fallback.seconds_per_beat
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_project::MemoryStore;
    use daw_transport::AssetId;
    use std::collections::HashMap;

    fn sound(id: u64, name: &str) -> Arc<SoundAsset> {
        Arc::new(SoundAsset::new(AssetId(id), name, b"RIFF".to_vec()))
    }

    /// Durations keyed by asset id.
    fn durations(table: &[(u64, f64)]) -> impl Fn(&SoundAsset) -> anyhow::Result<f64> + Sync {
        let table: HashMap<u64, f64> = table.iter().copied().collect();
        move |asset: &SoundAsset| {
            table
                .get(&asset.id.0)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("cannot decode '{}'", asset.name))
        }
    }

    fn first_track(arrangement: &Arrangement) -> TrackId {
        arrangement.tracks()[0].id
    }

    #[test]
    fn test_new_arrangement_has_one_track() {
        let arrangement = Arrangement::default();
        assert_eq!(arrangement.tracks().len(), 1);
        assert_eq!(arrangement.tracks()[0].name, "Track 1");
        assert_eq!(arrangement.time().bpm, 120.0);
    }

    #[test]
    fn test_place_and_snap_scenario() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);

        let id = arrangement
            .place_clip(sound(1, "hello"), track, 37.0, 2.0)
            .expect("place");

        let clip = arrangement.clip(id).unwrap();
        assert_eq!(clip.width, 400.0);
        assert_eq!(clip.start, 50.0);
        assert_eq!(clip.track_id, track);
    }

    #[test]
    fn test_place_rejects_nameless_sound() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);

        let result = arrangement.place_clip(sound(1, "  "), track, 0.0, 1.0);
        assert!(matches!(result, Err(PlaceError::MissingName)));
        assert_eq!(arrangement.clip_count(), 0);
    }

    #[test]
    fn test_place_on_unknown_track() {
        let mut arrangement = Arrangement::default();
        let result = arrangement.place_clip(sound(1, "a"), TrackId(0), 0.0, 1.0);
        assert!(matches!(result, Err(PlaceError::UnknownTrack(TrackId(0)))));
    }

    #[test]
    fn test_deletion_floor() {
        let mut arrangement = Arrangement::default();
        let only = first_track(&arrangement);
        assert!(arrangement.remove_track(only).is_none());
        assert_eq!(arrangement.tracks().len(), 1);

        let second = arrangement.add_track();
        assert!(arrangement.remove_track(only).is_some());
        assert!(arrangement.remove_track(second).is_none());
        assert_eq!(arrangement.tracks().len(), 1);
    }

    #[test]
    fn test_track_names_are_never_reused() {
        let mut arrangement = Arrangement::default();
        let second = arrangement.add_track();
        arrangement.add_track();
        arrangement.remove_track(second);
        arrangement.add_track();

        let names: Vec<&str> = arrangement.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Track 1", "Track 3", "Track 4"]);
    }

    #[test]
    fn test_track_ids_strictly_increase() {
        let mut arrangement = Arrangement::default();
        let mut last = first_track(&arrangement).0;
        for _ in 0..50 {
            let id = arrangement.add_track().0;
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_move_within_track_keeps_slot() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        let a = arrangement.place_clip(sound(1, "a"), track, 0.0, 1.0).unwrap();
        let b = arrangement.place_clip(sound(2, "b"), track, 400.0, 1.0).unwrap();

        assert!(arrangement.move_clip(a, track, track, 830.0, 20.0));

        let clips = arrangement.track(track).unwrap().clips();
        assert_eq!(clips[0].id, a);
        assert_eq!(clips[0].start, 800.0);
        assert_eq!(clips[1].id, b);
    }

    #[test]
    fn test_move_across_tracks_preserves_id_and_width() {
        let mut arrangement = Arrangement::default();
        let from = first_track(&arrangement);
        let to = arrangement.add_track();
        let id = arrangement.place_clip(sound(1, "a"), from, 0.0, 1.5).unwrap();

        assert!(arrangement.move_clip(id, from, to, 10.0, 40.0));

        assert!(arrangement.track(from).unwrap().clips().is_empty());
        let moved = arrangement.track(to).unwrap().clip(id).expect("moved");
        assert_eq!(moved.start, 0.0);
        assert_eq!(moved.width, 300.0);
        assert_eq!(moved.track_id, to);
    }

    #[test]
    fn test_move_unknown_clip_is_noop() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        assert!(!arrangement.move_clip(ClipId(99), track, track, 0.0, 0.0));
        assert!(!arrangement.move_clip(ClipId(99), track, TrackId(1), 0.0, 0.0));
    }

    #[test]
    fn test_mode_switch_preserves_seconds() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        arrangement.place_clip(sound(1, "a"), track, 0.0, 2.0).unwrap();
        arrangement.place_clip(sound(2, "b"), track, 100.0, 0.73).unwrap();
        let resolve = durations(&[(1, 2.0), (2, 0.73)]);

        let before: Vec<f64> = arrangement
            .clips()
            .map(|c| arrangement.time().to_seconds(c.width))
            .collect();

        arrangement.toggle_time_mode(&resolve);
        assert!(arrangement.time().mode.is_seconds());
        arrangement.set_bpm(87.0, &resolve);
        arrangement.toggle_time_mode(&resolve);

        for (clip, secs) in arrangement.clips().zip(before) {
            let now = arrangement.time().to_seconds(clip.width);
            assert!((now - secs).abs() < 1e-9, "{now} != {secs}");
        }
    }

    #[test]
    fn test_failed_decode_keeps_width() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        let id = arrangement.place_clip(sound(1, "a"), track, 0.0, 2.0).unwrap();

        let applied = arrangement.set_bpm(60.0, durations(&[]));
        assert!(applied);
        assert_eq!(arrangement.clip(id).unwrap().width, 400.0);
    }

    #[test]
    fn test_invalid_tempo_is_rejected() {
        let mut arrangement = Arrangement::default();
        assert!(!arrangement.set_bpm(0.0, durations(&[])));
        assert!(!arrangement.set_bpm(f64::NAN, durations(&[])));
        assert!(!arrangement.set_seconds_per_beat(-0.5, durations(&[])));
        assert_eq!(arrangement.time().bpm, 120.0);
    }

    #[test]
    fn test_stale_durations_are_discarded() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        let id = arrangement.place_clip(sound(1, "a"), track, 0.0, 2.0).unwrap();

        let stale = arrangement.begin_recompute();
        arrangement.set_bpm(60.0, durations(&[(1, 2.0)]));
        assert_eq!(arrangement.clip(id).unwrap().width, 200.0);

        let applied = arrangement.apply_durations(stale.into_iter().map(|r| DurationResult {
            generation: r.generation,
            clip_id: r.clip_id,
            duration: Ok(10.0),
        }));
        assert_eq!(applied, 0);
        assert_eq!(arrangement.clip(id).unwrap().width, 200.0);
    }

    #[test]
    fn test_store_round_trip() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        let second = arrangement.add_track();
        arrangement.place_clip(sound(1, "a"), track, 50.0, 1.0).unwrap();
        let b = arrangement.place_clip(sound(2, "b"), second, 250.0, 1.0).unwrap();
        arrangement.set_seconds_per_beat(0.25, durations(&[(1, 1.0), (2, 1.0)]));

        let mut store = MemoryStore::new();
        arrangement.persist_to_store(&mut store).expect("persist");
        let restored = Arrangement::load_from_store(&store).expect("restore");

        assert_eq!(restored.tracks().len(), 2);
        assert_eq!(restored.clip_count(), 2);
        assert_eq!(restored.clip(b).unwrap().start, 250.0);
        assert_eq!(restored.time().seconds_per_beat, 0.25);
        assert_eq!(restored.settings().track_name_counter, 2);
    }

    #[test]
    fn test_restored_ids_continue_after_loaded_ones() {
        let mut arrangement = Arrangement::default();
        let track = first_track(&arrangement);
        let last = arrangement.place_clip(sound(1, "a"), track, 0.0, 1.0).unwrap();

        let mut store = MemoryStore::new();
        arrangement.persist_to_store(&mut store).unwrap();
        let mut restored = Arrangement::load_from_store(&store).unwrap();

        let next = restored.place_clip(sound(1, "a"), track, 0.0, 1.0).unwrap();
        assert!(next > last);
        assert!(restored.add_track().0 > track.0);
    }

    #[test]
    fn test_reset() {
        let mut arrangement = Arrangement::default();
        arrangement.add_track();
        arrangement.set_bpm(90.0, durations(&[]));
        let generation = arrangement.generation();

        arrangement.reset();

        assert_eq!(arrangement.tracks().len(), 1);
        assert_eq!(arrangement.tracks()[0].name, "Track 1");
        assert_eq!(arrangement.time().bpm, 120.0);
        assert!(arrangement.generation() > generation);
    }
}
