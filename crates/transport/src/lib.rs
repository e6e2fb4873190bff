mod audio;

use std::collections::BTreeSet;
use std::sync::Arc;

pub use audio::{AudioArc, AudioBuffer, resample_audio_arc};

/// Width given to a clip whose real duration is unknown: one 4/4 measure
/// at 100 units per beat.
pub const DEFAULT_CLIP_WIDTH: f64 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

/// Handle for one clip sounding on a [`VoiceSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// An immutable recorded or uploaded sound.
///
/// `pcm` holds the encoded bytes (usually a WAV file). Decoding happens on
/// demand through `daw_decode`; the asset itself is never mutated once created
/// and is shared by every clip that places it.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundAsset {
    pub id: AssetId,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub duration_seconds: Option<f64>,
    pub pcm: Arc<[u8]>,
    /// Milliseconds since the unix epoch.
    pub created_at: Option<u64>,
}

impl SoundAsset {
    pub fn new(id: AssetId, name: impl Into<String>, pcm: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            name: name.into(),
            tags: BTreeSet::new(),
            duration_seconds: None,
            pcm: pcm.into(),
            created_at: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(Into::into)
            .map(|tag: String| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
        self
    }

    /// A clip may only reference an asset that has an identity and audio.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.pcm.is_empty()
    }
}

/// A placement of one sound on one track.
///
/// `start` and `width` are position units, not seconds: the mapping depends on
/// the arrangement's time mode, so `width` is rewritten whenever the mode or
/// tempo changes.
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: ClipId,
    pub asset: Arc<SoundAsset>,
    pub track_id: TrackId,
    pub start: f64,
    pub width: f64,
}

impl Clip {
    pub fn end(&self) -> f64 {
        self.start + self.width
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Insertion order. Clips may overlap; only playback and mixdown collapse them.
    clips: Vec<Clip>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            clips: Vec::new(),
        }
    }

    /// Build a track, dropping clips whose asset is invalid.
    pub fn from_clips(id: TrackId, name: impl Into<String>, clips: Vec<Clip>) -> Self {
        let mut track = Self::new(id, name);
        for clip in clips {
            track.push_clip(clip);
        }
        track
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == id)
    }

    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|clip| clip.id == id)
    }

    pub fn clips_mut(&mut self) -> impl Iterator<Item = &mut Clip> {
        self.clips.iter_mut()
    }

    /// Append a clip. Returns `false` (and drops the clip) when its asset is invalid.
    pub fn push_clip(&mut self, mut clip: Clip) -> bool {
        if !clip.asset.is_valid() {
            log::warn!(
                "dropping clip {:?} on track {:?}: sound asset has no name or audio",
                clip.id,
                self.id
            );
            return false;
        }
        clip.track_id = self.id;
        self.clips.push(clip);
        true
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Option<Clip> {
        let index = self.clips.iter().position(|clip| clip.id == id)?;
        Some(self.clips.remove(index))
    }

    pub fn clear_clips(&mut self) {
        self.clips.clear();
    }
}

/// Output side of real-time playback.
///
/// The transport decides *when* a clip sounds; a sink only starts and stops
/// voices. Stopping an unknown or already-finished voice must be a no-op.
pub trait VoiceSink {
    /// Start `audio` immediately, skipping the first `offset_secs` of it.
    fn start_voice(&mut self, voice: VoiceId, audio: AudioArc, offset_secs: f64)
    -> anyhow::Result<()>;

    fn stop_voice(&mut self, voice: VoiceId);

    fn stop_all(&mut self);

    /// Voices that reached the end of their audio since the last call.
    fn finished_voices(&mut self) -> Vec<VoiceId>;

    /// Release the output device. Further calls must be harmless.
    fn close(&mut self);
}
