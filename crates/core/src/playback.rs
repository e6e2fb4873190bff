//! The transport: play, pause, stop and seek over a wall-clock anchor.
//!
//! Position is never accumulated. Every tick derives it from the time elapsed
//! since the anchor, so irregular tick intervals cannot drift it. Each clip
//! due to sound is scheduled independently and owns one voice on the sink.

use crate::arrangement::Arrangement;
use crate::time::TimeContext;
use daw_transport::{AudioArc, ClipId, SoundAsset, VoiceId, VoiceSink};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// Wall-clock instant at which the timeline stood at `secs`.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    at: Instant,
    secs: f64,
}

impl Anchor {
    fn secs_at(&self, now: Instant) -> f64 {
        self.secs + now.saturating_duration_since(self.at).as_secs_f64()
    }
}

#[derive(Debug)]
struct ScheduledClip {
    voice: VoiceId,
    start_secs: f64,
    audio: AudioArc,
    sounding: bool,
}

#[derive(Debug)]
pub struct Transport {
    state: PlaybackState,
    /// Position units.
    position: f64,
    time: TimeContext,
    anchor: Option<Anchor>,
    scheduled: HashMap<ClipId, ScheduledClip>,
    next_voice: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: 0.0,
            time: TimeContext::default(),
            anchor: None,
            scheduled: HashMap::new(),
            next_voice: 1,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn position_secs(&self) -> f64 {
        self.time.to_seconds(self.position)
    }

    /// Clips waiting to start or still sounding.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    pub fn sounding_count(&self) -> usize {
        self.scheduled.values().filter(|s| s.sounding).count()
    }

    /// A voice id no scheduled clip will ever use. Other voices sharing the
    /// sink, like a sound preview, take theirs from here.
    pub fn allocate_voice(&mut self) -> VoiceId {
        let voice = VoiceId(self.next_voice);
        self.next_voice += 1;
        voice
    }

    /// Start playback from the current position. Returns how many clips were
    /// scheduled.
    pub fn play<F>(
        &mut self,
        now: Instant,
        arrangement: &Arrangement,
        mut decode: F,
        sink: &mut dyn VoiceSink,
    ) -> usize
    where
        F: FnMut(&SoundAsset) -> anyhow::Result<AudioArc>,
    {
        if self.state.is_playing() {
            return self.scheduled.len();
        }

        self.time = *arrangement.time();
        let current = self.time.to_seconds(self.position);
        self.anchor = Some(Anchor {
            at: now,
            secs: current,
        });

        for clip in arrangement.clips() {
            if !clip.width.is_finite() || clip.width <= 0.0 {
                log::warn!("not scheduling clip {:?}: invalid width {}", clip.id, clip.width);
                continue;
            }
            let start_secs = self.time.to_seconds(clip.start);
            let end_secs = start_secs + self.time.to_seconds(clip.width);
            if end_secs <= current {
                continue;
            }

            let audio = match decode(&clip.asset) {
                Ok(audio) => audio,
                Err(e) => {
                    log::warn!("not scheduling clip {:?} ('{}'): {e}", clip.id, clip.asset.name);
                    continue;
                }
            };

            let voice = self.allocate_voice();
            log::debug!(
                "scheduled clip {:?} in {:.3}s",
                clip.id,
                (start_secs - current).max(0.0)
            );
            self.scheduled.insert(
                clip.id,
                ScheduledClip {
                    voice,
                    start_secs,
                    audio,
                    sounding: false,
                },
            );
        }

        self.state = PlaybackState::Playing;
        self.tick(now, sink);
        self.scheduled.len()
    }

    /// Advance to `now`: re-derive the position, start clips that are due and
    /// release clips that finished.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn VoiceSink) -> f64 {
        let Some(anchor) = self.anchor.filter(|_| self.state.is_playing()) else {
            return self.position;
        };
        let secs = anchor.secs_at(now);
        self.position = self.time.to_position(secs);

        let mut dropped = Vec::new();
        for (clip_id, scheduled) in self.scheduled.iter_mut() {
            if scheduled.sounding || scheduled.start_secs > secs {
                continue;
            }
            // A late tick, or playback starting inside the clip, starts the
            // audio part-way through so it stays aligned with the clock.
            let offset = secs - scheduled.start_secs;
            if offset >= scheduled.audio.duration_secs() {
                dropped.push(*clip_id);
                continue;
            }
            match sink.start_voice(scheduled.voice, scheduled.audio.clone(), offset) {
                Ok(()) => scheduled.sounding = true,
                Err(e) => {
                    log::warn!("could not start clip {clip_id:?}: {e}");
                    dropped.push(*clip_id);
                }
            }
        }
        for clip_id in dropped {
            self.scheduled.remove(&clip_id);
        }

        let finished = sink.finished_voices();
        if !finished.is_empty() {
            self.scheduled.retain(|_, s| !finished.contains(&s.voice));
        }

        self.position
    }

    /// Halt at the current position, silencing everything before returning.
    pub fn pause(&mut self, now: Instant, sink: &mut dyn VoiceSink) {
        if !self.state.is_playing() {
            return;
        }
        if let Some(anchor) = self.anchor {
            self.position = self.time.to_position(anchor.secs_at(now));
        }
        self.release_all(sink);
        self.state = PlaybackState::Paused;
    }

    pub fn stop(&mut self, sink: &mut dyn VoiceSink) {
        self.release_all(sink);
        self.position = 0.0;
        self.state = PlaybackState::Stopped;
    }

    /// Jump to `position`. While playing, the anchor moves and every clip is
    /// rescheduled from there.
    pub fn seek<F>(
        &mut self,
        position: f64,
        now: Instant,
        arrangement: &Arrangement,
        decode: F,
        sink: &mut dyn VoiceSink,
    ) where
        F: FnMut(&SoundAsset) -> anyhow::Result<AudioArc>,
    {
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        if self.state.is_playing() {
            self.release_all(sink);
            self.state = PlaybackState::Paused;
            self.position = position;
            self.play(now, arrangement, decode, sink);
        } else {
            self.position = position;
        }
    }

    /// Silence and forget one clip, e.g. because it was deleted.
    pub fn cancel_clip(&mut self, clip_id: ClipId, sink: &mut dyn VoiceSink) {
        if let Some(scheduled) = self.scheduled.remove(&clip_id) {
            if scheduled.sounding {
                sink.stop_voice(scheduled.voice);
            }
        }
    }

    fn release_all(&mut self, sink: &mut dyn VoiceSink) {
        if !self.scheduled.is_empty() {
            sink.stop_all();
        }
        self.scheduled.clear();
        self.anchor = None;
    }
}
