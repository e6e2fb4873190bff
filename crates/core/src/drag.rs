//! Pointer gestures turned into store mutations.
//!
//! A gesture is owned by exactly one [`DragSession`] inside the controller.
//! Nothing touches the arrangement until the drop, and every terminal
//! transition goes through [`DragController::cleanup`].

use crate::arrangement::{Arrangement, PlaceError};
use crate::snap::snap;
use crate::time::TimeContext;
use daw_transport::{Clip, ClipId, SoundAsset, TrackId};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragConfig {
    /// Movement, on either axis, before a press becomes a drag.
    pub threshold: f64,
    /// Minimum interval between preview recomputes.
    pub throttle: Duration,
    /// A gesture older than this is force-cleaned.
    pub watchdog: Duration,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            threshold: 15.0,
            throttle: Duration::from_millis(16),
            watchdog: Duration::from_secs(10),
        }
    }
}

/// What is being dragged.
#[derive(Debug, Clone)]
pub enum DragSource {
    /// A sound from the catalog, not yet on the timeline.
    NewSound {
        asset: Arc<SoundAsset>,
        duration_secs: f64,
    },
    /// A clip already on a track.
    Clip {
        clip_id: ClipId,
        from_track: TrackId,
        width: f64,
    },
}

impl DragSource {
    fn width(&self, time: &TimeContext) -> f64 {
        match self {
            DragSource::NewSound { duration_secs, .. } => time.width_for_duration(*duration_secs),
            DragSource::Clip { width, .. } => *width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragPreview {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    /// Track under the pointer, if any.
    pub track_id: Option<TrackId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Armed,
    Dragging,
}

#[derive(Debug)]
pub enum DropOutcome {
    /// No gesture was in progress.
    Idle,
    /// Released before the threshold was crossed.
    Tap,
    /// Released outside any track.
    Cancelled,
    Placed(ClipId),
    Moved(ClipId),
    Rejected(PlaceError),
    /// The dragged clip no longer exists where it was picked up.
    Stale,
}

impl DropOutcome {
    pub fn mutated(&self) -> bool {
        matches!(self, DropOutcome::Placed(_) | DropOutcome::Moved(_))
    }
}

#[derive(Debug)]
struct DragSession {
    source: DragSource,
    origin: (f64, f64),
    grab_offset: f64,
    pressed_at: Instant,
    dragging: bool,
    preview: Option<DragPreview>,
    previewed_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct DragController {
    config: DragConfig,
    session: Option<DragSession>,
}

impl DragController {
    pub fn new(config: DragConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &DragConfig {
        &self.config
    }

    pub fn state(&self) -> DragState {
        match &self.session {
            None => DragState::Idle,
            Some(session) if session.dragging => DragState::Dragging,
            Some(_) => DragState::Armed,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn preview(&self) -> Option<&DragPreview> {
        self.session.as_ref()?.preview.as_ref()
    }

    /// The existing clip being dragged, if the gesture is a move.
    pub fn dragged_clip(&self) -> Option<ClipId> {
        match self.session.as_ref()?.source {
            DragSource::Clip { clip_id, .. } => Some(clip_id),
            DragSource::NewSound { .. } => None,
        }
    }

    pub fn press(&mut self, source: DragSource, x: f64, y: f64, grab_offset: f64, now: Instant) {
        if self.session.is_some() {
            log::debug!("new press while a gesture was active, discarding it");
            self.cleanup();
        }
        self.session = Some(DragSession {
            source,
            origin: (x, y),
            grab_offset: if grab_offset.is_finite() { grab_offset } else { 0.0 },
            pressed_at: now,
            dragging: false,
            preview: None,
            previewed_at: None,
        });
    }

    /// Track the pointer. Returns the current preview once dragging.
    pub fn pointer_move(
        &mut self,
        x: f64,
        y: f64,
        target: Option<TrackId>,
        time: &TimeContext,
        now: Instant,
    ) -> Option<&DragPreview> {
        let threshold = self.config.threshold;
        let throttle = self.config.throttle;
        let session = self.session.as_mut()?;

        if !session.dragging {
            let (ox, oy) = session.origin;
            if (x - ox).abs() <= threshold && (y - oy).abs() <= threshold {
                return None;
            }
            session.dragging = true;
            log::debug!("drag started");
        }

        let due = session
            .previewed_at
            .is_none_or(|at| now.saturating_duration_since(at) >= throttle);
        if due {
            session.preview = Some(DragPreview {
                left: snap(time, x - session.grab_offset),
                top: y,
                width: session.source.width(time),
                track_id: target,
            });
            session.previewed_at = Some(now);
        }

        session.preview.as_ref()
    }

    /// Finish the gesture. Only a drag released over a track mutates the
    /// arrangement.
    pub fn drop(&mut self, x: f64, target: Option<TrackId>, arrangement: &mut Arrangement) -> DropOutcome {
        let Some(session) = self.session.take() else {
            return DropOutcome::Idle;
        };
        if !session.dragging {
            return DropOutcome::Tap;
        }
        let Some(track_id) = target else {
            log::debug!("drag released outside any track");
            return DropOutcome::Cancelled;
        };

        match session.source {
            DragSource::NewSound {
                asset,
                duration_secs,
            } => match arrangement.place_clip(asset, track_id, x - session.grab_offset, duration_secs) {
                Ok(id) => DropOutcome::Placed(id),
                Err(e) => DropOutcome::Rejected(e),
            },
            DragSource::Clip {
                clip_id,
                from_track,
                ..
            } => {
                if arrangement.move_clip(clip_id, from_track, track_id, x, session.grab_offset) {
                    DropOutcome::Moved(clip_id)
                } else {
                    DropOutcome::Stale
                }
            }
        }
    }

    /// Abandon the gesture without touching the arrangement. Returns whether
    /// one was active.
    pub fn cancel(&mut self) -> bool {
        let active = self.is_active();
        self.cleanup();
        active
    }

    /// Clear every piece of gesture state. Safe to call at any time.
    pub fn cleanup(&mut self) {
        self.session = None;
    }

    /// Force-clean a gesture that has outlived the watchdog.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.pressed_at) >= self.config.watchdog);
        if expired {
            log::warn!("drag gesture timed out, cleaning up");
            self.cleanup();
        }
        expired
    }

    /// Delete a clip, first abandoning any gesture that is dragging it.
    pub fn remove_clip(
        &mut self,
        track_id: TrackId,
        clip_id: ClipId,
        arrangement: &mut Arrangement,
    ) -> Option<Clip> {
        if self.dragged_clip() == Some(clip_id) {
            self.cleanup();
        }
        arrangement.remove_clip(track_id, clip_id)
    }
}
