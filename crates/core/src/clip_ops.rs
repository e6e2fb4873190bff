//! Pure functions over an arrangement, testable without audio or storage.

use crate::arrangement::Arrangement;
use daw_render::RenderClip;
use daw_transport::{AssetId, Clip};
use std::collections::HashSet;

fn has_usable_width(clip: &Clip) -> bool {
    clip.width.is_finite() && clip.width > 0.0
}

/// Clips converted to seconds under the arrangement's current time mode.
pub fn render_clips(arrangement: &Arrangement) -> Vec<RenderClip> {
    let time = arrangement.time();
    arrangement
        .clips()
        .filter(|clip| {
            let usable = has_usable_width(clip);
            if !usable {
                log::warn!("leaving clip {:?} out of the mix: invalid width", clip.id);
            }
            usable
        })
        .map(|clip| RenderClip {
            clip_id: clip.id,
            asset: clip.asset.clone(),
            start_secs: time.to_seconds(clip.start),
            duration_secs: time.to_seconds(clip.width),
        })
        .collect()
}

/// End of the last clip, in position units.
pub fn content_end(arrangement: &Arrangement) -> f64 {
    arrangement
        .clips()
        .filter(|clip| has_usable_width(clip))
        .map(Clip::end)
        .fold(0.0, f64::max)
}

pub fn content_end_secs(arrangement: &Arrangement) -> f64 {
    arrangement.time().to_seconds(content_end(arrangement))
}

/// Every asset still placed somewhere in the arrangement.
pub fn referenced_assets(arrangement: &Arrangement) -> HashSet<AssetId> {
    arrangement.clips().map(|clip| clip.asset.id).collect()
}
