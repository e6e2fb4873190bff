use std::collections::{HashMap, HashSet};

use daw_transport::{AssetId, AudioArc, SoundAsset};

/// Decoded audio keyed by sound asset.
///
/// Each asset is decoded at most once while it is referenced; callers evict
/// entries once no clip uses the asset anymore so decoded buffers do not
/// outlive their clips.
#[derive(Debug, Default)]
pub struct AudioCache {
    entries: HashMap<AssetId, AudioArc>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AssetId) -> Option<AudioArc> {
        self.entries.get(&id).cloned()
    }

    pub fn get_or_decode(&mut self, asset: &SoundAsset) -> anyhow::Result<AudioArc> {
        if let Some(audio) = self.entries.get(&asset.id) {
            return Ok(audio.clone());
        }
        let audio = crate::decode_bytes(&asset.pcm)
            .map_err(|e| anyhow::anyhow!("failed to decode '{}': {e}", asset.name))?;
        self.entries.insert(asset.id, audio.clone());
        Ok(audio)
    }

    pub fn insert(&mut self, id: AssetId, audio: AudioArc) {
        self.entries.insert(id, audio);
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop every entry whose asset is not in `live`. Returns how many were dropped.
    pub fn retain_assets(&mut self, live: &HashSet<AssetId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| live.contains(id));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
