//! The sound catalog: every recorded or uploaded sound, stored as one JSON
//! array under [`CATALOG_KEY`].

use crate::{CATALOG_KEY, KeyValueStore, ProjectError, SoundData, sound_from_data, sound_to_data};
use daw_transport::{AssetId, SoundAsset};
use std::collections::HashSet;
use std::sync::Arc;

/// Read the catalog, dropping entries that cannot be restored.
///
/// When anything was dropped the cleaned list is written back, so a corrupt
/// entry is only reported once.
pub fn load_catalog(store: &mut dyn KeyValueStore) -> Vec<Arc<SoundAsset>> {
    let Some(raw) = store.get(CATALOG_KEY) else {
        return Vec::new();
    };

    let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("sound catalog is unreadable, starting empty: {e}");
            return Vec::new();
        }
    };

    let mut sounds = Vec::with_capacity(entries.len());
    let mut kept = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;

    for entry in entries {
        let restored = serde_json::from_value::<SoundData>(entry.clone())
            .map_err(anyhow::Error::from)
            .and_then(|data| sound_from_data(&data));
        match restored {
            Ok(sound) => {
                sounds.push(Arc::new(sound));
                kept.push(entry);
            }
            Err(e) => {
                log::warn!("removing invalid catalog entry: {e}");
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        let cleaned = serde_json::to_string(&kept)
            .map_err(ProjectError::from)
            .and_then(|json| Ok(store.set(CATALOG_KEY, json)?));
        match cleaned {
            Ok(()) => log::info!("removed {dropped} invalid catalog entries"),
            Err(e) => log::warn!("could not write cleaned catalog: {e}"),
        }
    }

    sounds
}

pub fn store_catalog(
    store: &mut dyn KeyValueStore,
    sounds: &[Arc<SoundAsset>],
) -> Result<(), ProjectError> {
    let records: Vec<SoundData> = sounds.iter().map(|sound| sound_to_data(sound)).collect();
    let json = serde_json::to_string(&records)?;
    store.set(CATALOG_KEY, json)?;
    Ok(())
}

/// `name` itself when free, otherwise `"name (n)"` with the smallest free `n >= 1`.
pub fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name} ({n})"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Prepare sounds from a project file for adding to `existing`.
///
/// Colliding names are suffixed and every incoming sound is renumbered after
/// the largest id already in use, so neither names nor ids clash.
pub fn merge_sounds(
    existing: &[Arc<SoundAsset>],
    incoming: Vec<SoundAsset>,
) -> Vec<Arc<SoundAsset>> {
    let mut taken: HashSet<String> = existing.iter().map(|s| s.name.clone()).collect();
    let max_id = existing.iter().map(|s| s.id.0).max().unwrap_or(0);

    incoming
        .into_iter()
        .enumerate()
        .map(|(index, mut sound)| {
            let name = unique_name(&sound.name, &taken);
            if name != sound.name {
                log::info!("renamed imported sound '{}' to '{name}'", sound.name);
            }
            taken.insert(name.clone());
            sound.name = name;
            sound.id = AssetId(max_id + index as u64 + 1);
            Arc::new(sound)
        })
        .collect()
}
