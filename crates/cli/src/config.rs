use daw_core::{DragConfig, SessionConfig, TimeContext, TimeMode};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub bpm: f64,
    pub seconds_per_beat: f64,
    pub seconds_mode: bool,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        let time = TimeContext::default();
        Self {
            bpm: time.bpm,
            seconds_per_beat: time.seconds_per_beat,
            seconds_mode: time.mode.is_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DragSettings {
    pub threshold: f64,
    pub throttle_ms: u64,
    pub watchdog_ms: u64,
}

impl Default for DragSettings {
    fn default() -> Self {
        let drag = DragConfig::default();
        Self {
            threshold: drag.threshold,
            throttle_ms: drag.throttle.as_millis() as u64,
            watchdog_ms: drag.watchdog.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Where the auto-save and sound catalog live. Defaults to the user data dir.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timeline: TimelineConfig,
    pub drag: DragSettings,
    pub store: StoreConfig,
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("daw").join("config.toml"))
    }

    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring invalid config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("daw")
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mode = if self.timeline.seconds_mode {
            TimeMode::Seconds
        } else {
            TimeMode::Beat
        };
        let defaults = TimeContext::default();
        SessionConfig {
            time: TimeContext::new(
                mode,
                positive_or(self.timeline.bpm, defaults.bpm),
                positive_or(self.timeline.seconds_per_beat, defaults.seconds_per_beat),
            ),
            drag: DragConfig {
                threshold: self.drag.threshold,
                throttle: Duration::from_millis(self.drag.throttle_ms),
                watchdog: Duration::from_millis(self.drag.watchdog_ms),
            },
            export_sample_rate: daw_core::EXPORT_SAMPLE_RATE,
        }
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        log::warn!("ignoring configured value {value}, using {fallback}");
        fallback
    }
}
