pub use daw_transport::DEFAULT_CLIP_WIDTH;

/// Position units per beat in BEAT mode.
pub const UNITS_PER_BEAT: f64 = 100.0;
pub const BEATS_PER_MEASURE: u32 = 4;
/// Position units per second in SECONDS mode, independent of tempo.
pub const UNITS_PER_SECOND: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    #[default]
    Beat,
    Seconds,
}

impl TimeMode {
    pub fn toggled(self) -> Self {
        match self {
            TimeMode::Beat => TimeMode::Seconds,
            TimeMode::Seconds => TimeMode::Beat,
        }
    }

    pub fn is_seconds(self) -> bool {
        matches!(self, TimeMode::Seconds)
    }
}

/// Maps position units to seconds under one set of timing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeContext {
    pub mode: TimeMode,
    pub bpm: f64,
    /// Grid spacing in SECONDS mode; never used for the position formula.
    pub seconds_per_beat: f64,
}

impl TimeContext {
    pub fn new(mode: TimeMode, bpm: f64, seconds_per_beat: f64) -> Self {
        Self {
            mode,
            bpm,
            seconds_per_beat,
        }
    }

    pub fn pixels_per_second(&self) -> f64 {
        match self.mode {
            TimeMode::Beat => self.bpm / 60.0 * UNITS_PER_BEAT,
            TimeMode::Seconds => UNITS_PER_SECOND,
        }
    }

    pub fn to_seconds(&self, position: f64) -> f64 {
        position / self.pixels_per_second()
    }

    pub fn to_position(&self, seconds: f64) -> f64 {
        seconds * self.pixels_per_second()
    }

    /// Width of a clip lasting `seconds`, or one measure when the duration is
    /// unusable.
    pub fn width_for_duration(&self, seconds: f64) -> f64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return DEFAULT_CLIP_WIDTH;
        }
        let width = self.to_position(seconds);
        if width.is_finite() && width > 0.0 {
            width
        } else {
            DEFAULT_CLIP_WIDTH
        }
    }

    pub fn beat_width(&self) -> f64 {
        match self.mode {
            TimeMode::Beat => UNITS_PER_BEAT,
            TimeMode::Seconds => self.seconds_per_beat * UNITS_PER_SECOND,
        }
    }

    pub fn measure_width(&self) -> f64 {
        self.beat_width() * BEATS_PER_MEASURE as f64
    }

    pub fn format_position(&self, position: f64) -> MusicalPosition {
        let beat_width = self.beat_width();
        let total_beats = if position.is_finite() && position > 0.0 && beat_width > 0.0 {
            position / beat_width
        } else {
            0.0
        };
        let beats_per_bar = BEATS_PER_MEASURE as f64;

        MusicalPosition {
            bar: (total_beats / beats_per_bar).floor() as u32 + 1,
            beat: (total_beats % beats_per_bar).floor() as u32 + 1,
            sub: (total_beats.fract() * 2.0).floor() as u32,
        }
    }

    /// `m:ss.t` readout of a position.
    pub fn format_seconds(&self, position: f64) -> String {
        let seconds = self.to_seconds(position);
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let tenths = (seconds * 10.0).floor() as u64;
        format!("{}:{:02}.{}", tenths / 600, (tenths / 10) % 60, tenths % 10)
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::new(TimeMode::Beat, 120.0, 0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    /// Half-beat within the beat, 0 or 1.
    pub sub: u32,
}

impl std::fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.bar, self.beat, self.sub + 1)
    }
}
