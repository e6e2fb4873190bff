use crate::time::{TimeContext, TimeMode, UNITS_PER_BEAT, UNITS_PER_SECOND};

/// Grid step: a half-beat in BEAT mode, half of `seconds_per_beat` in
/// SECONDS mode.
pub fn snap_step(time: &TimeContext) -> f64 {
    match time.mode {
        TimeMode::Beat => UNITS_PER_BEAT / 2.0,
        TimeMode::Seconds => time.seconds_per_beat * UNITS_PER_SECOND / 2.0,
    }
}

/// Round `position` to the nearest grid line, never below zero.
pub fn snap(time: &TimeContext, position: f64) -> f64 {
    if !position.is_finite() {
        return 0.0;
    }
    let step = snap_step(time);
    if !step.is_finite() || step <= 0.0 {
        return position.max(0.0);
    }
    ((position / step).round() * step).max(0.0)
}
