//! Validated runtime parameters for hit testing and dwell tracking.
//!
//! Every setter goes through one of these constructors, so an out-of-range
//! value is rejected at the boundary and whatever was in effect stays put.

use std::time::Duration;

use crate::error::{out_of_range, GestureError};

/// Dwell needed to activate an ROI: 0.0 to 1.0 seconds in tenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixationThreshold {
    tenths: u8,
}

impl FixationThreshold {
    pub const MAX_TENTHS: u8 = 10;

    /// Seconds, rounded to the nearest tenth.
    pub fn new(seconds: f32) -> Result<Self, GestureError> {
        if !seconds.is_finite() || !(0.0..=1.0 + 1e-6).contains(&seconds) {
            return Err(out_of_range("fixation_threshold", seconds as f64, 0.0, 1.0));
        }
        Ok(Self { tenths: (seconds * 10.0).round() as u8 })
    }

    /// Slider position 0..=10.
    pub fn from_slider(position: u8) -> Result<Self, GestureError> {
        if position > Self::MAX_TENTHS {
            return Err(out_of_range("fixation_threshold", position as f64 / 10.0, 0.0, 1.0));
        }
        Ok(Self { tenths: position })
    }

    pub fn seconds(&self) -> f32 {
        self.tenths as f32 / 10.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.tenths as u64 * 100)
    }
}

impl Default for FixationThreshold {
    fn default() -> Self {
        Self { tenths: 8 }
    }
}

/// Pixel slack added around every ROI when hit testing, 1..=500.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToleranceRadius(u32);

impl ToleranceRadius {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 500;

    pub fn new(pixels: u32) -> Result<Self, GestureError> {
        if !(Self::MIN..=Self::MAX).contains(&pixels) {
            return Err(out_of_range(
                "tolerance_radius",
                pixels as f64,
                Self::MIN as f64,
                Self::MAX as f64,
            ));
        }
        Ok(Self(pixels))
    }

    pub fn pixels(&self) -> u32 {
        self.0
    }
}

impl Default for ToleranceRadius {
    fn default() -> Self {
        Self(400)
    }
}

/// How long gaze may stay off an ROI before its dwell is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GracePeriod(Duration);

impl GracePeriod {
    pub const MAX_MS: u64 = 5_000;

    pub fn from_millis(ms: u64) -> Result<Self, GestureError> {
        if ms > Self::MAX_MS {
            return Err(out_of_range("grace_period_ms", ms as f64, 0.0, Self::MAX_MS as f64));
        }
        Ok(Self(Duration::from_millis(ms)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for GracePeriod {
    fn default() -> Self {
        Self(Duration::from_millis(300))
    }
}

/// The three knobs the tracker reads on every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackerSettings {
    pub fixation_threshold: FixationThreshold,
    pub tolerance_radius: ToleranceRadius,
    pub grace_period: GracePeriod,
}
