use std::fmt;
use thiserror::Error;

use crate::roi::RoiId;
use crate::types::Rect;

/// Recoverable conditions raised by the gaze core. None of them are fatal;
/// the pump keeps going and reports them to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GestureError {
    #[error("no face or landmarks found in frame")]
    DetectionMiss,

    #[error("gaze estimation failed: {0}")]
    EstimationFailure(EstimationFailure),

    #[error("unknown ROI {0}")]
    UnknownRoi(RoiId),

    #[error("{name} = {value} is outside [{min}, {max}]")]
    ConfigurationOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid ROI rectangle {0:?}")]
    InvalidRoi(Rect),

    #[error("expected 68 landmarks, got {0}")]
    IncompleteLandmarks(usize),

    #[error("invalid screen size {width}x{height}")]
    InvalidScreen { width: u32, height: u32 },

    #[error("gesture engine is no longer running")]
    Disconnected,
}

/// Why an eye pair did not yield a gaze point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimationFailure {
    /// Both eyes below the open-eye aspect ratio.
    EyesClosed,
    /// Eye crop smaller than the configured minimum.
    RegionTooSmall,
    /// Eye crop too flat to separate pupil from sclera.
    LowContrast,
    NoPupil,
}

impl fmt::Display for EstimationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EstimationFailure::EyesClosed => "eyes closed",
            EstimationFailure::RegionTooSmall => "eye region too small",
            EstimationFailure::LowContrast => "eye region has no contrast",
            EstimationFailure::NoPupil => "no pupil found",
        };
        f.write_str(s)
    }
}

impl From<EstimationFailure> for GestureError {
    fn from(reason: EstimationFailure) -> Self {
        GestureError::EstimationFailure(reason)
    }
}

pub(crate) fn out_of_range(name: &'static str, value: f64, min: f64, max: f64) -> GestureError {
    GestureError::ConfigurationOutOfRange { name, value, min, max }
}
