//! Gaze dwell activation.
//!
//! Camera frames go through face location, landmark extraction, eye region
//! resolution and gaze estimation; the resulting screen point is hit-tested
//! against the registered regions of interest, and the fixation tracker
//! turns sustained dwell into `Activated`/`Deactivated` events.

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod events;
pub mod eyes;
pub mod fixation;
pub mod gaze;
pub mod landmarks;
pub mod logging;
pub mod pipeline;
pub mod roi;
pub mod settings;
pub mod source;
pub mod types;

pub use engine::{Command, EngineHandle, EngineStats, GestureEngine, PumpReport};
pub use error::{EstimationFailure, GestureError};
pub use events::{EventDispatcher, ListenerId};
pub use fixation::{FixationEvent, FixationState, FixationStatus, FixationTracker};
pub use pipeline::{FrameOutcome, GazePipeline, Pipeline, SimulatedPipeline};
pub use roi::{Roi, RoiEvent, RoiId, RoiManager, ScreenProvider, SharedScreen};
pub use settings::{FixationThreshold, GracePeriod, ToleranceRadius, TrackerSettings};
pub use source::{FrameSource, FrameSourceError, ImageSequenceSource};
pub use types::{Frame, GazePoint, Rect, ScreenSize};
