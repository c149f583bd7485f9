use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::detector::{CascadeParams, FaceSelection};
use crate::error::GestureError;
use crate::gaze::EstimatorConfig;
use crate::settings::{FixationThreshold, GracePeriod, ToleranceRadius, TrackerSettings};
use crate::types::ScreenSize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub detection: DetectionConfig,
    pub estimator: EstimatorConfig,
    pub screen: ScreenConfig,
    pub logging: LoggingConfig,
}

/// Raw tracker values; validated by [`AppConfig::tracker_settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds, 0.0 to 1.0 in tenths.
    pub fixation_threshold: f32,
    pub tolerance_radius: u32,
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FaceBackend {
    Rustface,
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub backend: FaceBackend,
    /// SeetaFace cascade for the `rustface` backend.
    pub face_model: String,
    /// UltraFace model for the `onnx` backend.
    pub onnx_face_model: String,
    pub onnx_score_threshold: f32,
    pub landmark_model: String,
    pub landmark_input_size: u32,
    pub selection: FaceSelection,
    pub min_face_size: u32,
    pub score_threshold: f64,
    /// Eye crop padding as a fraction of the eye contour size.
    pub eye_padding: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fixation_threshold: 0.8,
            tolerance_radius: 400,
            grace_period_ms: 300,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let cascade = CascadeParams::default();
        Self {
            backend: FaceBackend::Rustface,
            face_model: "seeta_fd_frontal_v1.0.bin".to_string(),
            onnx_face_model: "face_detection.onnx".to_string(),
            onnx_score_threshold: 0.7,
            landmark_model: "landmarks_68.onnx".to_string(),
            landmark_input_size: 112,
            selection: FaceSelection::Largest,
            min_face_size: cascade.min_face_size,
            score_threshold: cascade.score_threshold,
            eye_padding: 0.35,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), with_target: false }
    }
}

impl DetectionConfig {
    pub fn cascade_params(&self) -> CascadeParams {
        CascadeParams {
            min_face_size: self.min_face_size,
            score_threshold: self.score_threshold,
            ..CascadeParams::default()
        }
    }
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "config.json";

    /// Reads `path` if it exists, falling back to defaults on a parse error,
    /// then writes the result back so new fields show up in the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            // Missing fields are filled from Default via #[serde(default)]
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!(path = %path.display(), "loaded configuration");
                    c
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error parsing config, using defaults");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "configuration file not found, creating default");
            Self::default()
        };

        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn tracker_settings(&self) -> Result<TrackerSettings, GestureError> {
        Ok(TrackerSettings {
            fixation_threshold: FixationThreshold::new(self.tracker.fixation_threshold)?,
            tolerance_radius: ToleranceRadius::new(self.tracker.tolerance_radius)?,
            grace_period: GracePeriod::from_millis(self.tracker.grace_period_ms)?,
        })
    }

    pub fn screen_size(&self) -> Result<ScreenSize, GestureError> {
        ScreenSize::new(self.screen.width, self.screen.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.tracker_settings().unwrap(), TrackerSettings::default());
        assert_eq!(config.detection.backend, FaceBackend::Rustface);
    }

    #[test]
    fn partial_file_keeps_defaults_and_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "tracker": { "tolerance_radius": 120 }, "detection": { "selection": "closest-to-previous" } }"#)
            .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.tracker.tolerance_radius, 120);
        assert_eq!(config.tracker.grace_period_ms, 300);
        assert_eq!(config.detection.selection, FaceSelection::ClosestToPrevious);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("grace_period_ms"));
        assert!(written.contains("estimator"));
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.tracker.tolerance_radius, 400);
        assert_eq!(config.screen.width, 1920);
    }

    #[test]
    fn out_of_range_tracker_values_are_rejected() {
        let mut config = AppConfig::default();
        config.tracker.tolerance_radius = 900;
        assert!(matches!(
            config.tracker_settings(),
            Err(GestureError::ConfigurationOutOfRange { name: "tolerance_radius", .. })
        ));
    }
}
