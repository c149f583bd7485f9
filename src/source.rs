use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::Frame;

/// Failures of whatever supplies frames. Only `Timeout` is survivable; the
/// engine treats it as a dropped frame.
#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("timed out waiting for a frame")]
    Timeout,

    #[error("frame source disconnected: {0}")]
    Disconnected(String),

    #[error("frame source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode frame: {0}")]
    Image(#[from] image::ImageError),
}

/// Supplies frames in capture order. `Ok(None)` ends the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays a directory of still frames in file-name order, stamping them at
/// a fixed frame interval.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    interval: Duration,
    crop_margin: f32,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, fps: f32) -> Result<Self, FrameSourceError> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let interval = Duration::from_nanos((1e9 / fps.max(0.1) as f64).round() as u64);
        info!(dir = %dir.display(), frames = paths.len(), interval_ms = interval.as_millis() as u64, "replaying frames");
        Ok(Self { paths, next: 0, interval, crop_margin: 0.0 })
    }

    /// Keep only the centre of every frame, dropping `margin` of the width
    /// and height on each side (recordings are often wider than the face).
    pub fn with_center_crop(mut self, margin: f32) -> Self {
        self.crop_margin = margin.clamp(0.0, 0.45);
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn crop(&self, image: RgbImage) -> RgbImage {
        if self.crop_margin <= 0.0 {
            return image;
        }
        let (w, h) = image.dimensions();
        let mx = (w as f32 * self.crop_margin) as u32;
        let my = (h as f32 * self.crop_margin) as u32;
        image::imageops::crop_imm(&image, mx, my, w - 2 * mx, h - 2 * my).to_image()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;

        let image = image::open(path)?.to_rgb8();
        debug!(path = %path.display(), index, "frame loaded");
        let timestamp = self.interval * index as u32;
        Ok(Some(Frame::new(self.crop(image), timestamp)))
    }
}
