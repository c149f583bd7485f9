use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

use crate::error::EstimationFailure;
use crate::eyes::eye_aspect_ratio;
use crate::types::{EyeRegion, GazePoint, Point2D, Rect};

/// Turns the two eye regions of a frame into one normalised screen point.
///
/// A failure means "no sample for this frame": callers must not substitute
/// a default or stale point.
pub trait GazeEstimator {
    fn name(&self) -> String;

    fn estimate(
        &mut self,
        frame: &GrayImage,
        left: &EyeRegion,
        right: &EyeRegion,
        timestamp: Duration,
    ) -> Result<GazePoint, EstimationFailure>;

    /// Forget any temporal state (called when the face is lost).
    fn reset(&mut self) {}
}

// =========================================================================
// Smoothing Helper (Exponential Moving Average)
// =========================================================================
pub struct Smoothing {
    x: f32,
    y: f32,
    alpha: f32,
    initialized: bool,
}

impl Smoothing {
    pub fn new(alpha: f32) -> Self {
        Self { x: 0.0, y: 0.0, alpha: alpha.clamp(0.01, 1.0), initialized: false }
    }

    pub fn filter(&mut self, x: f32, y: f32) -> (f32, f32) {
        if !self.initialized {
            self.x = x;
            self.y = y;
            self.initialized = true;
            return (x, y);
        }
        self.x = self.alpha * x + (1.0 - self.alpha) * self.x;
        self.y = self.alpha * y + (1.0 - self.alpha) * self.y;
        (self.x, self.y)
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

// =========================================================================
// Pupil Gaze (darkest blob inside each eye region)
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Eye aspect ratio below which an eye counts as closed.
    pub closed_eye_ratio: f32,
    /// Smallest usable eye crop, in pixels per side.
    pub min_region_px: u32,
    /// Smallest luma spread inside the crop.
    pub min_contrast: u8,
    /// Luma above the darkest pixel still counted as pupil.
    pub darkness_margin: u8,
    pub gain_x: f32,
    pub gain_y: f32,
    /// Frames are raw camera images, so an image-right pupil shift is a
    /// look toward screen-left.
    pub mirror: bool,
    /// EMA weight of the newest estimate; 1.0 disables smoothing.
    pub smoothing: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            closed_eye_ratio: 0.18,
            min_region_px: 6,
            min_contrast: 12,
            darkness_margin: 30,
            gain_x: 1.5,
            gain_y: 2.5,
            mirror: true,
            smoothing: 0.4,
        }
    }
}

/// Uncalibrated estimator: each open eye's pupil offset from its contour
/// centre (normalised by eye size) is averaged and mapped linearly around
/// the screen centre.
pub struct PupilGazeEstimator {
    config: EstimatorConfig,
    smoothing: Smoothing,
}

impl PupilGazeEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let smoothing = Smoothing::new(config.smoothing);
        Self { config, smoothing }
    }

    /// Pupil offset in `[-1, 1]²` relative to the eye centre.
    fn eye_offset(&self, frame: &GrayImage, eye: &EyeRegion) -> Result<(f32, f32), EstimationFailure> {
        if eye_aspect_ratio(&eye.landmarks) < self.config.closed_eye_ratio {
            return Err(EstimationFailure::EyesClosed);
        }

        let frame_rect = Rect::new(0.0, 0.0, frame.width() as f32, frame.height() as f32);
        let b = eye.bounds.intersect(&frame_rect).ok_or(EstimationFailure::RegionTooSmall)?;

        let x0 = b.x.floor() as u32;
        let y0 = b.y.floor() as u32;
        let w = (b.width as u32).min(frame.width().saturating_sub(x0));
        let h = (b.height as u32).min(frame.height().saturating_sub(y0));
        if w < self.config.min_region_px || h < self.config.min_region_px {
            return Err(EstimationFailure::RegionTooSmall);
        }

        let eye_width = eye.landmarks[0].distance(&eye.landmarks[3]);
        if eye_width < 1.0 {
            return Err(EstimationFailure::RegionTooSmall);
        }

        // Pass 1: luma range
        let mut min_val = u8::MAX;
        let mut max_val = u8::MIN;
        for dy in 0..h {
            for dx in 0..w {
                let luma = frame.get_pixel(x0 + dx, y0 + dy)[0];
                min_val = min_val.min(luma);
                max_val = max_val.max(luma);
            }
        }
        if max_val - min_val < self.config.min_contrast {
            return Err(EstimationFailure::LowContrast);
        }

        // Pass 2: centroid of dark pixels, weighted by darkness
        let threshold = min_val.saturating_add(self.config.darkness_margin);
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut count = 0.0;
        for dy in 0..h {
            for dx in 0..w {
                let luma = frame.get_pixel(x0 + dx, y0 + dy)[0];
                if luma <= threshold {
                    let weight = (threshold - luma) as f32;
                    sum_x += dx as f32 * weight;
                    sum_y += dy as f32 * weight;
                    count += weight;
                }
            }
        }
        if count <= 0.0 {
            return Err(EstimationFailure::NoPupil);
        }

        let pupil = Point2D::new(x0 as f32 + sum_x / count, y0 as f32 + sum_y / count);
        let center = Point2D::mean(&eye.landmarks);
        let half_w = eye_width / 2.0;
        let half_h = (h as f32 / 2.0).max(1.0);

        let ox = ((pupil.x - center.x) / half_w).clamp(-1.0, 1.0);
        let oy = ((pupil.y - center.y) / half_h).clamp(-1.0, 1.0);
        trace!(side = ?eye.side, ox, oy, "pupil offset");
        Ok((ox, oy))
    }
}

impl GazeEstimator for PupilGazeEstimator {
    fn name(&self) -> String {
        "Pupil Gaze (darkest blob)".to_string()
    }

    fn estimate(
        &mut self,
        frame: &GrayImage,
        left: &EyeRegion,
        right: &EyeRegion,
        timestamp: Duration,
    ) -> Result<GazePoint, EstimationFailure> {
        let mut offsets = Vec::with_capacity(2);
        let mut first_failure = None;

        // A wink leaves one usable eye; only both failing drops the frame.
        for eye in [left, right] {
            match self.eye_offset(frame, eye) {
                Ok(o) => offsets.push(o),
                Err(e) => {
                    first_failure.get_or_insert(e);
                }
            }
        }

        if offsets.is_empty() {
            return Err(first_failure.unwrap_or(EstimationFailure::NoPupil));
        }

        let n = offsets.len() as f32;
        let ax = offsets.iter().map(|o| o.0).sum::<f32>() / n;
        let ay = offsets.iter().map(|o| o.1).sum::<f32>() / n;

        let dir = if self.config.mirror { -1.0 } else { 1.0 };
        let x = 0.5 + dir * ax * self.config.gain_x;
        let y = 0.5 + ay * self.config.gain_y;

        let (sx, sy) = self.smoothing.filter(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0));
        GazePoint::new(sx, sy, timestamp).ok_or(EstimationFailure::NoPupil)
    }

    fn reset(&mut self) {
        self.smoothing.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eyes::tests::eye_contour;
    use crate::types::EyeSide;
    use image::Luma;

    fn blank(value: u8) -> GrayImage {
        GrayImage::from_pixel(320, 240, Luma([value]))
    }

    fn draw_pupil(img: &mut GrayImage, cx: i32, cy: i32) {
        for y in (cy - 4)..=(cy + 4) {
            for x in (cx - 4)..=(cx + 4) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= 16 {
                    img.put_pixel(x as u32, y as u32, Luma([20]));
                }
            }
        }
    }

    fn region(side: EyeSide, cx: f32, cy: f32, lid: f32) -> EyeRegion {
        EyeRegion {
            side,
            bounds: Rect::new(cx - 28.0, cy - 16.0, 56.0, 32.0),
            landmarks: eye_contour(cx, cy, lid),
        }
    }

    fn unsmoothed() -> PupilGazeEstimator {
        PupilGazeEstimator::new(EstimatorConfig { smoothing: 1.0, ..Default::default() })
    }

    #[test]
    fn centred_pupils_map_to_screen_centre() {
        let mut img = blank(200);
        draw_pupil(&mut img, 100, 120);
        draw_pupil(&mut img, 200, 120);

        let p = unsmoothed()
            .estimate(
                &img,
                &region(EyeSide::Left, 100.0, 120.0, 8.0),
                &region(EyeSide::Right, 200.0, 120.0, 8.0),
                Duration::from_millis(40),
            )
            .unwrap();

        assert!((p.x - 0.5).abs() < 1e-4);
        assert!((p.y - 0.5).abs() < 1e-4);
        assert_eq!(p.timestamp, Duration::from_millis(40));
    }

    #[test]
    fn image_right_shift_looks_screen_left_when_mirrored() {
        let mut img = blank(200);
        draw_pupil(&mut img, 104, 120);
        draw_pupil(&mut img, 204, 120);

        let left = region(EyeSide::Left, 100.0, 120.0, 8.0);
        let right = region(EyeSide::Right, 200.0, 120.0, 8.0);

        let mirrored = unsmoothed().estimate(&img, &left, &right, Duration::ZERO).unwrap();
        assert!(mirrored.x < 0.5);

        let mut plain = PupilGazeEstimator::new(EstimatorConfig {
            smoothing: 1.0,
            mirror: false,
            ..Default::default()
        });
        assert!(plain.estimate(&img, &left, &right, Duration::ZERO).unwrap().x > 0.5);
    }

    #[test]
    fn closed_eyes_are_a_distinct_failure() {
        let img = blank(200);
        let err = unsmoothed()
            .estimate(
                &img,
                &region(EyeSide::Left, 100.0, 120.0, 1.0),
                &region(EyeSide::Right, 200.0, 120.0, 1.0),
                Duration::ZERO,
            )
            .unwrap_err();
        assert_eq!(err, EstimationFailure::EyesClosed);
    }

    #[test]
    fn one_open_eye_is_enough() {
        let mut img = blank(200);
        draw_pupil(&mut img, 200, 120);
        let p = unsmoothed().estimate(
            &img,
            &region(EyeSide::Left, 100.0, 120.0, 1.0),
            &region(EyeSide::Right, 200.0, 120.0, 8.0),
            Duration::ZERO,
        );
        assert!(p.is_ok());
    }

    #[test]
    fn flat_region_has_no_pupil() {
        let img = blank(128);
        let err = unsmoothed()
            .estimate(
                &img,
                &region(EyeSide::Left, 100.0, 120.0, 8.0),
                &region(EyeSide::Right, 200.0, 120.0, 8.0),
                Duration::ZERO,
            )
            .unwrap_err();
        assert_eq!(err, EstimationFailure::LowContrast);
    }

    #[test]
    fn tiny_or_offscreen_region_is_too_small() {
        let img = blank(200);
        let mut left = region(EyeSide::Left, 100.0, 120.0, 8.0);
        left.bounds = Rect::new(100.0, 120.0, 3.0, 3.0);
        let mut right = region(EyeSide::Right, 200.0, 120.0, 8.0);
        right.bounds = Rect::new(1000.0, 1000.0, 40.0, 40.0);

        let err = unsmoothed().estimate(&img, &left, &right, Duration::ZERO).unwrap_err();
        assert_eq!(err, EstimationFailure::RegionTooSmall);
    }

    #[test]
    fn smoothing_is_exponential() {
        let mut s = Smoothing::new(0.5);
        assert_eq!(s.filter(1.0, 1.0), (1.0, 1.0));
        assert_eq!(s.filter(0.0, 0.0), (0.5, 0.5));
        s.reset();
        assert_eq!(s.filter(0.2, 0.4), (0.2, 0.4));
    }
}
