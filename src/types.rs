use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GestureError;

/// Number of points in the standard 68-point facial landmark layout.
pub const LANDMARK_COUNT: usize = 68;
/// Landmark indices of the left eye contour (image left).
pub const LEFT_EYE: std::ops::Range<usize> = 36..42;
/// Landmark indices of the right eye contour (image right).
pub const RIGHT_EYE: std::ops::Range<usize> = 42..48;

/// Represents a single 2D point in frame pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn mean(points: &[Point2D]) -> Point2D {
        if points.is_empty() {
            return Point2D::default();
        }
        let n = points.len() as f32;
        let (sx, sy) = points.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
        Point2D::new(sx / n, sy / n)
    }
}

/// Axis-aligned rectangle `(x, y, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Bounding box of a set of points. `None` for an empty set.
    pub fn from_points(points: &[Point2D]) -> Option<Rect> {
        let first = points.first()?;
        let mut min_x = first.x;
        let mut min_y = first.y;
        let mut max_x = first.x;
        let mut max_y = first.y;

        for p in &points[1..] {
            if p.x < min_x { min_x = p.x; }
            if p.y < min_y { min_y = p.y; }
            if p.x > max_x { max_x = p.x; }
            if p.y > max_y { max_y = p.y; }
        }

        Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Finite coordinates and non-negative extent.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Grow by `dx` on the left and right and `dy` on the top and bottom.
    pub fn pad(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x - dx, self.y - dy, self.width + 2.0 * dx, self.height + 2.0 * dy)
    }

    /// Grow by `radius` on all sides.
    pub fn expand(&self, radius: f32) -> Rect {
        self.pad(radius, radius)
    }

    /// Linear scale of position and size.
    pub fn scale(&self, sx: f32, sy: f32) -> Rect {
        Rect::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: &Point2D) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersect(other).map(|r| r.area()).unwrap_or(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Pixel dimensions of a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Result<Self, GestureError> {
        if width == 0 || height == 0 {
            return Err(GestureError::InvalidScreen { width, height });
        }
        Ok(Self { width, height })
    }
}

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub rect: Rect,
    pub score: f32,
}

impl FaceBox {
    pub fn new(rect: Rect, score: f32) -> Self {
        Self { rect, score }
    }
}

/// Exactly 68 ordered landmarks. Never partially populated.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point2D>,
}

impl LandmarkSet {
    pub fn from_points(points: Vec<Point2D>) -> Result<Self, GestureError> {
        if points.len() != LANDMARK_COUNT {
            return Err(GestureError::IncompleteLandmarks(points.len()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    pub fn eye(&self, side: EyeSide) -> [Point2D; 6] {
        let range = match side {
            EyeSide::Left => LEFT_EYE,
            EyeSide::Right => RIGHT_EYE,
        };
        let mut out = [Point2D::default(); 6];
        out.copy_from_slice(&self.points[range]);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EyeSide {
    Left,
    Right,
}

/// Sub-rectangle of the face box holding one eye, plus its 6 contour points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeRegion {
    pub side: EyeSide,
    pub bounds: Rect,
    pub landmarks: [Point2D; 6],
}

/// Normalised screen coordinate in `[0,1]²` plus the source frame time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePoint {
    pub x: f32,
    pub y: f32,
    pub timestamp: Duration,
}

impl GazePoint {
    /// Clamps into `[0,1]²`; `None` for non-finite input.
    pub fn new(x: f32, y: f32, timestamp: Duration) -> Option<Self> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some(Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            timestamp,
        })
    }

    pub fn to_pixels(&self, screen: ScreenSize) -> Point2D {
        Point2D::new(self.x * screen.width as f32, self.y * screen.height as f32)
    }
}

/// One captured frame and its capture time relative to the start of the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: Duration) -> Self {
        Self { image, timestamp }
    }

    pub fn gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.image.width() as f32, self.image.height() as f32)
    }
}
