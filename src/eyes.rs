use crate::types::{EyeRegion, EyeSide, FaceBox, LandmarkSet, Point2D, Rect};

/// Derives per-eye crops from the eye contour landmarks.
///
/// The bound is the contour's bounding box, stretched vertically to at least
/// `min_aspect` of its width (a nearly shut contour is very flat but the
/// iris still needs room), padded by `padding` of its size on every side and
/// clipped to the face box.
#[derive(Debug, Clone, Copy)]
pub struct EyeRegionResolver {
    pub padding: f32,
    pub min_aspect: f32,
}

impl Default for EyeRegionResolver {
    fn default() -> Self {
        Self { padding: 0.35, min_aspect: 0.6 }
    }
}

impl EyeRegionResolver {
    pub fn new(padding: f32) -> Self {
        Self { padding: padding.max(0.0), ..Self::default() }
    }

    pub fn resolve(&self, landmarks: &LandmarkSet, face: &FaceBox) -> (EyeRegion, EyeRegion) {
        (
            self.region(EyeSide::Left, landmarks.eye(EyeSide::Left), &face.rect),
            self.region(EyeSide::Right, landmarks.eye(EyeSide::Right), &face.rect),
        )
    }

    fn region(&self, side: EyeSide, points: [Point2D; 6], face: &Rect) -> EyeRegion {
        let center = Point2D::mean(&points);
        let contour = Rect::from_points(&points).unwrap_or(Rect::new(center.x, center.y, 0.0, 0.0));

        let height = contour.height.max(contour.width * self.min_aspect);
        let stretched = Rect::new(contour.x, center.y - height / 2.0, contour.width, height);
        let padded = stretched.pad(stretched.width * self.padding, stretched.height * self.padding);

        // Landmarks outside the face box leave an empty region; the
        // estimator turns that into RegionTooSmall.
        let bounds = padded
            .intersect(face)
            .unwrap_or(Rect::new(center.x, center.y, 0.0, 0.0));

        EyeRegion { side, bounds, landmarks: points }
    }
}

/// Eye aspect ratio of a 6-point contour ordered outer corner, two upper lid
/// points, inner corner, two lower lid points:
/// `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`. Zero for a degenerate contour.
pub fn eye_aspect_ratio(points: &[Point2D; 6]) -> f32 {
    let horizontal = points[0].distance(&points[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    let vertical = points[1].distance(&points[5]) + points[2].distance(&points[4]);
    vertical / (2.0 * horizontal)
}
