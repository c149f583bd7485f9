use anyhow::Result;
use std::time::Duration;
use tracing::debug;

use crate::detector::{FaceLocator, FaceSelector};
use crate::error::{EstimationFailure, GestureError};
use crate::eyes::EyeRegionResolver;
use crate::gaze::GazeEstimator;
use crate::landmarks::LandmarkExtractor;
use crate::types::{FaceBox, Frame, GazePoint};

/// What one frame produced. Only `Gaze` counts as a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Gaze(GazePoint),
    DetectionMiss,
    EstimationFailure(EstimationFailure),
}

impl FrameOutcome {
    pub fn gaze(&self) -> Option<GazePoint> {
        match self {
            FrameOutcome::Gaze(p) => Some(*p),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<GazePoint, GestureError> {
        match self {
            FrameOutcome::Gaze(p) => Ok(p),
            FrameOutcome::DetectionMiss => Err(GestureError::DetectionMiss),
            FrameOutcome::EstimationFailure(reason) => Err(GestureError::EstimationFailure(reason)),
        }
    }
}

/// One frame in, at most one gaze point out. `Err` is a backend failure
/// (model runtime, corrupt input); misses are ordinary outcomes.
pub trait Pipeline {
    fn name(&self) -> String;
    fn process(&mut self, frame: &Frame) -> Result<FrameOutcome>;
}

/// FaceLocator -> FaceSelector -> LandmarkExtractor -> EyeRegionResolver -> GazeEstimator
pub struct GazePipeline {
    locator: Box<dyn FaceLocator + Send>,
    selector: FaceSelector,
    extractor: Box<dyn LandmarkExtractor + Send>,
    resolver: EyeRegionResolver,
    estimator: Box<dyn GazeEstimator + Send>,
}

impl GazePipeline {
    pub fn new(
        locator: Box<dyn FaceLocator + Send>,
        selector: FaceSelector,
        extractor: Box<dyn LandmarkExtractor + Send>,
        resolver: EyeRegionResolver,
        estimator: Box<dyn GazeEstimator + Send>,
    ) -> Self {
        Self { locator, selector, extractor, resolver, estimator }
    }

    fn miss(&mut self) -> FrameOutcome {
        self.selector.reset();
        self.estimator.reset();
        FrameOutcome::DetectionMiss
    }
}

impl Pipeline for GazePipeline {
    fn name(&self) -> String {
        format!(
            "{} + {} + {}",
            self.locator.name(),
            self.extractor.name(),
            self.estimator.name()
        )
    }

    fn process(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let gray = frame.gray();

        // 1. Detect, keeping only the in-frame part of each box
        let bounds = frame.bounds();
        let faces: Vec<FaceBox> = self
            .locator
            .locate(&gray)?
            .into_iter()
            .filter_map(|f| f.rect.intersect(&bounds).map(|r| FaceBox::new(r, f.score)))
            .collect();
        let Some(face) = self.selector.select(&faces) else {
            debug!(t_ms = frame.timestamp.as_millis() as u64, "no face");
            return Ok(self.miss());
        };

        // 2. Landmarks
        let Some(landmarks) = self.extractor.extract(&gray, &face)? else {
            debug!(t_ms = frame.timestamp.as_millis() as u64, "no landmarks");
            return Ok(self.miss());
        };

        // 3. Eyes
        let (left, right) = self.resolver.resolve(&landmarks, &face);

        // 4. Gaze
        match self.estimator.estimate(&gray, &left, &right, frame.timestamp) {
            Ok(point) => Ok(FrameOutcome::Gaze(point)),
            Err(reason) => {
                debug!(%reason, "no gaze estimate");
                Ok(FrameOutcome::EstimationFailure(reason))
            }
        }
    }
}

/// Model-free stand-in: gaze sweeps a slow ellipse around the screen centre.
pub struct SimulatedPipeline {
    period: Duration,
}

impl SimulatedPipeline {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for SimulatedPipeline {
    fn default() -> Self {
        Self::new(Duration::from_secs(8))
    }
}

impl Pipeline for SimulatedPipeline {
    fn name(&self) -> String {
        "Simulated Gaze".to_string()
    }

    fn process(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let period = self.period.as_secs_f32().max(f32::EPSILON);
        let t = frame.timestamp.as_secs_f32() / period * std::f32::consts::TAU;
        let x = 0.5 + t.cos() * 0.35;
        let y = 0.5 + t.sin() * 0.3;
        Ok(GazePoint::new(x, y, frame.timestamp)
            .map(FrameOutcome::Gaze)
            .unwrap_or(FrameOutcome::DetectionMiss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceSelection;
    use crate::eyes::tests::{eye_contour, face_landmarks};
    use crate::gaze::{EstimatorConfig, PupilGazeEstimator};
    use crate::types::{LandmarkSet, Rect};
    use image::{GrayImage, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct FixedFaces(Vec<FaceBox>);

    /// One detection list per frame; empty once the script runs out.
    struct ScriptedFaces(VecDeque<Vec<FaceBox>>);

    impl FaceLocator for ScriptedFaces {
        fn name(&self) -> String {
            "scripted".into()
        }
        fn locate(&mut self, _frame: &GrayImage) -> Result<Vec<FaceBox>> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    impl FaceLocator for FixedFaces {
        fn name(&self) -> String {
            "fixed".into()
        }
        fn locate(&mut self, _frame: &GrayImage) -> Result<Vec<FaceBox>> {
            Ok(self.0.clone())
        }
    }

    /// Eyes 100 px apart at the face's upper third.
    struct TemplateLandmarks {
        lid: f32,
    }

    impl LandmarkExtractor for TemplateLandmarks {
        fn name(&self) -> String {
            "template".into()
        }
        fn extract(&mut self, _frame: &GrayImage, face: &FaceBox) -> Result<Option<LandmarkSet>> {
            let c = face.rect.center();
            let y = face.rect.y + face.rect.height / 3.0;
            Ok(Some(face_landmarks(
                eye_contour(c.x - 50.0, y, self.lid),
                eye_contour(c.x + 50.0, y, self.lid),
            )))
        }
    }

    /// Template landmarks that also record which face they were asked about.
    struct RecordingLandmarks {
        inner: TemplateLandmarks,
        seen: Arc<Mutex<Vec<Rect>>>,
    }

    impl LandmarkExtractor for RecordingLandmarks {
        fn name(&self) -> String {
            "recording".into()
        }
        fn extract(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Option<LandmarkSet>> {
            self.seen.lock().unwrap().push(face.rect);
            self.inner.extract(frame, face)
        }
    }

    fn scripted_pipeline(
        script: Vec<Vec<FaceBox>>,
        policy: FaceSelection,
        smoothing: f32,
    ) -> (GazePipeline, Arc<Mutex<Vec<Rect>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let p = GazePipeline::new(
            Box::new(ScriptedFaces(script.into())),
            FaceSelector::new(policy),
            Box::new(RecordingLandmarks { inner: TemplateLandmarks { lid: 8.0 }, seen: seen.clone() }),
            EyeRegionResolver::default(),
            Box::new(PupilGazeEstimator::new(EstimatorConfig { smoothing, ..Default::default() })),
        );
        (p, seen)
    }

    fn pipeline(faces: Vec<FaceBox>, lid: f32) -> GazePipeline {
        GazePipeline::new(
            Box::new(FixedFaces(faces)),
            FaceSelector::new(FaceSelection::Largest),
            Box::new(TemplateLandmarks { lid }),
            EyeRegionResolver::default(),
            Box::new(PupilGazeEstimator::new(EstimatorConfig { smoothing: 1.0, ..Default::default() })),
        )
    }

    /// Light frame with dark pupils drawn at both template eye centres.
    fn face_frame(face: &Rect) -> Frame {
        looking_frame(face, 0)
    }

    /// As [`face_frame`], with both pupils moved `dx` pixels to the right.
    fn looking_frame(face: &Rect, dx: i32) -> Frame {
        let mut img = RgbImage::from_pixel(640, 480, Rgb([210, 210, 210]));
        let c = face.center();
        let y = (face.y + face.height / 3.0) as i32;
        for cx in [(c.x - 50.0) as i32 + dx, (c.x + 50.0) as i32 + dx] {
            for py in (y - 4)..=(y + 4) {
                for px in (cx - 4)..=(cx + 4) {
                    if (px - cx).pow(2) + (py - y).pow(2) <= 16 {
                        img.put_pixel(px as u32, py as u32, Rgb([15, 15, 15]));
                    }
                }
            }
        }
        Frame::new(img, Duration::from_millis(33))
    }

    #[test]
    fn no_face_is_a_miss() {
        let mut p = pipeline(vec![], 8.0);
        let frame = Frame::new(RgbImage::new(64, 48), Duration::ZERO);
        assert_eq!(p.process(&frame).unwrap(), FrameOutcome::DetectionMiss);
    }

    #[test]
    fn face_outside_frame_is_a_miss() {
        let mut p = pipeline(vec![FaceBox::new(Rect::new(900.0, 900.0, 100.0, 100.0), 1.0)], 8.0);
        let frame = Frame::new(RgbImage::new(640, 480), Duration::ZERO);
        assert_eq!(p.process(&frame).unwrap(), FrameOutcome::DetectionMiss);
    }

    #[test]
    fn full_chain_produces_centred_gaze() {
        let face = Rect::new(220.0, 100.0, 200.0, 240.0);
        let mut p = pipeline(vec![FaceBox::new(face, 1.0)], 8.0);

        let out = p.process(&face_frame(&face)).unwrap();
        let gaze = out.gaze().expect("gaze point");
        assert!((gaze.x - 0.5).abs() < 0.01);
        assert!((gaze.y - 0.5).abs() < 0.01);
        assert_eq!(gaze.timestamp, Duration::from_millis(33));
    }

    #[test]
    fn closed_eyes_surface_as_estimation_failure() {
        let face = Rect::new(220.0, 100.0, 200.0, 240.0);
        let mut p = pipeline(vec![FaceBox::new(face, 1.0)], 1.0);

        let out = p.process(&face_frame(&face)).unwrap();
        assert_eq!(out, FrameOutcome::EstimationFailure(EstimationFailure::EyesClosed));
        assert_eq!(
            out.into_result().unwrap_err(),
            GestureError::EstimationFailure(EstimationFailure::EyesClosed)
        );
    }

    #[test]
    fn partly_visible_face_is_clipped_before_selection() {
        let inside = Rect::new(220.0, 100.0, 200.0, 240.0);
        let (mut p, seen) = scripted_pipeline(
            vec![vec![
                FaceBox::new(Rect::new(900.0, 900.0, 400.0, 400.0), 1.0),
                FaceBox::new(Rect::new(600.0, 0.0, 400.0, 100.0), 1.0),
                FaceBox::new(inside, 1.0),
            ]],
            FaceSelection::Largest,
            1.0,
        );

        p.process(&face_frame(&inside)).unwrap();
        // The second box keeps only 40x100 px inside a 640x480 frame.
        assert_eq!(seen.lock().unwrap().as_slice(), &[inside]);
    }

    #[test]
    fn lost_face_drops_selection_history() {
        let small = Rect::new(10.0, 10.0, 100.0, 120.0);
        let large = Rect::new(400.0, 200.0, 200.0, 240.0);
        let near_old = Rect::new(20.0, 20.0, 90.0, 100.0);
        let (mut p, seen) = scripted_pipeline(
            vec![
                vec![FaceBox::new(small, 1.0)],
                vec![],
                vec![FaceBox::new(large, 1.0), FaceBox::new(near_old, 1.0)],
            ],
            FaceSelection::ClosestToPrevious,
            1.0,
        );

        let frame = Frame::new(RgbImage::new(640, 480), Duration::ZERO);
        p.process(&frame).unwrap();
        assert_eq!(p.process(&frame).unwrap(), FrameOutcome::DetectionMiss);
        p.process(&frame).unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[small, large]);
    }

    #[test]
    fn smoothing_restarts_after_lost_face() {
        let face = Rect::new(220.0, 100.0, 200.0, 240.0);
        let found = || vec![FaceBox::new(face, 1.0)];
        let (mut p, _) = scripted_pipeline(vec![found(), vec![], found()], FaceSelection::Largest, 0.4);

        let centred = p.process(&face_frame(&face)).unwrap().gaze().unwrap();
        assert!((centred.x - 0.5).abs() < 0.01);
        assert_eq!(p.process(&face_frame(&face)).unwrap(), FrameOutcome::DetectionMiss);
        let refound = p.process(&looking_frame(&face, 4)).unwrap().gaze().unwrap();

        let (mut fresh, _) = scripted_pipeline(vec![found()], FaceSelection::Largest, 1.0);
        let raw = fresh.process(&looking_frame(&face, 4)).unwrap().gaze().unwrap();

        assert!(raw.x < 0.45);
        assert!((refound.x - raw.x).abs() < 1e-6);
        assert!((refound.y - raw.y).abs() < 1e-6);
    }

    #[test]
    fn simulated_gaze_stays_on_screen() {
        let mut p = SimulatedPipeline::default();
        for ms in (0..10_000).step_by(250) {
            let frame = Frame::new(RgbImage::new(4, 4), Duration::from_millis(ms));
            let g = p.process(&frame).unwrap().gaze().unwrap();
            assert!((0.0..=1.0).contains(&g.x) && (0.0..=1.0).contains(&g.y));
        }
    }
}
