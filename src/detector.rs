use anyhow::{Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use tracing::{debug, info};

use crate::types::{FaceBox, Rect};

/// Finds faces in a grayscale frame. An empty result is a normal miss,
/// not an error; `Err` is reserved for backend failures.
pub trait FaceLocator {
    fn name(&self) -> String;
    fn locate(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>>;
}

// =========================================================================
// Primary face selection
// =========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaceSelection {
    /// Largest box by area; ties go to the earlier box.
    #[default]
    Largest,
    /// Box whose centre is nearest the previous pick, falling back to
    /// `Largest` when there is no previous pick.
    ClosestToPrevious,
}

#[derive(Debug, Clone, Default)]
pub struct FaceSelector {
    policy: FaceSelection,
    previous: Option<Rect>,
}

impl FaceSelector {
    pub fn new(policy: FaceSelection) -> Self {
        Self { policy, previous: None }
    }

    pub fn policy(&self) -> FaceSelection {
        self.policy
    }

    /// Picks the primary face. An empty slice is a lost face and clears the
    /// history, so the next pick starts over from `Largest`.
    pub fn select(&mut self, faces: &[FaceBox]) -> Option<FaceBox> {
        if faces.is_empty() {
            self.previous = None;
            return None;
        }
        let picked = match (self.policy, self.previous) {
            (FaceSelection::ClosestToPrevious, Some(prev)) => closest_to(faces, &prev),
            _ => largest(faces),
        }?;
        self.previous = Some(picked.rect);
        Some(picked)
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn largest(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut best: Option<FaceBox> = None;
    for f in faces {
        if best.map_or(true, |b| f.rect.area() > b.rect.area()) {
            best = Some(*f);
        }
    }
    best
}

fn closest_to(faces: &[FaceBox], prev: &Rect) -> Option<FaceBox> {
    let target = prev.center();
    let mut best: Option<(f32, FaceBox)> = None;
    for f in faces {
        let d = f.rect.center().distance(&target);
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, *f));
        }
    }
    best.map(|(_, f)| f)
}

/// Greedy non-maximum suppression: highest score first, dropping any box
/// overlapping a kept one by more than `iou_threshold`.
pub fn non_max_suppression(mut faces: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceBox> = Vec::new();
    for f in faces {
        if kept.iter().all(|k| k.rect.iou(&f.rect) <= iou_threshold) {
            kept.push(f);
        }
    }
    kept
}

// =========================================================================
// SeetaFace cascade (rustface)
// =========================================================================

#[derive(Debug, Clone, Copy)]
pub struct CascadeParams {
    pub min_face_size: u32,
    pub score_threshold: f64,
    pub pyramid_scale_factor: f32,
    pub window_step: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            score_threshold: 2.0,
            pyramid_scale_factor: 0.8,
            window_step: 4,
        }
    }
}

pub struct RustfaceLocator {
    model: rustface::Model,
    params: CascadeParams,
}

impl RustfaceLocator {
    pub fn new(model_path: &str, params: CascadeParams) -> Result<Self> {
        info!(path = model_path, "loading SeetaFace model");
        let file = File::open(model_path)
            .with_context(|| format!("Failed to open face model {}", model_path))?;
        let model = rustface::read_model(BufReader::new(file))
            .with_context(|| format!("Failed to parse face model {}", model_path))?;
        Ok(Self { model, params })
    }
}

impl FaceLocator for RustfaceLocator {
    fn name(&self) -> String {
        "SeetaFace cascade".to_string()
    }

    fn locate(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>> {
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_face_size);
        detector.set_score_thresh(self.params.score_threshold);
        detector.set_pyramid_scale_factor(self.params.pyramid_scale_factor);
        detector.set_slide_window_step(self.params.window_step, self.params.window_step);

        let image = rustface::ImageData::new(frame.as_raw(), frame.width(), frame.height());
        let faces: Vec<FaceBox> = detector
            .detect(&image)
            .iter()
            .map(|face| {
                let b = face.bbox();
                FaceBox::new(
                    Rect::new(b.x() as f32, b.y() as f32, b.width() as f32, b.height() as f32),
                    face.score() as f32,
                )
            })
            .collect();

        debug!(count = faces.len(), "faces located");
        Ok(faces)
    }
}

// =========================================================================
// UltraFace (ONNX)
// =========================================================================

#[cfg(feature = "onnx")]
pub use ultraface::OnnxFaceLocator;

#[cfg(feature = "onnx")]
mod ultraface {
    use super::*;
    use image::imageops::FilterType;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;

    const INPUT_W: u32 = 320;
    const INPUT_H: u32 = 240;

    pub struct OnnxFaceLocator {
        session: Session,
        anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
        score_threshold: f32,
    }

    impl OnnxFaceLocator {
        pub fn new(model_path: &str, score_threshold: f32) -> Result<Self> {
            info!(path = model_path, "loading UltraFace model");
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)
                .with_context(|| format!("Failed to load face model {}", model_path))?;

            Ok(Self {
                session,
                anchors: generate_anchors(INPUT_W as usize, INPUT_H as usize),
                score_threshold,
            })
        }
    }

    impl FaceLocator for OnnxFaceLocator {
        fn name(&self) -> String {
            "UltraFace (ONNX)".to_string()
        }

        fn locate(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>> {
            let resized = image::imageops::resize(frame, INPUT_W, INPUT_H, FilterType::Triangle);

            // NCHW [1, 3, 240, 320], gray replicated to all three channels,
            // normalised (pixel - 127) / 128
            let plane: Vec<f32> = resized.pixels().map(|p| (p[0] as f32 - 127.0) / 128.0).collect();
            let mut input_data = Vec::with_capacity(plane.len() * 3);
            for _ in 0..3 {
                input_data.extend_from_slice(&plane);
            }

            let input_tensor =
                Tensor::from_array((vec![1i64, 3, INPUT_H as i64, INPUT_W as i64], input_data))?;
            let outputs = self.session.run(ort::inputs![input_tensor])?;

            let (_scores_shape, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
            let (_boxes_shape, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

            let sx = frame.width() as f32;
            let sy = frame.height() as f32;
            let candidates = decode(&self.anchors, scores, boxes, self.score_threshold, sx, sy);

            Ok(non_max_suppression(candidates, 0.3))
        }
    }

    /// Every anchor above `threshold`, decoded straight into frame pixels.
    fn decode(
        anchors: &[(f32, f32, f32, f32)],
        scores_raw: &[f32],
        boxes_raw: &[f32],
        threshold: f32,
        frame_w: f32,
        frame_h: f32,
    ) -> Vec<FaceBox> {
        // UltraFace variances
        let center_variance = 0.1;
        let size_variance = 0.2;

        let n = anchors.len().min(scores_raw.len() / 2).min(boxes_raw.len() / 4);
        let mut out = Vec::new();

        for i in 0..n {
            let score = scores_raw[i * 2 + 1];
            if score <= threshold {
                continue;
            }
            let (ax, ay, aw, ah) = anchors[i];

            let cx = boxes_raw[i * 4] * center_variance * aw + ax;
            let cy = boxes_raw[i * 4 + 1] * center_variance * ah + ay;
            let w = (boxes_raw[i * 4 + 2] * size_variance).exp() * aw;
            let h = (boxes_raw[i * 4 + 3] * size_variance).exp() * ah;

            out.push(FaceBox::new(
                Rect::new((cx - w / 2.0) * frame_w, (cy - h / 2.0) * frame_h, w * frame_w, h * frame_h),
                score,
            ));
        }
        out
    }

    fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
        let shrinkage_list = [8, 16, 32, 64];
        let min_boxes: [&[f32]; 4] = [
            &[10.0, 16.0, 24.0],
            &[32.0, 48.0],
            &[64.0, 96.0],
            &[128.0, 192.0, 256.0],
        ];
        let mut anchors = Vec::new();

        let w = width as f32;
        let h = height as f32;

        for (i, &shrinkage) in shrinkage_list.iter().enumerate() {
            let feature_h = (h / shrinkage as f32).ceil() as usize;
            let feature_w = (w / shrinkage as f32).ceil() as usize;

            for v in 0..feature_h {
                for u in 0..feature_w {
                    let cx = (u as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / w;
                    let cy = (v as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / h;

                    for &min_box in min_boxes[i] {
                        anchors.push((cx, cy, min_box / w, min_box / h));
                    }
                }
            }
        }
        anchors
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn anchor_count_matches_ultraface_320() {
            assert_eq!(generate_anchors(320, 240).len(), 4420);
        }

        #[test]
        fn decode_keeps_only_confident_anchors() {
            let anchors = vec![(0.5, 0.5, 0.25, 0.25), (0.2, 0.2, 0.1, 0.1)];
            let scores = [0.1, 0.9, 0.8, 0.2];
            let boxes = [0.0; 8];
            let faces = decode(&anchors, &scores, &boxes, 0.7, 320.0, 240.0);
            assert_eq!(faces.len(), 1);
            assert_eq!(faces[0].rect, Rect::new(120.0, 90.0, 80.0, 60.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32) -> FaceBox {
        FaceBox::new(Rect::new(x, y, size, size), 1.0)
    }

    #[test]
    fn largest_policy_picks_biggest_area() {
        let mut sel = FaceSelector::new(FaceSelection::Largest);
        let faces = [face(0.0, 0.0, 50.0), face(200.0, 0.0, 80.0), face(400.0, 0.0, 60.0)];
        assert_eq!(sel.select(&faces), Some(faces[1]));
    }

    #[test]
    fn largest_policy_breaks_ties_by_order() {
        let mut sel = FaceSelector::new(FaceSelection::Largest);
        let faces = [face(10.0, 0.0, 50.0), face(300.0, 0.0, 50.0)];
        assert_eq!(sel.select(&faces), Some(faces[0]));
    }

    #[test]
    fn closest_policy_tracks_previous_face() {
        let mut sel = FaceSelector::new(FaceSelection::ClosestToPrevious);

        // no history: largest wins
        let first = [face(0.0, 0.0, 50.0), face(300.0, 0.0, 90.0)];
        assert_eq!(sel.select(&first), Some(first[1]));

        // a bigger face appears elsewhere; we stay on the one near the last pick
        let second = [face(0.0, 0.0, 200.0), face(305.0, 2.0, 88.0)];
        assert_eq!(sel.select(&second), Some(second[1]));

        sel.reset();
        assert_eq!(sel.select(&second), Some(second[0]));
    }

    #[test]
    fn empty_detection_selects_nothing() {
        let mut sel = FaceSelector::default();
        assert_eq!(sel.select(&[]), None);
    }

    #[test]
    fn empty_detection_forgets_previous_face() {
        let mut sel = FaceSelector::new(FaceSelection::ClosestToPrevious);
        assert_eq!(sel.select(&[face(0.0, 0.0, 40.0)]), Some(face(0.0, 0.0, 40.0)));
        assert_eq!(sel.select(&[]), None);

        let faces = [face(400.0, 0.0, 200.0), face(5.0, 5.0, 30.0)];
        assert_eq!(sel.select(&faces), Some(faces[0]));
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let a = FaceBox::new(Rect::new(0.0, 0.0, 100.0, 100.0), 0.9);
        let b = FaceBox::new(Rect::new(5.0, 5.0, 100.0, 100.0), 0.8);
        let c = FaceBox::new(Rect::new(300.0, 0.0, 100.0, 100.0), 0.7);
        assert_eq!(non_max_suppression(vec![b, c, a], 0.3), vec![a, c]);
    }
}
