use anyhow::Result;
use image::GrayImage;

use crate::types::{FaceBox, LandmarkSet};

/// Produces the 68-point landmark set for one face. Deterministic for a
/// given model and input. `Ok(None)` means the model found no usable face
/// in the box; `Err` is a backend failure.
pub trait LandmarkExtractor {
    fn name(&self) -> String;
    fn extract(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Option<LandmarkSet>>;
}

#[cfg(feature = "onnx")]
pub use regressor::OnnxLandmarkExtractor;

#[cfg(feature = "onnx")]
mod regressor {
    use super::*;
    use anyhow::{anyhow, Context};
    use image::imageops::FilterType;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use tracing::{debug, info};

    use crate::types::{Point2D, Rect, LANDMARK_COUNT};

    /// 68-point regressor (PFLD style): square crop in, `[1, 136]` of
    /// crop-normalised `(x, y)` pairs out.
    pub struct OnnxLandmarkExtractor {
        session: Session,
        input_size: u32,
    }

    impl OnnxLandmarkExtractor {
        pub fn new(model_path: &str, input_size: u32) -> Result<Self> {
            info!(path = model_path, input_size, "loading landmark model");
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)
                .with_context(|| format!("Failed to load landmark model {}", model_path))?;
            Ok(Self { session, input_size })
        }

        /// Face box padded by a quarter of its size, made square and clipped
        /// to the frame.
        fn crop_rect(face: &Rect, frame_w: f32, frame_h: f32) -> Option<Rect> {
            let side = face.width.max(face.height) * 1.25;
            let c = face.center();
            let square = Rect::new(c.x - side / 2.0, c.y - side / 2.0, side, side);
            square.intersect(&Rect::new(0.0, 0.0, frame_w, frame_h))
        }
    }

    impl LandmarkExtractor for OnnxLandmarkExtractor {
        fn name(&self) -> String {
            "68-point landmarks (ONNX)".to_string()
        }

        fn extract(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Option<LandmarkSet>> {
            let Some(crop_rect) = Self::crop_rect(&face.rect, frame.width() as f32, frame.height() as f32)
            else {
                return Ok(None);
            };
            if crop_rect.width < 1.0 || crop_rect.height < 1.0 {
                return Ok(None);
            }

            let crop = image::imageops::crop_imm(
                frame,
                crop_rect.x as u32,
                crop_rect.y as u32,
                crop_rect.width as u32,
                crop_rect.height as u32,
            )
            .to_image();

            let size = self.input_size;
            let resized = image::imageops::resize(&crop, size, size, FilterType::Triangle);

            // NCHW, gray replicated across channels, scaled to [0, 1]
            let plane: Vec<f32> = resized.pixels().map(|p| p[0] as f32 / 255.0).collect();
            let mut input_data = Vec::with_capacity(plane.len() * 3);
            for _ in 0..3 {
                input_data.extend_from_slice(&plane);
            }

            let input = ort::value::Tensor::from_array((
                vec![1i64, 3, size as i64, size as i64],
                input_data,
            ))?;
            let outputs = self.session.run(ort::inputs![input])?;
            let (_shape, out) = outputs[0].try_extract_tensor::<f32>()?;

            if out.len() < LANDMARK_COUNT * 2 {
                return Err(anyhow!(
                    "landmark model returned {} values, expected {}",
                    out.len(),
                    LANDMARK_COUNT * 2
                ));
            }
            if out.iter().take(LANDMARK_COUNT * 2).any(|v| !v.is_finite()) {
                debug!("landmark model produced non-finite output");
                return Ok(None);
            }

            // Crop-normalised -> frame pixels
            let points: Vec<Point2D> = out
                .chunks_exact(2)
                .take(LANDMARK_COUNT)
                .map(|xy| {
                    Point2D::new(
                        crop_rect.x + xy[0] * crop_rect.width,
                        crop_rect.y + xy[1] * crop_rect.height,
                    )
                })
                .collect();

            Ok(Some(LandmarkSet::from_points(points)?))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn crop_is_square_padded_and_clipped() {
            let r = OnnxLandmarkExtractor::crop_rect(&Rect::new(100.0, 100.0, 80.0, 100.0), 640.0, 480.0)
                .unwrap();
            assert_eq!(r, Rect::new(77.5, 87.5, 125.0, 125.0));

            let edge = OnnxLandmarkExtractor::crop_rect(&Rect::new(0.0, 0.0, 80.0, 80.0), 640.0, 480.0)
                .unwrap();
            assert_eq!((edge.x, edge.y), (0.0, 0.0));
        }
    }
}
