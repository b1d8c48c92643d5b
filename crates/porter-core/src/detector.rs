//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the version-RFB-320 UltraFace model: one forward pass produces a
//! flat list of candidate scores and normalized corner boxes, which are
//! filtered by confidence and pruned with IoU non-maximum suppression.

use crate::types::FaceBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download version-RFB-320.onnx and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Detect faces, returning boxes in source-image pixel coordinates
    /// sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        if scores.len() / 2 != boxes.len() / 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "candidate count mismatch: {} scores vs {} boxes",
                scores.len() / 2,
                boxes.len() / 4
            )));
        }

        let candidates = decode_candidates(
            scores,
            boxes,
            image.width() as f32,
            image.height() as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );
        let faces = non_max_suppression(candidates, ULTRAFACE_NMS_THRESHOLD);

        tracing::debug!(count = faces.len(), "faces detected");
        Ok(faces)
    }

    /// Resize to 320×240 and normalize into a NCHW float tensor.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            ULTRAFACE_INPUT_WIDTH as u32,
            ULTRAFACE_INPUT_HEIGHT as u32,
            FilterType::Triangle,
        );

        let mut tensor =
            Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            }
        }
        tensor
    }
}

/// Turn raw score/box output into pixel-coordinate candidates.
///
/// Scores come in background/face pairs; boxes are normalized
/// [x1, y1, x2, y2] corners relative to the model input.
fn decode_candidates(
    scores: &[f32],
    boxes: &[f32],
    src_width: f32,
    src_height: f32,
    confidence_threshold: f32,
) -> Vec<FaceBox> {
    let count = scores.len() / 2;
    let mut out = Vec::new();

    for i in 0..count {
        let confidence = scores[i * 2 + 1];
        if confidence < confidence_threshold {
            continue;
        }

        let x1 = boxes[i * 4].clamp(0.0, 1.0) * src_width;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * src_height;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * src_width;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * src_height;

        out.push(FaceBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            confidence,
        });
    }

    out
}

/// Hard non-maximum suppression.
///
/// Keeps candidates in descending confidence order, dropping any box
/// whose IoU with an already-kept box exceeds the threshold.
fn non_max_suppression(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<FaceBox> = Vec::new();
    'candidates: for cand in candidates {
        for existing in &kept {
            if iou(existing, &cand) > iou_threshold {
                continue 'candidates;
            }
        }
        kept.push(cand);
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let ix = (a.x + a.width).min(b.x + b.width) - a.x.max(b.x);
    let iy = (a.y + a.height).min(b.y + b.height) - a.y.max(b.y);
    if ix <= 0.0 || iy <= 0.0 {
        return 0.0;
    }
    let intersection = ix * iy;
    let union = a.width * a.height + b.width * b.height - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}
