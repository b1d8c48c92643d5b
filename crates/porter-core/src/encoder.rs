//! 128-dimensional face encoder via ONNX Runtime.
//!
//! Crops a detected face with margin, resizes the crop to 150×150, and
//! runs a ResNet encoder to produce the vector used for matching.

use crate::types::{Encoding, FaceBox, ENCODING_DIM};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ENCODER_INPUT_SIZE: usize = 150;
const ENCODER_MEAN: f32 = 127.5;
const ENCODER_STD: f32 = 127.5;
/// Fraction of the face box's longest side added on every edge of the crop.
const ENCODER_CROP_MARGIN: f32 = 0.25;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0} — place the face encoder ONNX model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ResNet-based face encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the encoder ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face encoder model"
        );

        Ok(Self { session })
    }

    /// Extract the encoding for one detected face.
    pub fn encode(&mut self, image: &RgbImage, face: &FaceBox) -> Result<Encoding, EncoderError> {
        let crop = crop_face(image, face);
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("encoding extraction: {e}")))?;

        if raw.len() != ENCODING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ENCODING_DIM}-dim encoding, got {}",
                raw.len()
            )));
        }

        Ok(Encoding {
            values: raw.to_vec(),
        })
    }

    /// Normalize a 150×150 crop into a NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ENCODER_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ENCODER_MEAN) / ENCODER_STD;
            }
        }
        tensor
    }
}

/// Square crop around the face box, expanded by the margin, clamped to the
/// image bounds, and resized to the encoder input size.
fn crop_face(image: &RgbImage, face: &FaceBox) -> RgbImage {
    let img_w = image.width() as f32;
    let img_h = image.height() as f32;

    let side = face.width.max(face.height) * (1.0 + 2.0 * ENCODER_CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).clamp(0.0, img_w - 1.0);
    let y0 = (cy - side / 2.0).clamp(0.0, img_h - 1.0);
    let x1 = (cx + side / 2.0).clamp(x0 + 1.0, img_w);
    let y1 = (cy + side / 2.0).clamp(y0 + 1.0, img_h);

    let cropped = image::imageops::crop_imm(
        image,
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )
    .to_image();

    image::imageops::resize(
        &cropped,
        ENCODER_INPUT_SIZE as u32,
        ENCODER_INPUT_SIZE as u32,
        FilterType::Triangle,
    )
}
