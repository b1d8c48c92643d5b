//! The analysis seam: detect every face in a frame and encode each one.

use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{Encoding, FaceBox};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

/// A detected face paired with its encoding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounds: FaceBox,
    pub encoding: Encoding,
}

/// Detects faces in a frame and extracts an encoding for each.
///
/// Implementations return faces in descending detection-confidence order.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// ONNX-backed analyzer composing UltraFace detection with the ResNet
/// face encoder.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxFaceAnalyzer {
    /// Load both models, failing fast if either file is missing.
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, AnalyzerError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            encoder: FaceEncoder::load(encoder_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let faces = self.detector.detect(image)?;

        let mut out = Vec::with_capacity(faces.len());
        for bounds in faces {
            let encoding = self.encoder.encode(image, &bounds)?;
            out.push(DetectedFace { bounds, encoding });
        }
        Ok(out)
    }
}
