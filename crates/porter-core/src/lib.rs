//! porter-core — Face detection, encoding, and identity matching.
//!
//! Uses the UltraFace RFB-320 model for face detection and a 128-dimensional
//! ResNet face encoder, both running via ONNX Runtime for CPU inference.
//! Matching is plain Euclidean distance against a gallery of enrolled
//! encodings.

pub mod analyzer;
pub mod detector;
pub mod encoder;
pub mod pixels;
pub mod types;

pub use analyzer::{AnalyzerError, DetectedFace, FaceAnalyzer, OnnxFaceAnalyzer};
pub use pixels::{decode_rgb, PixelError};
pub use types::{
    classify, Classification, Encoding, EuclideanMatcher, FaceBox, GalleryEntry, MatchError,
    Matcher, DEFAULT_MATCH_THRESHOLD, ENCODING_DIM,
};
