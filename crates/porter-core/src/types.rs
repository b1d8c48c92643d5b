use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of dimensions in a face encoding.
pub const ENCODING_DIM: usize = 128;

/// Default Euclidean distance below which a probe counts as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face encoding vector (128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled identity in the matching gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub encoding: Encoding,
}

/// Result of classifying a probe encoding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Closest enrolled identity, strictly below the threshold.
    Match { name: String, distance: f32 },
    /// No gallery entry was close enough.
    Unmatched,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("probe has {probe} dimensions but gallery entry {name:?} has {entry}")]
    DimensionMismatch {
        probe: usize,
        entry: usize,
        name: String,
    },
}

/// Classify a probe against the gallery by minimum Euclidean distance.
///
/// The minimum must be strictly below `threshold` to count as a match.
/// Ties at the minimum keep the earliest gallery entry, so callers must
/// supply a stable gallery ordering for reproducible results. An empty
/// gallery always yields `Unmatched`. A dimension mismatch between the
/// probe and any gallery entry is a caller error, never coerced.
pub fn classify(
    probe: &Encoding,
    gallery: &[GalleryEntry],
    threshold: f32,
) -> Result<Classification, MatchError> {
    let mut best: Option<(usize, f32)> = None;

    for (i, entry) in gallery.iter().enumerate() {
        if entry.encoding.dim() != probe.dim() {
            return Err(MatchError::DimensionMismatch {
                probe: probe.dim(),
                entry: entry.encoding.dim(),
                name: entry.name.clone(),
            });
        }

        let distance = probe.euclidean_distance(&entry.encoding);
        // Strict `<` keeps the first occurrence on ties.
        let better = match best {
            None => true,
            Some((_, d)) => distance < d,
        };
        if better {
            best = Some((i, distance));
        }
    }

    Ok(match best {
        Some((idx, distance)) if distance < threshold => Classification::Match {
            name: gallery[idx].name.clone(),
            distance,
        },
        _ => Classification::Unmatched,
    })
}

/// Strategy for classifying a probe encoding against a gallery of
/// enrolled identities.
pub trait Matcher {
    fn classify(
        &self,
        probe: &Encoding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<Classification, MatchError>;
}

/// Euclidean distance matcher; the only shipped strategy.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn classify(
        &self,
        probe: &Encoding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<Classification, MatchError> {
        classify(probe, gallery, threshold)
    }
}
