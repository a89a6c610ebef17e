use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::{DetectorKind, Metric};

/// Stored template format version. Bump when the persisted layout changes.
pub const TEMPLATE_VERSION: u32 = 2;

/// An owned RGB8 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Borrow the frame as an [`image::RgbImage`]-compatible buffer.
    ///
    /// Returns `None` if the pixel data does not match the declared
    /// dimensions.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Axis-aligned face bounding box in frame pixel space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face embedding vector. Length is a property of the embedder model
/// (128 for the bundled MobileFaceNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance: square root of the sum of squared
    /// per-coordinate differences. Unbounded above, 0 for identical vectors.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding length mismatch: {} vs {}",
            self.values.len(),
            other.values.len()
        );
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance: `1 − dot / (‖a‖·‖b‖)`, bounded [0, 2].
    ///
    /// A zero-norm operand yields distance 1 (maximal dissimilarity for a
    /// degenerate vector) rather than dividing by zero.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding length mismatch: {} vs {}",
            self.values.len(),
            other.values.len()
        );
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            1.0 - dot / denom
        } else {
            1.0
        }
    }

    /// Scale to unit L2 norm. Zero vectors are returned unchanged.
    pub fn l2_normalize(mut self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
        self
    }
}

/// One detector result: confidence, box, embedding, optional landmarks.
///
/// Ephemeral — lives for the duration of a single gate evaluation.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Detection confidence in [0, 1].
    pub score: f32,
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    /// Five-point facial landmarks, when the model provides them.
    /// Carried for display purposes only; the pipeline ignores them.
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// The single persisted face template: the mean of the accepted enrollment
/// samples plus the capture-time identifiers needed to interpret it.
///
/// At most one template exists at any time; re-enrollment replaces it
/// wholesale and reset deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledTemplate {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Detector variant active when the template was captured.
    pub detector: DetectorKind,
    /// Distance metric the template's threshold is calibrated for.
    pub metric: Metric,
    pub embedding: Embedding,
    /// Number of accepted samples averaged into the embedding.
    pub sample_count: usize,
}

/// Result codes relayed to external hardware (micro:bit) or the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCode {
    Enrolled,
    Match,
    NoMatch,
    Cleared,
    Test,
}

impl OutcomeCode {
    /// Wire representation: one uppercase word per line.
    pub fn as_line(&self) -> &'static str {
        match self {
            OutcomeCode::Enrolled => "ENROLLED",
            OutcomeCode::Match => "MATCH",
            OutcomeCode::NoMatch => "NO",
            OutcomeCode::Cleared => "CLEARED",
            OutcomeCode::Test => "TEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn euclidean_self_distance_is_zero() {
        let a = emb(&[0.3, -1.2, 4.0]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn euclidean_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_is_symmetric() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[-2.0, 0.5, 7.0]);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn cosine_self_distance_is_zero_for_nonzero_vector() {
        let a = emb(&[0.6, 0.8]);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_one() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_is_two() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_norm_is_one() {
        let zero = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(zero.cosine_distance(&b), 1.0);
        assert_eq!(b.cosine_distance(&zero), 1.0);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = emb(&[0.2, -0.4, 0.9]);
        let b = emb(&[1.1, 0.3, -0.5]);
        assert_eq!(a.cosine_distance(&b), b.cosine_distance(&a));
    }

    #[test]
    fn l2_normalize_unit_norm() {
        let a = emb(&[3.0, 4.0]).l2_normalize();
        let norm: f32 = a.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_unchanged() {
        let a = emb(&[0.0, 0.0]).l2_normalize();
        assert_eq!(a.values, vec![0.0, 0.0]);
    }

    #[test]
    fn outcome_code_lines() {
        assert_eq!(OutcomeCode::Enrolled.as_line(), "ENROLLED");
        assert_eq!(OutcomeCode::Match.as_line(), "MATCH");
        assert_eq!(OutcomeCode::NoMatch.as_line(), "NO");
        assert_eq!(OutcomeCode::Cleared.as_line(), "CLEARED");
        assert_eq!(OutcomeCode::Test.as_line(), "TEST");
    }
}
