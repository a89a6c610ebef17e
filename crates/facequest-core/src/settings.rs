//! Tunable pipeline settings.
//!
//! Settings are an explicit value passed into each flow — a read-only
//! snapshot for the flow's duration — rather than ambient global state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::error::Error;
use crate::types::Embedding;

/// Dissimilarity metric between two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Euclidean,
    Cosine,
}

impl Metric {
    /// Compute the scalar dissimilarity between two embeddings.
    ///
    /// Pure and symmetric for both metrics. Cosine is bounded [0, 2];
    /// euclidean is unbounded.
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Metric::Euclidean => a.euclidean_distance(b),
            Metric::Cosine => a.cosine_distance(b),
        }
    }

    /// Starting threshold when this metric is selected.
    pub fn default_threshold(&self) -> f32 {
        match self {
            Metric::Euclidean => 0.60,
            Metric::Cosine => 0.45,
        }
    }

    /// Valid threshold range in this metric's units.
    pub fn threshold_range(&self) -> RangeInclusive<f32> {
        match self {
            Metric::Euclidean => 0.30..=1.20,
            Metric::Cosine => 0.05..=0.80,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Cosine => write!(f, "cosine"),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euclidean" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(Error::Settings(format!(
                "unknown metric '{other}' (expected 'euclidean' or 'cosine')"
            ))),
        }
    }
}

/// Detector accuracy/speed tradeoff. Two interchangeable model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Slower, more accurate variant. Honors the configured minimum
    /// detection score as the model confidence floor.
    Accurate,
    /// Faster variant with a fixed model confidence floor.
    Fast,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Accurate => write!(f, "accurate"),
            DetectorKind::Fast => write!(f, "fast"),
        }
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accurate" => Ok(DetectorKind::Accurate),
            "fast" => Ok(DetectorKind::Fast),
            other => Err(Error::Settings(format!(
                "unknown detector '{other}' (expected 'accurate' or 'fast')"
            ))),
        }
    }
}

/// Quality and decision thresholds read by the gate and both flows.
///
/// The threshold is interpreted in the units of the selected metric —
/// switch metrics with [`QualitySettings::set_metric`], which resets the
/// threshold, never by mutating the fields independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub detector: DetectorKind,
    pub metric: Metric,
    /// Match threshold in the selected metric's units.
    pub threshold: f32,
    /// Target number of accepted frames per verification run.
    pub verify_frames: usize,
    /// Target number of accepted samples per enrollment run.
    pub enroll_samples: usize,
    /// Minimum detection confidence in [0, 1].
    pub min_det_score: f32,
    /// Minimum face bounding-box dimension in pixels.
    pub min_face_px: f32,
    /// Minimum variance-of-Laplacian sharpness. Camera-dependent.
    pub min_blur_var: f32,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Accurate,
            metric: Metric::Euclidean,
            threshold: Metric::Euclidean.default_threshold(),
            verify_frames: 12,
            enroll_samples: 18,
            min_det_score: 0.60,
            min_face_px: 140.0,
            min_blur_var: 55.0,
        }
    }
}

impl QualitySettings {
    /// Switch the distance metric, resetting the threshold to the new
    /// metric's default. A threshold tuned for one metric's range must
    /// never be silently reused in the other's.
    pub fn set_metric(&mut self, metric: Metric) {
        self.metric = metric;
        self.threshold = metric.default_threshold();
    }

    /// Set the match threshold, rejecting values outside the current
    /// metric's valid range.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), Error> {
        let range = self.metric.threshold_range();
        if !range.contains(&threshold) {
            return Err(Error::Settings(format!(
                "threshold {threshold:.2} out of range {:.2}..={:.2} for {} metric",
                range.start(),
                range.end(),
                self.metric
            )));
        }
        self.threshold = threshold;
        Ok(())
    }

    /// Validate a full settings value, e.g. after loading from config.
    pub fn validate(&self) -> Result<(), Error> {
        let range = self.metric.threshold_range();
        if !range.contains(&self.threshold) {
            return Err(Error::Settings(format!(
                "threshold {:.2} out of range {:.2}..={:.2} for {} metric",
                self.threshold,
                range.start(),
                range.end(),
                self.metric
            )));
        }
        if !(0.0..=1.0).contains(&self.min_det_score) {
            return Err(Error::Settings(format!(
                "min_det_score {:.2} must be within [0, 1]",
                self.min_det_score
            )));
        }
        if self.verify_frames == 0 || self.enroll_samples == 0 {
            return Err(Error::Settings(
                "verify_frames and enroll_samples must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_euclidean_threshold() {
        let s = QualitySettings::default();
        assert_eq!(s.metric, Metric::Euclidean);
        assert_eq!(s.threshold, 0.60);
        assert_eq!(s.verify_frames, 12);
        assert_eq!(s.enroll_samples, 18);
    }

    #[test]
    fn set_metric_resets_threshold() {
        let mut s = QualitySettings::default();
        s.set_threshold(1.10).unwrap();
        s.set_metric(Metric::Cosine);
        assert_eq!(s.threshold, 0.45);
        // and back
        s.set_metric(Metric::Euclidean);
        assert_eq!(s.threshold, 0.60);
    }

    #[test]
    fn set_threshold_rejects_out_of_range() {
        let mut s = QualitySettings::default();
        assert!(s.set_threshold(1.21).is_err());
        assert!(s.set_threshold(0.29).is_err());
        assert!(s.set_threshold(0.30).is_ok());
        assert!(s.set_threshold(1.20).is_ok());

        s.set_metric(Metric::Cosine);
        assert!(s.set_threshold(0.81).is_err());
        assert!(s.set_threshold(0.05).is_ok());
    }

    #[test]
    fn validate_catches_euclidean_threshold_in_cosine_mode() {
        let s = QualitySettings {
            metric: Metric::Cosine,
            threshold: 1.10, // legal for euclidean, not for cosine
            ..QualitySettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn metric_round_trips_through_str() {
        for m in [Metric::Euclidean, Metric::Cosine] {
            assert_eq!(m.to_string().parse::<Metric>().unwrap(), m);
        }
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
