//! Per-frame quality gate.
//!
//! The detection score alone is not enough to trust an embedding — a
//! confident detection of a small or blurry face still embeds poorly.
//! Three independent checks catch the distinct failure modes (wrong or no
//! subject, too far away, motion blur); a frame's embedding is only used
//! when all of them pass.

use std::fmt;

use crate::settings::QualitySettings;
use crate::sharpness;
use crate::types::{Detection, Embedding, Frame};

/// Why a frame was rejected. One reason per attempt; never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoFace,
    LowConfidence { score: f32, min: f32 },
    FaceTooSmall { width: f32, height: f32, min: f32 },
    TooBlurry { variance: f32, min: f32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoFace => write!(f, "no face detected"),
            Rejection::LowConfidence { score, min } => {
                write!(f, "low detection score ({score:.2} < {min:.2})")
            }
            Rejection::FaceTooSmall { width, height, min } => {
                write!(
                    f,
                    "face too small ({:.0}x{:.0}px < {min:.0}px) — move closer",
                    width, height
                )
            }
            Rejection::TooBlurry { variance, min } => {
                write!(f, "image too blurry (variance {variance:.0} < {min:.0})")
            }
        }
    }
}

/// Evaluate one detection against the quality settings.
///
/// Checks run in order and short-circuit on the first failure. The
/// sharpness check is skipped when the crop is degenerate after clamping
/// to the frame — deliberately lenient rather than a rejection.
pub fn evaluate(
    detection: Option<&Detection>,
    settings: &QualitySettings,
    frame: &Frame,
) -> Result<Embedding, Rejection> {
    let Some(det) = detection else {
        return reject(Rejection::NoFace);
    };

    if det.score < settings.min_det_score {
        return reject(Rejection::LowConfidence {
            score: det.score,
            min: settings.min_det_score,
        });
    }

    if det.bbox.width < settings.min_face_px || det.bbox.height < settings.min_face_px {
        return reject(Rejection::FaceTooSmall {
            width: det.bbox.width,
            height: det.bbox.height,
            min: settings.min_face_px,
        });
    }

    if let Some(variance) = sharpness::blur_variance(frame, &det.bbox) {
        if variance < settings.min_blur_var {
            return reject(Rejection::TooBlurry {
                variance,
                min: settings.min_blur_var,
            });
        }
    }

    Ok(det.embedding.clone())
}

fn reject(rejection: Rejection) -> Result<Embedding, Rejection> {
    tracing::warn!(%rejection, "frame rejected");
    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    // A frame sharp enough to clear any sane blur threshold: an 8px
    // block checkerboard, whose edges survive the gate's downsampling.
    fn sharp_frame() -> Frame {
        let width = 320u32;
        let height = 240u32;
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame {
            data,
            width,
            height,
        }
    }

    fn uniform_frame() -> Frame {
        Frame {
            data: vec![128; 320 * 240 * 3],
            width: 320,
            height: 240,
        }
    }

    fn passing_detection() -> Detection {
        Detection {
            score: 0.95,
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 200.0,
                height: 200.0,
            },
            embedding: Embedding::new(vec![0.1; 8]),
            landmarks: None,
        }
    }

    fn settings() -> QualitySettings {
        QualitySettings::default()
    }

    #[test]
    fn accepts_good_detection() {
        let frame = sharp_frame();
        let emb = evaluate(Some(&passing_detection()), &settings(), &frame).unwrap();
        assert_eq!(emb.values.len(), 8);
    }

    #[test]
    fn rejects_missing_detection() {
        let frame = sharp_frame();
        assert_eq!(
            evaluate(None, &settings(), &frame).unwrap_err(),
            Rejection::NoFace
        );
    }

    #[test]
    fn rejects_low_score_independently() {
        let frame = sharp_frame();
        let mut det = passing_detection();
        det.score = 0.40;
        assert!(matches!(
            evaluate(Some(&det), &settings(), &frame).unwrap_err(),
            Rejection::LowConfidence { .. }
        ));
    }

    #[test]
    fn rejects_small_width_independently() {
        let frame = sharp_frame();
        let mut det = passing_detection();
        det.bbox.width = 100.0;
        assert!(matches!(
            evaluate(Some(&det), &settings(), &frame).unwrap_err(),
            Rejection::FaceTooSmall { .. }
        ));
    }

    #[test]
    fn rejects_small_height_independently() {
        let frame = sharp_frame();
        let mut det = passing_detection();
        det.bbox.height = 100.0;
        assert!(matches!(
            evaluate(Some(&det), &settings(), &frame).unwrap_err(),
            Rejection::FaceTooSmall { .. }
        ));
    }

    #[test]
    fn rejects_blurry_crop_independently() {
        let frame = uniform_frame();
        let det = passing_detection();
        assert!(matches!(
            evaluate(Some(&det), &settings(), &frame).unwrap_err(),
            Rejection::TooBlurry { .. }
        ));
    }

    #[test]
    fn skips_sharpness_when_crop_degenerate() {
        // Box entirely outside the frame: blur is not measurable, so the
        // detection passes on the other checks alone.
        let frame = uniform_frame();
        let mut det = passing_detection();
        det.bbox.x = 1000.0;
        det.bbox.y = 1000.0;
        assert!(evaluate(Some(&det), &settings(), &frame).is_ok());
    }

    #[test]
    fn check_order_score_before_size() {
        let frame = sharp_frame();
        let mut det = passing_detection();
        det.score = 0.10;
        det.bbox.width = 10.0; // would also fail the size check
        assert!(matches!(
            evaluate(Some(&det), &settings(), &frame).unwrap_err(),
            Rejection::LowConfidence { .. }
        ));
    }
}
