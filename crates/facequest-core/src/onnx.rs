//! Bundled ONNX detector: UltraFace detection + MobileFaceNet embeddings.
//!
//! Two interchangeable detection variants back the accuracy/speed toggle:
//! RFB-320 (accurate) and slim-320 (fast), both 320×240 input with
//! direct score/box outputs. The best-scoring face is cropped and fed to
//! a MobileFaceNet embedder producing a 128-d L2-normalized vector. The
//! pipeline never looks inside either model — it consumes
//! `score / box / embedding` only.

use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::detect::Detector;
use crate::error::Error as CoreError;
use crate::settings::DetectorKind;
use crate::types::{BoundingBox, Detection, Embedding, Frame};

// Detection input geometry and normalization (UltraFace).
const DET_INPUT_WIDTH: u32 = 320;
const DET_INPUT_HEIGHT: u32 = 240;
const DET_MEAN: f32 = 127.0;
const DET_STD: f32 = 128.0;
/// Fixed confidence floor for the fast variant; the accurate variant
/// honors the caller's configured minimum instead.
const FAST_CONFIDENCE_FLOOR: f32 = 0.5;

// Embedder input geometry and normalization (MobileFaceNet — symmetric,
// unlike the detector).
const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
/// Embedding length produced by the bundled embedder.
pub const EMBEDDING_DIM: usize = 128;

/// Fractional margin added around the detected box before embedding,
/// so the crop keeps chin and hairline context.
const CROP_MARGIN: f32 = 0.10;

#[derive(Debug, Error)]
pub enum OnnxError {
    #[error("model file not found: {0} — place the ONNX models in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("frame buffer does not match its dimensions")]
    MalformedFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<OnnxError> for CoreError {
    fn from(err: OnnxError) -> Self {
        CoreError::detector(err)
    }
}

/// Detection model file for a variant.
pub fn detector_model_file(kind: DetectorKind) -> &'static str {
    match kind {
        DetectorKind::Accurate => "version-RFB-320.onnx",
        DetectorKind::Fast => "version-slim-320.onnx",
    }
}

/// Embedder model file.
pub fn embedder_model_file() -> &'static str {
    "mobilefacenet.onnx"
}

/// ONNX-backed face detector + embedder.
pub struct OnnxFaceEngine {
    det_session: Session,
    embed_session: Session,
    kind: DetectorKind,
    /// (scores, boxes) output indices, discovered by name at load time.
    det_outputs: (usize, usize),
}

impl OnnxFaceEngine {
    /// Load both models for the given variant from `model_dir`.
    pub fn load(model_dir: &Path, kind: DetectorKind) -> Result<Self, OnnxError> {
        let det_path = model_dir.join(detector_model_file(kind));
        let embed_path = model_dir.join(embedder_model_file());

        let det_session = load_session(&det_path)?;
        let embed_session = load_session(&embed_path)?;

        let output_names: Vec<String> = det_session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        let det_outputs = discover_det_outputs(&output_names);
        tracing::info!(
            %kind,
            detector = %det_path.display(),
            embedder = %embed_path.display(),
            ?det_outputs,
            "face engine loaded"
        );

        Ok(Self {
            det_session,
            embed_session,
            kind,
            det_outputs,
        })
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect_inner(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<Option<Detection>, OnnxError> {
        let image = frame.to_rgb_image().ok_or(OnnxError::MalformedFrame)?;

        // Straight resize to the model input; coordinates map back by the
        // per-axis scale, no letterboxing.
        let resized = imageops::resize(
            &image,
            DET_INPUT_WIDTH,
            DET_INPUT_HEIGHT,
            FilterType::Triangle,
        );
        let mut input = Array4::<f32>::zeros((
            1,
            3,
            DET_INPUT_HEIGHT as usize,
            DET_INPUT_WIDTH as usize,
        ));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - DET_MEAN) / DET_STD;
            }
        }

        let outputs = self
            .det_session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (score_idx, box_idx) = self.det_outputs;
        let (_, scores) = outputs[score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Inference(format!("scores: {e}")))?;
        let (_, boxes) = outputs[box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Inference(format!("boxes: {e}")))?;

        let floor = match self.kind {
            DetectorKind::Accurate => min_confidence,
            DetectorKind::Fast => FAST_CONFIDENCE_FLOOR,
        };
        let Some((anchor, score)) = best_anchor(scores, floor) else {
            return Ok(None);
        };
        let Some(bbox) = scale_box(boxes, anchor, frame.width, frame.height) else {
            return Ok(None);
        };
        drop(outputs);

        let embedding = self.embed(&image, &bbox)?;

        Ok(Some(Detection {
            score,
            bbox,
            embedding,
            landmarks: None,
        }))
    }

    /// Crop the face (with margin), resize to 112×112, and embed.
    fn embed(&mut self, image: &image::RgbImage, bbox: &BoundingBox) -> Result<Embedding, OnnxError> {
        let (x, y, w, h) = expand_crop(
            bbox,
            image.width(),
            image.height(),
            CROP_MARGIN,
        );
        let crop = imageops::crop_imm(image, x, y, w, h).to_image();
        let face = imageops::resize(&crop, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, FilterType::Triangle);

        let size = EMBED_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (px, py, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, py as usize, px as usize]] =
                    (pixel[c] as f32 - EMBED_MEAN) / EMBED_STD;
            }
        }

        let outputs = self
            .embed_session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Inference(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(OnnxError::Inference(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()).l2_normalize())
    }
}

impl Detector for OnnxFaceEngine {
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Option<Detection>, CoreError> {
        self.detect_inner(frame, min_confidence).map_err(Into::into)
    }
}

fn load_session(path: &Path) -> Result<Session, OnnxError> {
    if !path.exists() {
        return Err(OnnxError::ModelNotFound(path.display().to_string()));
    }
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?)
}

/// Map detector output tensors by name ("scores"/"boxes"), falling back
/// to the conventional positional order when names are unrecognized.
fn discover_det_outputs(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "detector output names not recognized, using positional order");
            (0, 1)
        }
    }
}

/// Highest-confidence anchor at or above `floor`.
///
/// `scores` is [background, face] pairs per anchor, flattened.
fn best_anchor(scores: &[f32], floor: f32) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (anchor, pair) in scores.chunks_exact(2).enumerate() {
        let confidence = pair[1];
        if confidence < floor {
            continue;
        }
        if best.map_or(true, |(_, s)| confidence > s) {
            best = Some((anchor, confidence));
        }
    }
    best
}

/// Convert an anchor's normalized corner box to frame pixel space.
///
/// Returns `None` for inverted or out-of-range boxes (a model glitch,
/// treated as "no usable face" for this frame).
fn scale_box(boxes: &[f32], anchor: usize, frame_w: u32, frame_h: u32) -> Option<BoundingBox> {
    let off = anchor * 4;
    if off + 3 >= boxes.len() {
        return None;
    }
    let x1 = (boxes[off] * frame_w as f32).clamp(0.0, frame_w as f32);
    let y1 = (boxes[off + 1] * frame_h as f32).clamp(0.0, frame_h as f32);
    let x2 = (boxes[off + 2] * frame_w as f32).clamp(0.0, frame_w as f32);
    let y2 = (boxes[off + 3] * frame_h as f32).clamp(0.0, frame_h as f32);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(BoundingBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

/// Expand a box by `margin` on each side, clamped to the image, returned
/// as integer crop coordinates with at least one pixel per side.
///
/// The box must intersect the image (guaranteed by [`scale_box`]).
fn expand_crop(bbox: &BoundingBox, img_w: u32, img_h: u32, margin: f32) -> (u32, u32, u32, u32) {
    let mx = bbox.width * margin;
    let my = bbox.height * margin;
    let x1 = (bbox.x - mx).max(0.0);
    let y1 = (bbox.y - my).max(0.0);
    let x2 = (bbox.x + bbox.width + mx).min(img_w as f32);
    let y2 = (bbox.y + bbox.height + my).min(img_h as f32);

    let x = (x1.floor() as u32).min(img_w - 1);
    let y = (y1.floor() as u32).min(img_h - 1);
    let w = (x2.ceil() as u32).saturating_sub(x).clamp(1, img_w - x);
    let h = (y2.ceil() as u32).saturating_sub(y).clamp(1, img_h - y);
    (x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_files_per_variant() {
        assert_eq!(detector_model_file(DetectorKind::Accurate), "version-RFB-320.onnx");
        assert_eq!(detector_model_file(DetectorKind::Fast), "version-slim-320.onnx");
    }

    #[test]
    fn best_anchor_picks_highest_above_floor() {
        // Three anchors: [bg, face] confidence pairs.
        let scores = [0.9, 0.1, 0.2, 0.8, 0.4, 0.6];
        assert_eq!(best_anchor(&scores, 0.5), Some((1, 0.8)));
    }

    #[test]
    fn best_anchor_none_below_floor() {
        let scores = [0.9, 0.1, 0.8, 0.2];
        assert_eq!(best_anchor(&scores, 0.5), None);
    }

    #[test]
    fn best_anchor_empty_scores() {
        assert_eq!(best_anchor(&[], 0.5), None);
    }

    #[test]
    fn scale_box_maps_to_pixels() {
        let boxes = [0.25, 0.25, 0.75, 0.75];
        let bbox = scale_box(&boxes, 0, 640, 480).unwrap();
        assert_eq!(bbox.x, 160.0);
        assert_eq!(bbox.y, 120.0);
        assert_eq!(bbox.width, 320.0);
        assert_eq!(bbox.height, 240.0);
    }

    #[test]
    fn scale_box_rejects_inverted_box() {
        let boxes = [0.75, 0.25, 0.25, 0.75]; // x2 < x1
        assert!(scale_box(&boxes, 0, 640, 480).is_none());
    }

    #[test]
    fn scale_box_rejects_out_of_range_anchor() {
        let boxes = [0.1, 0.1, 0.2, 0.2];
        assert!(scale_box(&boxes, 1, 640, 480).is_none());
    }

    #[test]
    fn scale_box_clamps_overflowing_coordinates() {
        let boxes = [-0.1, -0.1, 1.1, 1.1];
        let bbox = scale_box(&boxes, 0, 100, 100).unwrap();
        assert_eq!(bbox.x, 0.0);
        assert_eq!(bbox.y, 0.0);
        assert_eq!(bbox.width, 100.0);
        assert_eq!(bbox.height, 100.0);
    }

    #[test]
    fn expand_crop_adds_margin_and_clamps() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 100.0,
        };
        let (x, y, w, h) = expand_crop(&bbox, 640, 480, 0.10);
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (120, 120));
    }

    #[test]
    fn expand_crop_never_escapes_image() {
        let bbox = BoundingBox {
            x: 600.0,
            y: 440.0,
            width: 100.0,
            height: 100.0,
        };
        let (x, y, w, h) = expand_crop(&bbox, 640, 480, 0.10);
        assert!(x + w <= 640);
        assert!(y + h <= 480);
        assert!(w >= 1 && h >= 1);
    }

    #[test]
    fn discover_outputs_by_name_or_position() {
        let named: Vec<String> = ["boxes", "scores"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_det_outputs(&named), (1, 0));

        let generic: Vec<String> = ["428", "429"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_det_outputs(&generic), (0, 1));
    }
}
