//! Detector capability.
//!
//! The face model itself is an opaque external capability: the pipeline
//! only consumes `score / box / embedding`. The trait keeps the core
//! testable with scripted detections; the bundled ONNX implementation
//! lives in [`crate::onnx`].

use crate::error::Error;
use crate::types::{Detection, Frame};

/// A face detector + embedder.
///
/// `detect` may block on inference. Returns `Ok(None)` when no face
/// clears the model's own confidence floor — a per-attempt outcome, not
/// an error. `Err` means the collaborator itself failed and the current
/// flow must abort.
pub trait Detector {
    /// Detect the most prominent face in `frame`.
    ///
    /// `min_confidence` is the caller's requested confidence floor;
    /// variants with a fixed internal floor may ignore it.
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Option<Detection>, Error>;
}
