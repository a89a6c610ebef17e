//! facequest-core — Quality-gated multi-frame face enrollment and verification.
//!
//! The pipeline collects many independent per-frame face detections, filters
//! each through a quality gate (confidence, face size, sharpness), and makes
//! the enroll/verify decision from the whole batch: descriptor averaging for
//! enrollment, median + pass-rate voting for verification. The camera,
//! detector, template store, and outcome relay are capability traits so the
//! pipeline can be driven with scripted fakes in tests.

pub mod detect;
pub mod enroll;
pub mod error;
pub mod flow;
pub mod gate;
pub mod onnx;
pub mod sampler;
pub mod settings;
pub mod sharpness;
pub mod types;
pub mod verify;

pub use detect::Detector;
pub use error::Error;
pub use flow::{FrameSource, OutcomeSink, TemplateStore};
pub use settings::{DetectorKind, Metric, QualitySettings};
pub use types::{BoundingBox, Detection, Embedding, EnrolledTemplate, Frame, OutcomeCode};
pub use verify::VerificationOutcome;
