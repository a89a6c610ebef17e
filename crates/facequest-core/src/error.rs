use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pipeline errors.
///
/// Per-attempt quality rejections are not represented here — they are
/// logged and the sampling loop moves on. These variants are the outcomes
/// a caller must handle: flow-level insufficiency, the missing-template
/// precondition, bad settings, and fatal collaborator failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Verification requested with no stored template. Rejected before the
    /// sampling loop starts.
    #[error("no enrolled template — teach a face first")]
    NotEnrolled,

    /// Too few accepted samples within the attempt budget. Distinct from a
    /// no-match decision; the caller should retry the whole flow.
    #[error("only {got}/{target} usable samples (need at least {needed})")]
    InsufficientSamples {
        got: usize,
        needed: usize,
        target: usize,
    },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("camera failure")]
    Camera(#[source] BoxError),

    #[error("detector failure")]
    Detector(#[source] BoxError),

    #[error("template store failure")]
    Store(#[source] BoxError),
}

impl Error {
    pub fn camera<E: Into<BoxError>>(source: E) -> Self {
        Error::Camera(source.into())
    }

    pub fn detector<E: Into<BoxError>>(source: E) -> Self {
        Error::Detector(source.into())
    }

    pub fn store<E: Into<BoxError>>(source: E) -> Self {
        Error::Store(source.into())
    }
}
