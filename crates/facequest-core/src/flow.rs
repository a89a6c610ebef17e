//! Enrollment, verification, and reset flows.
//!
//! The camera, template store, and outcome relay are capability traits —
//! like the detector, they are collaborators the pipeline drives through
//! a minimal method set, so every flow can run against deterministic
//! fakes. The flows are synchronous and assume at most one is in flight
//! at a time; the daemon enforces that by construction (a single engine
//! thread consuming one request queue). Callers embedding this crate
//! elsewhere must provide the same serialization.

use chrono::{DateTime, Utc};

use crate::detect::Detector;
use crate::error::Error;
use crate::gate;
use crate::sampler::{self, ENROLL_ATTEMPT_DELAY, VERIFY_ATTEMPT_DELAY};
use crate::settings::QualitySettings;
use crate::types::{EnrolledTemplate, Frame, OutcomeCode};
use crate::verify::{self, VerificationOutcome};
use crate::{enroll, Metric};

/// Produces the current camera frame. May block on capture.
pub trait FrameSource {
    fn frame(&mut self) -> Result<Frame, Error>;
}

/// Holds the single enrolled template. A completed `put` must be durably
/// visible to a subsequent `get`; at most one record exists at all times.
pub trait TemplateStore {
    fn put(&mut self, template: &EnrolledTemplate) -> Result<(), Error>;
    fn get(&self) -> Result<Option<EnrolledTemplate>, Error>;
    fn delete(&mut self) -> Result<(), Error>;
}

/// Relays a result code to external hardware or the UI.
///
/// Delivery is best-effort: implementations log failures and never
/// propagate them — a dropped notification must not roll back a decision.
pub trait OutcomeSink {
    fn send(&mut self, code: OutcomeCode);
}

/// Sink for deployments without an uplink attached.
pub struct NullSink;

impl OutcomeSink for NullSink {
    fn send(&mut self, _code: OutcomeCode) {}
}

/// Summary of a completed enrollment, for status display.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub sample_count: usize,
    pub created_at: DateTime<Utc>,
    pub metric: Metric,
}

/// Run one enrollment: collect gated samples, average them, persist the
/// template (replacing any prior one), and announce the result.
pub fn run_enrollment(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    store: &mut dyn TemplateStore,
    sink: &mut dyn OutcomeSink,
    settings: &QualitySettings,
) -> Result<EnrollmentReport, Error> {
    settings.validate()?;
    tracing::info!(
        samples_target = settings.enroll_samples,
        detector = %settings.detector,
        "enrollment started"
    );

    let samples = sampler::collect(settings.enroll_samples, ENROLL_ATTEMPT_DELAY, || {
        let frame = source.frame()?;
        let detection = detector.detect(&frame, settings.min_det_score)?;
        Ok(gate::evaluate(detection.as_ref(), settings, &frame).ok())
    })?;

    let template = enroll::aggregate(&samples, settings)?;
    store.put(&template)?;

    tracing::info!(
        samples = template.sample_count,
        metric = %template.metric,
        "enrollment saved"
    );
    sink.send(OutcomeCode::Enrolled);

    Ok(EnrollmentReport {
        sample_count: template.sample_count,
        created_at: template.created_at,
        metric: template.metric,
    })
}

/// Run one verification against the stored template.
///
/// Fails fast with [`Error::NotEnrolled`] before touching the camera when
/// no template exists. Distances are computed under the settings snapshot's
/// metric; the template's recorded metric is capture-time metadata. The
/// settings layer keeps threshold and metric paired.
pub fn run_verification(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    store: &mut dyn TemplateStore,
    sink: &mut dyn OutcomeSink,
    settings: &QualitySettings,
) -> Result<VerificationOutcome, Error> {
    settings.validate()?;
    let Some(template) = store.get()? else {
        return Err(Error::NotEnrolled);
    };

    tracing::info!(
        frames_target = settings.verify_frames,
        metric = %settings.metric,
        threshold = settings.threshold,
        "verification started"
    );

    let distances = sampler::collect(settings.verify_frames, VERIFY_ATTEMPT_DELAY, || {
        let frame = source.frame()?;
        let detection = detector.detect(&frame, settings.min_det_score)?;
        match gate::evaluate(detection.as_ref(), settings, &frame) {
            Ok(embedding) => {
                let distance = settings.metric.distance(&embedding, &template.embedding);
                tracing::debug!(distance, "frame distance");
                Ok(Some(distance))
            }
            Err(_) => Ok(None),
        }
    })?;

    let outcome = verify::decide(&distances, settings.threshold, settings.verify_frames)?;
    sink.send(if outcome.is_match {
        OutcomeCode::Match
    } else {
        OutcomeCode::NoMatch
    });
    Ok(outcome)
}

/// Delete the stored template and announce the reset.
pub fn run_reset(store: &mut dyn TemplateStore, sink: &mut dyn OutcomeSink) -> Result<(), Error> {
    store.delete()?;
    tracing::info!("enrollment cleared");
    sink.send(OutcomeCode::Cleared);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Detection, Embedding};

    // -- deterministic fakes -------------------------------------------------

    /// Yields a fixed sharp frame forever (8px block checkerboard, so
    /// edges survive the sharpness check's downsampling).
    struct StaticFrames;

    impl FrameSource for StaticFrames {
        fn frame(&mut self) -> Result<Frame, Error> {
            let width = 320u32;
            let height = 240u32;
            let mut data = Vec::with_capacity((width * height * 3) as usize);
            for y in 0..height {
                for x in 0..width {
                    let v = if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 };
                    data.extend_from_slice(&[v, v, v]);
                }
            }
            Ok(Frame {
                data,
                width,
                height,
            })
        }
    }

    /// Replays a scripted sequence of detections, then repeats the last.
    struct ScriptedDetector {
        script: Vec<Option<Detection>>,
        cursor: usize,
    }

    impl ScriptedDetector {
        fn repeating(det: Option<Detection>) -> Self {
            Self {
                script: vec![det],
                cursor: 0,
            }
        }

        fn sequence(script: Vec<Option<Detection>>) -> Self {
            Self { script, cursor: 0 }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame, _min: f32) -> Result<Option<Detection>, Error> {
            let det = self.script[self.cursor.min(self.script.len() - 1)].clone();
            self.cursor += 1;
            Ok(det)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        template: Option<EnrolledTemplate>,
        puts: usize,
    }

    impl TemplateStore for MemoryStore {
        fn put(&mut self, template: &EnrolledTemplate) -> Result<(), Error> {
            self.template = Some(template.clone());
            self.puts += 1;
            Ok(())
        }

        fn get(&self) -> Result<Option<EnrolledTemplate>, Error> {
            Ok(self.template.clone())
        }

        fn delete(&mut self) -> Result<(), Error> {
            self.template = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        codes: Vec<OutcomeCode>,
    }

    impl OutcomeSink for RecordingSink {
        fn send(&mut self, code: OutcomeCode) {
            self.codes.push(code);
        }
    }

    fn good_detection(embedding: &[f32]) -> Detection {
        Detection {
            score: 0.95,
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 200.0,
                height: 200.0,
            },
            embedding: Embedding::new(embedding.to_vec()),
            landmarks: None,
        }
    }

    /// Settings with zero-ish targets are invalid, so tests shrink the
    /// delay cost by keeping the defaults (18/12) and fast fakes.
    fn settings() -> QualitySettings {
        QualitySettings::default()
    }

    // -- tests ---------------------------------------------------------------

    #[test]
    fn enroll_then_verify_same_face_matches() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();
        let s = settings();

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        let report =
            run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        assert_eq!(report.sample_count, 18);
        assert!(store.template.is_some());

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        let outcome =
            run_verification(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        assert!(outcome.is_match);
        assert!(outcome.median.abs() < 1e-6);
        assert_eq!(outcome.pass_rate, 1.0);

        assert_eq!(sink.codes, vec![OutcomeCode::Enrolled, OutcomeCode::Match]);
    }

    #[test]
    fn verification_of_different_face_is_no_match() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();
        let s = settings();

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();

        // Far-away embedding: euclidean distance = sqrt(8 * 4) ≈ 5.7.
        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[2.5; 8])));
        let outcome =
            run_verification(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        assert!(!outcome.is_match);
        assert_eq!(outcome.pass_rate, 0.0);
        assert_eq!(sink.codes.last(), Some(&OutcomeCode::NoMatch));
    }

    #[test]
    fn verify_without_template_fails_precondition_before_sampling() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();

        struct PanicDetector;
        impl Detector for PanicDetector {
            fn detect(&mut self, _: &Frame, _: f32) -> Result<Option<Detection>, Error> {
                panic!("sampling loop must not run without a template");
            }
        }

        let err = run_verification(
            &mut source,
            &mut PanicDetector,
            &mut store,
            &mut sink,
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotEnrolled));
        assert!(sink.codes.is_empty());
    }

    #[test]
    fn insufficient_enrollment_samples_leaves_store_untouched() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();

        // 5 usable detections, then nothing: below max(6, floor(18*0.35)).
        let mut script: Vec<Option<Detection>> =
            (0..5).map(|_| Some(good_detection(&[0.5; 8]))).collect();
        script.push(None);
        let mut detector = ScriptedDetector::sequence(script);

        let err = run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &settings())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSamples {
                got: 5,
                needed: 6,
                ..
            }
        ));
        assert!(store.template.is_none(), "nothing written on failure");
        assert_eq!(store.puts, 0);
        assert!(sink.codes.is_empty());
    }

    #[test]
    fn reset_clears_template_and_notifies() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();
        let s = settings();

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();

        run_reset(&mut store, &mut sink).unwrap();
        assert!(store.template.is_none());
        assert_eq!(sink.codes.last(), Some(&OutcomeCode::Cleared));

        // Subsequent verification fails the precondition, not the loop.
        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        let err = run_verification(&mut source, &mut detector, &mut store, &mut sink, &s)
            .unwrap_err();
        assert!(matches!(err, Error::NotEnrolled));
    }

    #[test]
    fn re_enrollment_replaces_template_wholesale() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();
        let s = settings();

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        let first = store.template.clone().unwrap();

        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.9; 8])));
        run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        let second = store.template.clone().unwrap();

        assert_eq!(store.puts, 2);
        assert_ne!(first.embedding, second.embedding);
        assert_eq!(second.embedding.values, vec![0.9; 8]);
    }

    #[test]
    fn verification_under_cosine_metric() {
        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();

        let mut s = settings();
        s.set_metric(Metric::Cosine);
        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[0.5; 8])));
        run_enrollment(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();

        // A scaled copy of the enrolled direction: cosine distance 0 even
        // though the euclidean distance would be large.
        let mut detector = ScriptedDetector::repeating(Some(good_detection(&[5.0; 8])));
        let outcome =
            run_verification(&mut source, &mut detector, &mut store, &mut sink, &s).unwrap();
        assert!(outcome.is_match);
        assert!(outcome.median.abs() < 1e-5);
    }

    #[test]
    fn detector_failure_aborts_the_flow() {
        struct FailingDetector;
        impl Detector for FailingDetector {
            fn detect(&mut self, _: &Frame, _: f32) -> Result<Option<Detection>, Error> {
                Err(Error::detector(std::io::Error::other("inference died")))
            }
        }

        let mut source = StaticFrames;
        let mut store = MemoryStore::default();
        let mut sink = RecordingSink::default();
        let err = run_enrollment(
            &mut source,
            &mut FailingDetector,
            &mut store,
            &mut sink,
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Detector(_)));
        assert!(store.template.is_none());
    }
}
