//! Enrollment aggregation: many accepted samples → one stored template.

use chrono::Utc;

use crate::error::Error;
use crate::settings::QualitySettings;
use crate::types::{Embedding, EnrolledTemplate, TEMPLATE_VERSION};

/// Absolute floor on accepted samples, regardless of target.
const MIN_SAMPLES_FLOOR: usize = 6;
/// Fraction of the target that must be met when it exceeds the floor.
const MIN_SAMPLES_FRACTION: f64 = 0.35;

/// Minimum acceptable sample count for a given enrollment target.
pub fn min_samples(target: usize) -> usize {
    MIN_SAMPLES_FLOOR.max((target as f64 * MIN_SAMPLES_FRACTION).floor() as usize)
}

/// Reduce the accepted enrollment samples to a single template.
///
/// Fails with [`Error::InsufficientSamples`] when the batch is too small —
/// the caller surfaces a retry prompt; nothing is written. All samples
/// must share one embedding length; a mismatch is a programming-contract
/// violation upstream (the detector model is fixed for a run) and panics.
pub fn aggregate(
    samples: &[Embedding],
    settings: &QualitySettings,
) -> Result<EnrolledTemplate, Error> {
    let target = settings.enroll_samples;
    let needed = min_samples(target);
    if samples.len() < needed {
        return Err(Error::InsufficientSamples {
            got: samples.len(),
            needed,
            target,
        });
    }

    Ok(EnrolledTemplate {
        version: TEMPLATE_VERSION,
        created_at: Utc::now(),
        detector: settings.detector,
        metric: settings.metric,
        embedding: mean_embedding(samples),
        sample_count: samples.len(),
    })
}

/// Per-coordinate arithmetic mean across the batch.
fn mean_embedding(samples: &[Embedding]) -> Embedding {
    let len = samples[0].len();
    let mut out = vec![0.0f32; len];
    for sample in samples {
        assert_eq!(
            sample.len(),
            len,
            "embedding length mismatch in enrollment batch: {} vs {}",
            sample.len(),
            len
        );
        for (acc, v) in out.iter_mut().zip(sample.values.iter()) {
            *acc += v;
        }
    }
    let n = samples.len() as f32;
    for acc in &mut out {
        *acc /= n;
    }
    Embedding::new(out)
}
