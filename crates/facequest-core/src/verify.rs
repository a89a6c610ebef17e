//! Verification decision: many per-frame distances → one match verdict.
//!
//! Two conditions must agree: the median distance sits at or under the
//! threshold AND a supermajority of individual frames pass. Either alone
//! lets a single lucky or unlucky frame flip the outcome when the median
//! lands near the boundary of a scattered distribution.

use crate::error::Error;

/// Absolute floor on usable distances, regardless of target.
const MIN_DISTANCES_FLOOR: usize = 5;
/// Fraction of the target that must be met when it exceeds the floor.
/// Slightly lower than enrollment's — verification tolerates fewer usable
/// frames before giving up.
const MIN_DISTANCES_FRACTION: f64 = 0.4;

/// Fraction of frames that must individually pass the threshold.
const PASS_RATE_FLOOR: f32 = 0.65;

/// One verification run's verdict. Ephemeral; consumed by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationOutcome {
    pub median: f32,
    /// Fraction of frames at or under the threshold, in [0, 1].
    pub pass_rate: f32,
    pub is_match: bool,
    /// Number of usable frames the decision was made from.
    pub sample_count: usize,
}

/// Minimum acceptable distance count for a given frame target.
pub fn min_distances(target: usize) -> usize {
    MIN_DISTANCES_FLOOR.max((target as f64 * MIN_DISTANCES_FRACTION).floor() as usize)
}

/// Decide match/no-match from the collected per-frame distances.
///
/// Fails with [`Error::InsufficientSamples`] when too few frames were
/// usable — reported distinctly from a no-match so the caller can prompt
/// a retry instead of a rejection message.
pub fn decide(distances: &[f32], threshold: f32, target: usize) -> Result<VerificationOutcome, Error> {
    let needed = min_distances(target);
    if distances.len() < needed {
        return Err(Error::InsufficientSamples {
            got: distances.len(),
            needed,
            target,
        });
    }

    let median = median(distances);
    let pass_count = distances.iter().filter(|&&d| d <= threshold).count();
    let pass_rate = pass_count as f32 / distances.len() as f32;
    let is_match = median <= threshold && pass_rate >= PASS_RATE_FLOOR;

    tracing::info!(
        median,
        threshold,
        pass_rate,
        frames = distances.len(),
        is_match,
        "verification decided"
    );

    Ok(VerificationOutcome {
        median,
        pass_rate,
        is_match,
        sample_count: distances.len(),
    })
}

/// Sorted-ascending element at index `floor(n/2)`.
///
/// On even-length input this is the upper-middle value, not the midpoint
/// average. Kept as-is: stored thresholds were tuned against this
/// behavior, and changing it would shift decisions near the boundary.
fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}
