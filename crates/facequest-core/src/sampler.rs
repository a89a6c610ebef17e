//! Sample collection loop shared by enrollment and verification.
//!
//! Repeats capture → detect → gate until the target number of accepted
//! samples is reached or the attempt budget runs out. What gets
//! accumulated (embeddings for enrollment, distances for verification)
//! and whether the haul is sufficient are both the caller's business —
//! the loop only bounds the work.

use std::time::Duration;

use crate::error::Error;

/// Attempts allowed per flow: `target * ATTEMPT_BUDGET_MULTIPLIER`.
pub const ATTEMPT_BUDGET_MULTIPLIER: usize = 3;

/// Inter-attempt delay during enrollment. Longer than verification:
/// template quality matters more than latency.
pub const ENROLL_ATTEMPT_DELAY: Duration = Duration::from_millis(90);

/// Inter-attempt delay during verification.
pub const VERIFY_ATTEMPT_DELAY: Duration = Duration::from_millis(70);

/// Collect up to `target` accepted samples within `target * 3` attempts.
///
/// `attempt` returns `Ok(Some(sample))` when a frame clears the quality
/// gate, `Ok(None)` on a per-attempt rejection (the loop continues), and
/// `Err` on a collaborator failure (propagated, fatal for this flow).
/// Sleeps `delay` after every attempt, accepted or not.
///
/// May return fewer than `target` samples; judging sufficiency is the
/// caller's responsibility.
pub fn collect<T, F>(target: usize, delay: Duration, mut attempt: F) -> Result<Vec<T>, Error>
where
    F: FnMut() -> Result<Option<T>, Error>,
{
    let budget = target * ATTEMPT_BUDGET_MULTIPLIER;
    let mut samples = Vec::with_capacity(target);
    let mut attempts = 0usize;

    while samples.len() < target && attempts < budget {
        attempts += 1;
        if let Some(sample) = attempt()? {
            samples.push(sample);
            tracing::debug!(accepted = samples.len(), goal = target, attempts, "sample accepted");
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    tracing::debug!(
        accepted = samples.len(),
        goal = target,
        attempts,
        budget,
        "sampling finished"
    );
    Ok(samples)
}
