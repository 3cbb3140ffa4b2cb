// crates/criteriagate-outbox/src/backoff.rs
// ============================================================================
// Module: CriteriaGate Outbox Backoff
// Description: Exponential backoff with jitter for retrying outbox events.
// Purpose: Spread retries across workers instead of thundering-herd retrying
//          in lockstep.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Delay grows as `base * 2^(attempt - 1)`, capped, then jittered by +/-25%
//! so many workers retrying the same failure do not collide.

use rand::Rng;

/// Backoff schedule parameters for outbox retry delay.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds for the first retry.
    pub base_ms: u64,
    /// Maximum delay in milliseconds, regardless of attempt count.
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_ms: 1_000, max_ms: 60_000 }
    }
}

impl BackoffPolicy {
    /// Computes the jittered delay, in milliseconds, before retry number
    /// `retry_count` (1-based: the delay before the *first* retry uses
    /// `retry_count = 1`).
    #[must_use]
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(20);
        let unjittered = self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        jitter(unjittered)
    }
}

/// Applies +/-25% uniform jitter to `delay_ms`.
fn jitter(delay_ms: u64) -> u64 {
    let quarter = delay_ms / 4;
    if quarter == 0 {
        return delay_ms;
    }
    let mut rng = rand::thread_rng();
    let offset = rng.gen_range(0..=(2 * quarter));
    delay_ms.saturating_sub(quarter).saturating_add(offset)
}

#[cfg(test)]
mod tests {
    use super::BackoffPolicy;

    #[test]
    fn delay_grows_with_retry_count() {
        let policy = BackoffPolicy { base_ms: 1_000, max_ms: 60_000 };
        for retry in 1..6 {
            let delay = policy.delay_ms(retry);
            assert!(delay > 0);
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = BackoffPolicy { base_ms: 1_000, max_ms: 5_000 };
        let delay = policy.delay_ms(20);
        assert!(delay <= (5_000 + 5_000 / 4));
    }
}
