//! Token bucket and sliding window arithmetic.
//!
//! # Tiger Style
//!
//! - Time is passed explicitly (no calls to system time)
//! - Saturating arithmetic on timestamps
//! - Token counts are clamped to `[0, capacity]` on every step

use rampart_constants::api::MAX_TTL_MS;

// ============================================================================
// Token Bucket
// ============================================================================

/// Tokens after refilling from `last_refill_ms` to `now_ms`.
///
/// The stored count is clamped first, so a bucket written under a larger
/// capacity shrinks to the current one. A clock that moved backwards adds
/// nothing.
///
/// ```ignore
/// // 1 second elapsed at 10 tokens/sec
/// let tokens = replenish(0.0, 1000, 2000, 10.0, 100);
/// assert!((tokens - 10.0).abs() < 0.001);
/// ```
#[inline]
pub fn replenish(tokens: f64, last_refill_ms: u64, now_ms: u64, refill_rate: f64, capacity: u64) -> f64 {
    let capacity = capacity as f64;
    let current = tokens.clamp(0.0, capacity);
    let elapsed_secs = now_ms.saturating_sub(last_refill_ms) as f64 / 1000.0;
    (current + elapsed_secs * refill_rate.max(0.0)).min(capacity)
}

/// Outcome of taking one token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenAvailability {
    /// A token was taken.
    Available {
        /// Fractional tokens left in the bucket.
        remaining: f64,
    },
    /// Fewer than one token is left.
    Exhausted {
        /// Whole tokens available (always 0 for a single-token request).
        available: u64,
        /// Wait until one token has refilled.
        retry_after_ms: u64,
    },
}

impl TokenAvailability {
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, TokenAvailability::Available { .. })
    }
}

/// Take `requested` tokens from `available`.
///
/// With a zero refill rate an exhausted bucket never recovers and
/// `retry_after_ms` saturates.
#[inline]
pub fn take_tokens(available: f64, requested: u64, refill_rate: f64) -> TokenAvailability {
    let requested_f = requested as f64;
    if requested_f <= available {
        return TokenAvailability::Available {
            remaining: available - requested_f,
        };
    }
    TokenAvailability::Exhausted {
        available: available.max(0.0) as u64,
        retry_after_ms: ms_to_accumulate(requested_f - available, refill_rate),
    }
}

/// Milliseconds until the bucket is back to `capacity`.
#[inline]
pub fn time_until_full_ms(tokens: f64, capacity: u64, refill_rate: f64) -> u64 {
    ms_to_accumulate((capacity as f64 - tokens).max(0.0), refill_rate)
}

/// Record TTL: time for an empty bucket to refill, plus `grace_ms`, capped at
/// the store's TTL bound.
///
/// A bucket whose record expired is indistinguishable from a full one.
#[inline]
pub fn bucket_ttl_ms(capacity: u64, refill_rate: f64, grace_ms: u64) -> u64 {
    time_until_full_ms(0.0, capacity, refill_rate)
        .saturating_add(grace_ms)
        .min(MAX_TTL_MS)
}

fn ms_to_accumulate(deficit: f64, refill_rate: f64) -> u64 {
    if deficit <= 0.0 {
        return 0;
    }
    if refill_rate <= 0.0 {
        return u64::MAX;
    }
    // f64 -> u64 casts saturate
    (deficit / refill_rate * 1000.0).ceil() as u64
}

// ============================================================================
// Sliding Window
// ============================================================================

/// Drop timestamps at or before `now_ms - window_ms`.
///
/// Returns the number of entries removed. Timestamps must be sorted
/// ascending.
#[inline]
pub fn prune_window(timestamps_ms: &mut Vec<u64>, now_ms: u64, window_ms: u64) -> usize {
    let cutoff = now_ms.saturating_sub(window_ms);
    let keep_from = timestamps_ms.partition_point(|&ts| ts <= cutoff);
    timestamps_ms.drain(..keep_from);
    keep_from
}

/// Outcome of a sliding window check on a pruned log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAdmission {
    Admitted {
        /// Requests still allowed in the current window.
        remaining: u64,
        /// When the last admitted request leaves the window.
        reset_after_ms: u64,
    },
    Rejected {
        /// When the oldest request leaves the window.
        retry_after_ms: u64,
        reset_after_ms: u64,
    },
}

/// Admit `now_ms` into an already pruned log if it holds fewer than `limit`
/// entries. Appends on admission.
pub fn admit_to_window(timestamps_ms: &mut Vec<u64>, now_ms: u64, window_ms: u64, limit: u64) -> WindowAdmission {
    let count = timestamps_ms.len() as u64;
    if count < limit {
        // Keep the log sorted when clocks disagree between processes.
        let pos = timestamps_ms.partition_point(|&ts| ts <= now_ms);
        timestamps_ms.insert(pos, now_ms);
        return WindowAdmission::Admitted {
            remaining: limit - count - 1,
            reset_after_ms: leaves_window_in(timestamps_ms.last().copied(), now_ms, window_ms),
        };
    }
    WindowAdmission::Rejected {
        retry_after_ms: leaves_window_in(timestamps_ms.first().copied(), now_ms, window_ms),
        reset_after_ms: leaves_window_in(timestamps_ms.last().copied(), now_ms, window_ms),
    }
}

/// Milliseconds until `ts` drops out of a window ending at `now_ms`.
#[inline]
fn leaves_window_in(ts: Option<u64>, now_ms: u64, window_ms: u64) -> u64 {
    match ts {
        Some(ts) => ts.saturating_add(window_ms).saturating_sub(now_ms).max(1),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn replenish_one_second() {
        let tokens = replenish(0.0, 1000, 2000, 10.0, 100);
        assert!((tokens - 10.0).abs() < 0.001);
    }

    #[test]
    fn replenish_caps_at_capacity() {
        let tokens = replenish(90.0, 1000, 2000, 100.0, 100);
        assert_eq!(tokens, 100.0);
    }

    #[test]
    fn replenish_clock_went_backwards() {
        let tokens = replenish(3.0, 2000, 1000, 10.0, 100);
        assert_eq!(tokens, 3.0);
    }

    #[test]
    fn replenish_shrinks_to_new_capacity() {
        let tokens = replenish(50.0, 1000, 1000, 1.0, 10);
        assert_eq!(tokens, 10.0);
    }

    #[test]
    fn take_exact_last_token() {
        assert_eq!(take_tokens(1.0, 1, 1.0), TokenAvailability::Available { remaining: 0.0 });
    }

    #[test]
    fn take_from_fractional_bucket() {
        // 0.5 short at 10/sec = 50ms
        assert_eq!(take_tokens(0.5, 1, 10.0), TokenAvailability::Exhausted {
            available: 0,
            retry_after_ms: 50,
        });
    }

    #[test]
    fn zero_refill_never_recovers() {
        match take_tokens(0.0, 1, 0.0) {
            TokenAvailability::Exhausted { retry_after_ms, .. } => assert_eq!(retry_after_ms, u64::MAX),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn bucket_ttl_covers_full_refill() {
        // 5 tokens at 1/sec = 5s, plus grace
        assert_eq!(bucket_ttl_ms(5, 1.0, 60_000), 65_000);
        assert_eq!(bucket_ttl_ms(10, 4.0, 0), 2_500);
    }

    #[test]
    fn bucket_ttl_is_capped_at_store_maximum() {
        // 100 tokens per 30 days
        let rate = 100.0 / (30.0 * 86_400.0);
        assert_eq!(bucket_ttl_ms(100, rate, 60_000), MAX_TTL_MS);
    }

    #[test]
    fn prune_drops_boundary_entry() {
        let mut log = vec![100, 200, 300];
        // cutoff = 1200 - 1000 = 200, so 100 and 200 are out
        assert_eq!(prune_window(&mut log, 1200, 1000), 2);
        assert_eq!(log, vec![300]);
    }

    #[test]
    fn window_admits_up_to_limit() {
        let mut log = Vec::new();
        for i in 0..3u64 {
            match admit_to_window(&mut log, 1000 + i, 1000, 3) {
                WindowAdmission::Admitted { remaining, .. } => assert_eq!(remaining, 2 - i),
                other => panic!("request {i} rejected: {other:?}"),
            }
        }
        match admit_to_window(&mut log, 1500, 1000, 3) {
            WindowAdmission::Rejected { retry_after_ms, .. } => {
                // oldest (1000) leaves at 2000
                assert_eq!(retry_after_ms, 500);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn window_keeps_log_sorted() {
        let mut log = vec![100, 300];
        admit_to_window(&mut log, 200, 1000, 10);
        assert_eq!(log, vec![100, 200, 300]);
    }

    proptest! {
        #[test]
        fn replenish_stays_within_bounds(
            tokens in -10.0f64..1_000.0,
            last in 0u64..10_000_000,
            now in 0u64..10_000_000,
            rate in 0.0f64..1_000.0,
            capacity in 0u64..10_000,
        ) {
            let result = replenish(tokens, last, now, rate, capacity);
            prop_assert!(result >= 0.0);
            prop_assert!(result <= capacity as f64);
        }

        #[test]
        fn replenish_is_monotonic_in_time(base in 0u64..1_000_000, d1 in 0u64..100_000, d2 in 0u64..100_000) {
            let now1 = base + d1;
            let now2 = now1 + d2;
            prop_assert!(replenish(0.0, base, now2, 10.0, 100) >= replenish(0.0, base, now1, 10.0, 100));
        }

        #[test]
        fn window_never_exceeds_limit(limit in 1u64..50, times in proptest::collection::vec(0u64..5_000, 0..200)) {
            let mut sorted = times;
            sorted.sort_unstable();
            let mut log = Vec::new();
            for now in sorted {
                prune_window(&mut log, now, 1_000);
                admit_to_window(&mut log, now, 1_000, limit);
                prop_assert!(log.len() as u64 <= limit);
            }
        }
    }
}
