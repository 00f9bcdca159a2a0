//! Rate admission control.
//!
//! Two algorithms share one call shape, `check(identity, capacity,
//! refill_rate)`:
//!
//! - [`TokenBucketLimiter`]: bursts up to `capacity`, refills continuously at
//!   `refill_rate` tokens per second
//! - [`SlidingWindowLimiter`]: at most `capacity` requests in any rolling
//!   window of `capacity / refill_rate` seconds
//!
//! Each admission scope is configured with exactly one of them.
//! [`AdmissionController`] adds tiers and the local fallback used while the
//! coordination store is unreachable.

mod controller;
mod decision;
mod local;
mod sliding_window;
mod tier;
mod token_bucket;

use serde::Deserialize;
use serde::Serialize;

pub use controller::AdmissionConfig;
pub use controller::AdmissionController;
pub use decision::DecisionSource;
pub use decision::RateDecision;
pub use local::LocalWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use tier::Tier;
pub use tier::TierLimits;
pub use tier::TierTable;
pub use token_bucket::TokenBucketLimiter;

use rampart_constants::api::MAX_TTL_MS;
use rampart_constants::coordination::BUCKET_TTL_GRACE_MS;
use rampart_constants::coordination::MAX_WINDOW_LIMIT;

use crate::error::CoordinationError;
use crate::pure::escape_key_segment;
use crate::pure::rate_limiter::time_until_full_ms;

/// Algorithm used by one admission scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitAlgorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

impl std::str::FromStr for LimitAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_bucket" => Ok(LimitAlgorithm::TokenBucket),
            "sliding_window" => Ok(LimitAlgorithm::SlidingWindow),
            other => Err(format!("unknown rate limit algorithm '{other}'")),
        }
    }
}

impl LimitAlgorithm {
    /// Check that `capacity` and `refill_rate` can be enforced by this
    /// algorithm without the store record expiring early.
    ///
    /// Stricter than the per-call check: a token bucket whose refill outlasts
    /// the store's TTL bound is still served, but an idle bucket then restarts
    /// full.
    pub fn check_limits(self, capacity: u64, refill_rate: f64) -> Result<(), CoordinationError> {
        validate_limits(capacity, refill_rate)?;
        match self {
            LimitAlgorithm::TokenBucket => {
                let refill_ms = time_until_full_ms(0.0, capacity, refill_rate);
                if refill_ms.saturating_add(BUCKET_TTL_GRACE_MS) > MAX_TTL_MS {
                    return Err(CoordinationError::InvalidConfig {
                        reason: format!("bucket refill of {refill_ms}ms outlasts the store TTL bound"),
                    });
                }
            }
            LimitAlgorithm::SlidingWindow => {
                if capacity > MAX_WINDOW_LIMIT {
                    return Err(CoordinationError::InvalidConfig {
                        reason: format!("window limit {capacity} exceeds {MAX_WINDOW_LIMIT}"),
                    });
                }
                let window_ms = sliding_window::window_for(capacity, refill_rate);
                if window_ms > sliding_window::MAX_WINDOW_MS {
                    return Err(CoordinationError::InvalidConfig {
                        reason: format!("window of {window_ms}ms exceeds {}ms", sliding_window::MAX_WINDOW_MS),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Store key for one identity in one scope.
pub(crate) fn limiter_key(scope: &str, identity: &str) -> String {
    format!("ratelimit:{}:{}", escape_key_segment(scope), escape_key_segment(identity))
}

pub(crate) fn validate_limits(capacity: u64, refill_rate: f64) -> Result<(), CoordinationError> {
    if capacity == 0 {
        return Err(CoordinationError::InvalidConfig {
            reason: "capacity must be at least 1".into(),
        });
    }
    if !(refill_rate.is_finite() && refill_rate > 0.0) {
        return Err(CoordinationError::InvalidConfig {
            reason: format!("refill rate must be positive, got {refill_rate}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_and_escaped() {
        assert_eq!(limiter_key("api", "user-1"), "ratelimit:api:user-1");
        assert_ne!(limiter_key("a", "b:c"), limiter_key("a:b", "c"));
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("sliding_window".parse::<LimitAlgorithm>().unwrap(), LimitAlgorithm::SlidingWindow);
        assert!("leaky".parse::<LimitAlgorithm>().is_err());
        assert_eq!(LimitAlgorithm::default(), LimitAlgorithm::TokenBucket);
    }

    #[test]
    fn rejects_unusable_limits() {
        assert!(validate_limits(0, 1.0).is_err());
        assert!(validate_limits(5, 0.0).is_err());
        assert!(validate_limits(5, f64::NAN).is_err());
        assert!(validate_limits(5, 0.5).is_ok());
    }

    #[test]
    fn algorithm_limits_fit_store_records() {
        let month_rate = 100.0 / (30.0 * 86_400.0);
        assert!(LimitAlgorithm::TokenBucket.check_limits(100, month_rate).is_err());
        assert!(LimitAlgorithm::SlidingWindow.check_limits(100, month_rate).is_err());

        assert!(LimitAlgorithm::SlidingWindow.check_limits(MAX_WINDOW_LIMIT + 1, 1_000.0).is_err());
        assert!(LimitAlgorithm::TokenBucket.check_limits(MAX_WINDOW_LIMIT + 1, 1_000.0).is_ok());

        assert!(LimitAlgorithm::TokenBucket.check_limits(100, 1.0).is_ok());
        assert!(LimitAlgorithm::SlidingWindow.check_limits(100, 1.0).is_ok());
    }
}
