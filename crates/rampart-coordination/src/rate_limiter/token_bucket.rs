//! Distributed token bucket.

use std::sync::Arc;

use rampart_constants::coordination::BUCKET_TTL_GRACE_MS;
use rampart_core::KeyValueStore;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use tracing::debug;

use super::limiter_key;
use super::validate_limits;
use super::DecisionSource;
use super::RateDecision;
use crate::error::CoordinationError;
use crate::pure::bucket_ttl_ms;
use crate::pure::rate_limiter::time_until_full_ms;
use crate::pure::replenish;
use crate::pure::take_tokens;
use crate::pure::TokenAvailability;
use crate::script::AtomicScript;
use crate::script::ScriptRunner;
use crate::script::ScriptStep;
use crate::types::BucketState;

/// Refill-then-take on one bucket record.
struct TakeToken {
    key: String,
    capacity: u64,
    refill_rate: f64,
}

impl TakeToken {
    fn parse(&self, current: Option<&str>, now_ms: u64) -> Result<BucketState, CoordinationError> {
        match current {
            None => Ok(BucketState::full(self.capacity, now_ms)),
            Some(json) => serde_json::from_str(json).map_err(|_| CoordinationError::CorruptedData {
                key: self.key.clone(),
                reason: "invalid bucket state JSON".to_string(),
            }),
        }
    }
}

impl AtomicScript for TakeToken {
    type Output = RateDecision;

    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn execute(&self, current: Option<&str>, now_ms: u64) -> Result<ScriptStep<RateDecision>, CoordinationError> {
        let state = self.parse(current, now_ms)?;
        let tokens = replenish(state.tokens, state.last_refill_ms, now_ms, self.refill_rate, self.capacity);

        match take_tokens(tokens, 1, self.refill_rate) {
            TokenAvailability::Available { remaining } => {
                let next = BucketState {
                    tokens: remaining,
                    last_refill_ms: now_ms,
                };
                let ttl_ms = bucket_ttl_ms(self.capacity, self.refill_rate, BUCKET_TTL_GRACE_MS);
                let decision = RateDecision {
                    allowed: true,
                    limit: self.capacity,
                    remaining: remaining as u64,
                    reset_after_ms: time_until_full_ms(remaining, self.capacity, self.refill_rate),
                    retry_after_ms: 0,
                    source: DecisionSource::Store,
                };
                Ok(ScriptStep::put(serde_json::to_string(&next)?, Some(ttl_ms), decision))
            }
            // A denial consumes nothing; refill is recomputed from the old
            // timestamp next time, so the record can stay as it is.
            TokenAvailability::Exhausted { retry_after_ms, .. } => Ok(ScriptStep::keep(RateDecision {
                allowed: false,
                limit: self.capacity,
                remaining: 0,
                reset_after_ms: time_until_full_ms(tokens, self.capacity, self.refill_rate),
                retry_after_ms,
                source: DecisionSource::Store,
            })),
        }
    }
}

/// Token bucket rate limiter shared by every process using the same store.
///
/// Each identity gets a bucket record under `ratelimit:{scope}:{identity}`.
/// Capacity and refill rate are supplied per check, so different tiers can
/// share one limiter.
pub struct TokenBucketLimiter<S: KeyValueStore + ?Sized> {
    runner: ScriptRunner<S>,
    scope: String,
}

impl<S: KeyValueStore + ?Sized> TokenBucketLimiter<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, scope: impl Into<String>) -> Self {
        Self {
            runner: ScriptRunner::new(store, clock),
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Take one token from `identity`'s bucket.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a zero capacity or non-positive refill rate; store
    /// failures as `Storage`.
    pub async fn check(
        &self,
        identity: &str,
        capacity: u64,
        refill_rate: f64,
    ) -> Result<RateDecision, CoordinationError> {
        validate_limits(capacity, refill_rate)?;
        let key = limiter_key(&self.scope, identity);
        let script = TakeToken {
            key: key.clone(),
            capacity,
            refill_rate,
        };
        let decision = self.runner.run(&key, &script).await?;
        debug!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "token bucket checked"
        );
        Ok(decision)
    }

    /// Whole tokens available to `identity` without consuming any.
    pub async fn available(&self, identity: &str, capacity: u64, refill_rate: f64) -> Result<u64, CoordinationError> {
        validate_limits(capacity, refill_rate)?;
        let key = limiter_key(&self.scope, identity);
        let script = TakeToken {
            key: key.clone(),
            capacity,
            refill_rate,
        };
        let now_ms = self.runner.now_ms();
        let state = script.parse(self.runner.read(&key).await?.as_deref(), now_ms)?;
        Ok(replenish(state.tokens, state.last_refill_ms, now_ms, refill_rate, capacity) as u64)
    }

    /// Forget `identity`'s bucket; its next check starts full.
    pub async fn reset(&self, identity: &str) -> Result<(), CoordinationError> {
        let key = limiter_key(&self.scope, identity);
        self.runner.store().write(WriteRequest::delete(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::DeterministicKeyValueStore;
    use rampart_time::SimulatedTimeProvider;

    use super::*;

    fn limiter() -> (TokenBucketLimiter<DeterministicKeyValueStore>, SimulatedTimeProvider) {
        let clock = SimulatedTimeProvider::new(1_000_000);
        let store = DeterministicKeyValueStore::with_time(clock.shared());
        (TokenBucketLimiter::new(store, clock.shared(), "api"), clock)
    }

    #[tokio::test]
    async fn burst_then_refill() {
        let (limiter, clock) = limiter();

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let d = limiter.check("u1", 5, 1.0).await.unwrap();
            assert!(d.allowed);
            remaining.push(d.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = limiter.check("u1", 5, 1.0).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_ms, 1_000);
        assert_eq!(denied.reset_after_ms, 5_000);

        clock.advance_secs(2);
        assert!(limiter.check("u1", 5, 1.0).await.unwrap().allowed);
        assert!(limiter.check("u1", 5, 1.0).await.unwrap().allowed);
        assert!(!limiter.check("u1", 5, 1.0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let (limiter, _) = limiter();
        assert!(limiter.check("a", 1, 1.0).await.unwrap().allowed);
        assert!(!limiter.check("a", 1, 1.0).await.unwrap().allowed);
        assert!(limiter.check("b", 1, 1.0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn available_does_not_consume() {
        let (limiter, _) = limiter();
        assert_eq!(limiter.available("u", 10, 1.0).await.unwrap(), 10);
        limiter.check("u", 10, 1.0).await.unwrap();
        assert_eq!(limiter.available("u", 10, 1.0).await.unwrap(), 9);
        assert_eq!(limiter.available("u", 10, 1.0).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn reset_refills() {
        let (limiter, _) = limiter();
        for _ in 0..3 {
            limiter.check("u", 3, 0.1).await.unwrap();
        }
        assert!(!limiter.check("u", 3, 0.1).await.unwrap().allowed);
        limiter.reset("u").await.unwrap();
        assert!(limiter.check("u", 3, 0.1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn expired_record_starts_full() {
        let (limiter, clock) = limiter();
        limiter.check("u", 2, 1.0).await.unwrap();
        // TTL is 2s refill + grace
        clock.advance_ms(2_000 + BUCKET_TTL_GRACE_MS);
        assert_eq!(limiter.available("u", 2, 1.0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_invalid_limits() {
        let (limiter, _) = limiter();
        let err = limiter.check("u", 0, 1.0).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidConfig { .. }));
    }
}
