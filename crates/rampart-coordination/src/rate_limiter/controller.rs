use std::sync::Arc;

use rampart_constants::coordination::DEFAULT_FALLBACK_WINDOW_MS;
use rampart_constants::coordination::REFUSED_RETRY_AFTER_MS;
use rampart_core::KeyValueStore;
use rampart_time::TimeProvider;
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::warn;

use super::limiter_key;
use super::LimitAlgorithm;
use super::LocalWindowLimiter;
use super::RateDecision;
use super::SlidingWindowLimiter;
use super::Tier;
use super::TierTable;
use super::TokenBucketLimiter;

/// Settings for one admission scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Namespace segment in `ratelimit:{scope}:{identity}`.
    pub scope: String,
    pub algorithm: LimitAlgorithm,
    /// Window of the local fallback counter.
    pub fallback_window_ms: u64,
    pub tiers: TierTable,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            scope: "api".to_string(),
            algorithm: LimitAlgorithm::TokenBucket,
            fallback_window_ms: DEFAULT_FALLBACK_WINDOW_MS,
            tiers: TierTable::default(),
        }
    }
}

enum Limiter<S: KeyValueStore + ?Sized> {
    TokenBucket(TokenBucketLimiter<S>),
    SlidingWindow(SlidingWindowLimiter<S>),
}

/// Per-request admission check for one scope.
///
/// Never fails. If the store is unreachable, the check is answered by a
/// process-local fixed window counter (limit = capacity per fallback window)
/// and a warning is logged. Any other error (unusable limits or identity, a
/// corrupt record, CAS contention) denies the request and logs an error.
pub struct AdmissionController<S: KeyValueStore + ?Sized> {
    config: AdmissionConfig,
    limiter: Limiter<S>,
    fallback: LocalWindowLimiter,
}

impl<S: KeyValueStore + ?Sized> AdmissionController<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, config: AdmissionConfig) -> Self {
        let limiter = match config.algorithm {
            LimitAlgorithm::TokenBucket => {
                Limiter::TokenBucket(TokenBucketLimiter::new(store, clock.clone(), config.scope.clone()))
            }
            LimitAlgorithm::SlidingWindow => {
                Limiter::SlidingWindow(SlidingWindowLimiter::new(store, clock.clone(), config.scope.clone()))
            }
        };
        let fallback = LocalWindowLimiter::new(config.fallback_window_ms, clock);
        Self {
            config,
            limiter,
            fallback,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Check `identity` against explicit limits.
    pub async fn check(&self, identity: &str, capacity: u64, refill_rate: f64) -> RateDecision {
        let result = match &self.limiter {
            Limiter::TokenBucket(limiter) => limiter.check(identity, capacity, refill_rate).await,
            Limiter::SlidingWindow(limiter) => limiter.check(identity, capacity, refill_rate).await,
        };

        match result {
            Ok(decision) => decision,
            Err(e) if e.is_store_unavailable() => {
                warn!(
                    scope = %self.config.scope,
                    identity,
                    error = %e,
                    "rate limit store unavailable, using local fallback"
                );
                self.fallback.check(&limiter_key(&self.config.scope, identity), capacity)
            }
            Err(e) => {
                error!(
                    scope = %self.config.scope,
                    identity,
                    error = %e,
                    "rate limit check failed, denying"
                );
                RateDecision::refused(capacity, REFUSED_RETRY_AFTER_MS)
            }
        }
    }

    /// Check `identity` against its tier's limits. Exempt callers are
    /// admitted without touching the store.
    pub async fn check_tier(&self, identity: &str, tier: Tier) -> RateDecision {
        match self.config.tiers.limits(tier) {
            Some(limits) => self.check(identity, limits.capacity, limits.refill_rate).await,
            None => RateDecision::exempt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::testing::FaultyKeyValueStore;
    use rampart_core::DeterministicKeyValueStore;
    use rampart_time::SimulatedTimeProvider;

    use super::*;
    use crate::rate_limiter::DecisionSource;

    fn controller(
        algorithm: LimitAlgorithm,
    ) -> (
        AdmissionController<FaultyKeyValueStore<DeterministicKeyValueStore>>,
        Arc<FaultyKeyValueStore<DeterministicKeyValueStore>>,
    ) {
        let clock = SimulatedTimeProvider::new(0);
        let store = Arc::new(FaultyKeyValueStore::new(DeterministicKeyValueStore::with_time(clock.shared())));
        let config = AdmissionConfig {
            algorithm,
            ..AdmissionConfig::default()
        };
        (AdmissionController::new(store.clone(), clock.shared(), config), store)
    }

    #[tokio::test]
    async fn exempt_never_touches_store() {
        let (controller, store) = controller(LimitAlgorithm::TokenBucket);
        for _ in 0..100 {
            let d = controller.check_tier("admin", Tier::Exempt).await;
            assert!(d.allowed);
            assert_eq!(d.source, DecisionSource::Exempt);
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn tier_limits_apply() {
        let (controller, _) = controller(LimitAlgorithm::TokenBucket);
        let default_cap = controller.config().tiers.default.capacity;
        for _ in 0..default_cap {
            assert!(controller.check_tier("u", Tier::Default).await.allowed);
        }
        assert!(!controller.check_tier("u", Tier::Default).await.allowed);
    }

    #[tokio::test]
    async fn outage_falls_back_to_local_counter() {
        let (controller, store) = controller(LimitAlgorithm::SlidingWindow);
        store.set_unavailable(true);

        let first = controller.check("u", 2, 1.0).await;
        assert!(first.allowed);
        assert!(first.is_degraded());
        assert!(controller.check("u", 2, 1.0).await.allowed);
        assert!(!controller.check("u", 2, 1.0).await.allowed);

        store.set_unavailable(false);
        let recovered = controller.check("u", 2, 1.0).await;
        assert_eq!(recovered.source, DecisionSource::Store);
        assert!(recovered.allowed);
    }

    fn assert_refused(decision: &RateDecision) {
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::Store);
        assert_eq!(decision.retry_after_ms, REFUSED_RETRY_AFTER_MS);
    }

    #[tokio::test]
    async fn unusable_window_limit_is_denied_not_degraded() {
        let (controller, _) = controller(LimitAlgorithm::SlidingWindow);
        for _ in 0..3 {
            assert_refused(&controller.check("u", 20_000, 100.0).await);
        }
    }

    #[tokio::test]
    async fn oversized_identity_is_denied() {
        let (controller, _) = controller(LimitAlgorithm::TokenBucket);
        let identity = "x".repeat(rampart_constants::MAX_KEY_SIZE as usize + 1);
        assert_refused(&controller.check(&identity, 5, 1.0).await);
    }

    #[tokio::test]
    async fn corrupt_record_is_denied() {
        let (controller, store) = controller(LimitAlgorithm::TokenBucket);
        store
            .inner()
            .write(rampart_core::WriteRequest::set("ratelimit:api:u", "not json"))
            .await
            .unwrap();
        assert_refused(&controller.check("u", 5, 1.0).await);
    }

    /// Store on which every compare-and-swap loses.
    struct AlwaysContended(Arc<DeterministicKeyValueStore>);

    #[async_trait::async_trait]
    impl KeyValueStore for AlwaysContended {
        async fn write(
            &self,
            request: rampart_core::WriteRequest,
        ) -> Result<rampart_core::WriteResult, rampart_core::KeyValueStoreError> {
            match request.command {
                rampart_core::WriteCommand::CompareAndSwap { key, .. } => {
                    Err(rampart_core::KeyValueStoreError::CompareAndSwapFailed { key, actual: None })
                }
                _ => self.0.write(request).await,
            }
        }

        async fn read(
            &self,
            request: rampart_core::ReadRequest,
        ) -> Result<rampart_core::ReadResult, rampart_core::KeyValueStoreError> {
            self.0.read(request).await
        }

        async fn delete(
            &self,
            request: rampart_core::DeleteRequest,
        ) -> Result<rampart_core::DeleteResult, rampart_core::KeyValueStoreError> {
            self.0.delete(request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_cas_retries_are_denied() {
        let clock = SimulatedTimeProvider::new(0);
        let store = Arc::new(AlwaysContended(DeterministicKeyValueStore::with_time(clock.shared())));
        let controller = AdmissionController::new(store, clock.shared(), AdmissionConfig::default());
        assert_refused(&controller.check("u", 5, 1.0).await);
    }

    #[tokio::test]
    async fn long_refill_bucket_stays_on_store() {
        let clock = SimulatedTimeProvider::new(0);
        let store = DeterministicKeyValueStore::with_time(clock.shared());
        let controller = AdmissionController::new(store, clock.shared(), AdmissionConfig::default());
        // 100 per 30 days, checked once a minute for 300 minutes
        let rate = 100.0 / (30.0 * 86_400.0);

        let mut allowed = 0;
        for _ in 0..300 {
            let d = controller.check("u", 100, rate).await;
            assert_eq!(d.source, DecisionSource::Store);
            if d.allowed {
                allowed += 1;
            }
            clock.advance_ms(60_000);
        }
        // 300 minutes refills about 0.7 tokens
        assert_eq!(allowed, 100);
    }
}
