//! Token bucket never admits more than its capacity plus what refilled.

use proptest::prelude::*;
use rampart_coordination::rate_limiter::TokenBucketLimiter;
use rampart_core::DeterministicKeyValueStore;
use rampart_time::SimulatedTimeProvider;

fn run_schedule(capacity: u64, refill_rate: f64, gaps_ms: Vec<u64>) -> (u64, u64) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async move {
        let clock = SimulatedTimeProvider::new(1_000_000);
        let store = DeterministicKeyValueStore::with_time(clock.shared());
        let limiter = TokenBucketLimiter::new(store, clock.shared(), "prop");

        let mut admitted = 0;
        let mut elapsed_ms = 0;
        for gap in gaps_ms {
            clock.advance_ms(gap);
            elapsed_ms += gap;
            if limiter.check("caller", capacity, refill_rate).await.unwrap().allowed {
                admitted += 1;
            }
        }
        (admitted, elapsed_ms)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn admitted_requests_are_bounded(
        capacity in 1u64..20,
        refill_rate in 0.1f64..10.0,
        gaps_ms in proptest::collection::vec(0u64..500, 1..200),
    ) {
        let (admitted, elapsed_ms) = run_schedule(capacity, refill_rate, gaps_ms);
        let bound = capacity as f64 + refill_rate * elapsed_ms as f64 / 1000.0;
        prop_assert!(admitted as f64 <= bound + 1e-9, "admitted {} > bound {}", admitted, bound);
    }

    #[test]
    fn a_full_bucket_admits_its_capacity_at_once(capacity in 1u64..50, refill_rate in 0.1f64..10.0) {
        let (admitted, _) = run_schedule(capacity, refill_rate, vec![0; capacity as usize + 5]);
        prop_assert_eq!(admitted, capacity);
    }
}
