//! Distributed lock behavior seen by independent holders.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rampart_coordination::CoordinationError;
use rampart_coordination::LockConfig;
use rampart_coordination::LockManager;
use rampart_core::DeterministicKeyValueStore;
use rampart_time::SimulatedTimeProvider;

fn managers(clock: &SimulatedTimeProvider) -> (LockManager<DeterministicKeyValueStore>, LockManager<DeterministicKeyValueStore>) {
    let store = DeterministicKeyValueStore::with_time(clock.shared());
    (
        LockManager::new(store.clone(), clock.shared(), LockConfig::default()),
        LockManager::new(store, clock.shared(), LockConfig::default()),
    )
}

#[tokio::test]
async fn stale_holder_cannot_release_successor() {
    let clock = SimulatedTimeProvider::new(0);
    let (worker_a, worker_b) = managers(&clock);

    let stale = worker_a.acquire_template("invoice:{id}", &[("id", "42")], 1_000).await.unwrap();
    let err = worker_b.acquire_template("invoice:{id}", &[("id", "42")], 1_000).await.unwrap_err();
    assert!(matches!(err, CoordinationError::LockHeld { remaining_ttl_ms: 1_000, .. }));

    clock.advance_ms(1_000);
    let current = worker_b.acquire_template("invoice:{id}", &[("id", "42")], 5_000).await.unwrap();

    assert!(!worker_a.release(&stale).await.unwrap());
    assert!(worker_b.acquire("invoice:42", 1_000).await.is_err());
    assert!(worker_b.release(&current).await.unwrap());
    assert!(worker_a.acquire("invoice:42", 1_000).await.is_ok());
}

#[tokio::test]
async fn extend_keeps_the_lease_alive() {
    let clock = SimulatedTimeProvider::new(0);
    let (worker_a, worker_b) = managers(&clock);

    let mut handle = worker_a.acquire("report", 1_000).await.unwrap();
    clock.advance_ms(900);
    assert!(worker_a.extend(&mut handle, 1_000).await.unwrap());
    assert_eq!(handle.expires_at_ms(), 1_900);

    clock.advance_ms(900);
    assert!(worker_b.acquire("report", 1_000).await.is_err());

    clock.advance_ms(100);
    assert!(!worker_a.extend(&mut handle, 1_000).await.unwrap());
    assert!(worker_b.acquire("report", 1_000).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn with_lock_serializes_critical_sections() {
    let store = DeterministicKeyValueStore::new();
    let locks = LockManager::new(store, rampart_time::system_time(), LockConfig::default());
    let inside = Arc::new(AtomicU32::new(0));
    let completed = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let locks = locks.clone();
        let inside = inside.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let result = locks
                    .with_lock("job:{name}", &[("name", "nightly")], 5_000, || async {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders at once");
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
                match result {
                    Ok(()) => break,
                    Err(CoordinationError::LockHeld { .. }) => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn rejects_bad_ttl_and_templates() {
    let clock = SimulatedTimeProvider::new(0);
    let (locks, _) = managers(&clock);

    assert!(matches!(locks.acquire("x", 0).await, Err(CoordinationError::InvalidTtl { .. })));
    assert!(matches!(
        locks.acquire_template("a:{missing}", &[], 1_000).await,
        Err(CoordinationError::InvalidLockTemplate { .. })
    ));
}
