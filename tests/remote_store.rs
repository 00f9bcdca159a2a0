//! The full stack against a `rampart-store` server over TCP.

use std::sync::Arc;
use std::time::Duration;

use rampart::AppConfig;
use rampart::Rampart;
use rampart_coordination::CircuitState;
use rampart_coordination::DecisionSource;
use rampart_coordination::Tier;
use rampart_core::DeterministicKeyValueStore;
use rampart_core::KeyValueStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_server() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let store: Arc<dyn KeyValueStore> = DeterministicKeyValueStore::new();
    let cancel = CancellationToken::new();
    tokio::spawn(rampart_rpc::serve(listener, store, cancel.clone()));
    (address, cancel)
}

fn config_for(address: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.store.address = Some(address.to_string());
    config.store.operation_timeout_ms = 500;
    config.circuit_breaker.defaults.failure_threshold = 2;
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn two_processes_share_state_through_the_server() {
    let (address, cancel) = start_server().await;
    let config = config_for(&address);
    let server_a = Rampart::from_config(&config).unwrap();
    let server_b = Rampart::from_config(&config).unwrap();

    // default tier: 20 burst
    for _ in 0..20 {
        assert!(server_a.admission().check_tier("ip:1.2.3.4", Tier::Default).await.allowed);
    }
    let denied = server_b.admission().check_tier("ip:1.2.3.4", Tier::Default).await;
    assert!(!denied.allowed);
    assert_eq!(denied.source, DecisionSource::Store);

    let handle = server_a.locks().acquire("migration", 5_000).await.unwrap();
    assert!(server_b.locks().acquire("migration", 5_000).await.is_err());
    assert!(server_a.locks().release(&handle).await.unwrap());

    for _ in 0..2 {
        let _ = server_a.breakers().guarded("mailer", || async { Err::<(), _>("smtp down") }).await;
    }
    assert_eq!(server_b.breakers().breaker("mailer").state().await, CircuitState::Open);

    cancel.cancel();
}

#[tokio::test]
async fn server_shutdown_degrades_gracefully() {
    let (address, cancel) = start_server().await;
    let rampart = Rampart::from_config(&config_for(&address)).unwrap();
    assert_eq!(rampart.admission().check("u", 10, 1.0).await.source, DecisionSource::Store);

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let decision = rampart.admission().check("u-new", 10, 1.0).await;
    assert!(decision.allowed);
    assert!(decision.is_degraded());

    let breaker = rampart.breakers().breaker("mailer");
    assert_eq!(breaker.call(|| async { Ok::<_, &str>(7) }).await.unwrap(), 7);
    assert_eq!(breaker.state().await, CircuitState::Closed);
}
