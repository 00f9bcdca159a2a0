//! All four primitives wired to one store, one ledger and one clock.

use std::sync::Arc;
use std::time::Duration;

use rampart_coordination::AdmissionController;
use rampart_coordination::CircuitBreakerRegistry;
use rampart_coordination::InMemoryRevocationLedger;
use rampart_coordination::LedgerError;
use rampart_coordination::LockManager;
use rampart_coordination::RevocationLedger;
use rampart_coordination::RevocationRegistry;
use rampart_core::DeterministicKeyValueStore;
use rampart_core::KeyValueStore;
use rampart_rpc::RemoteKeyValueStore;
use rampart_time::TimeProvider;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::config::RevocationSection;
use crate::config::StoreConfig;

/// Remote store if `config.address` is set, otherwise an in-process one.
pub fn open_store(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    match config.remote() {
        Some(remote) => {
            info!(address = %remote.address, "using remote coordination store");
            Arc::new(RemoteKeyValueStore::new(remote))
        }
        None => {
            info!("using in-process coordination store");
            DeterministicKeyValueStore::new()
        }
    }
}

/// SQLite ledger at `config.ledger_path`, or an in-memory ledger.
pub fn open_ledger(config: &RevocationSection) -> Result<Arc<dyn RevocationLedger>, LedgerError> {
    match &config.ledger_path {
        #[cfg(feature = "sqlite")]
        Some(path) => Ok(Arc::new(rampart_coordination::SqliteRevocationLedger::open(path)?)),
        #[cfg(not(feature = "sqlite"))]
        Some(path) => Err(LedgerError::Unavailable {
            reason: format!("ledger_path {} requires the sqlite feature", path.display()),
        }),
        None => Ok(InMemoryRevocationLedger::new()),
    }
}

/// Admission, locks, breakers and revocation over one coordination store.
pub struct Rampart<S: KeyValueStore + ?Sized + 'static> {
    admission: AdmissionController<S>,
    locks: LockManager<S>,
    breakers: CircuitBreakerRegistry<S>,
    revocation: Arc<RevocationRegistry<S>>,
    maintenance_interval: Duration,
}

impl<S: KeyValueStore + ?Sized + 'static> Rampart<S> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<dyn RevocationLedger>,
        clock: Arc<dyn TimeProvider>,
        config: &AppConfig,
    ) -> Self {
        let breakers = config.circuit_breaker.services.iter().fold(
            CircuitBreakerRegistry::new(store.clone(), clock.clone(), config.circuit_breaker.defaults),
            |registry, (service, overrides)| registry.with_override(service.clone(), *overrides),
        );

        Self {
            admission: AdmissionController::new(store.clone(), clock.clone(), config.rate_limit.clone()),
            locks: LockManager::new(store.clone(), clock.clone(), config.lock.clone()),
            breakers,
            revocation: Arc::new(RevocationRegistry::new(store, ledger, clock, config.revocation.registry.clone())),
            maintenance_interval: config.maintenance_interval(),
        }
    }

    pub fn admission(&self) -> &AdmissionController<S> {
        &self.admission
    }

    pub fn locks(&self) -> &LockManager<S> {
        &self.locks
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry<S> {
        &self.breakers
    }

    pub fn revocation(&self) -> &Arc<RevocationRegistry<S>> {
        &self.revocation
    }

    /// Start periodic revocation maintenance, stopped by `cancel`.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.revocation.clone().spawn_maintenance(self.maintenance_interval, cancel)
    }
}

impl Rampart<dyn KeyValueStore> {
    /// Open the configured store and ledger on the system clock.
    pub fn from_config(config: &AppConfig) -> Result<Self, LedgerError> {
        let store = open_store(&config.store);
        let ledger = open_ledger(&config.revocation)?;
        Ok(Self::new(store, ledger, rampart_time::system_time(), config))
    }
}
