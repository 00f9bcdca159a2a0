//! Revocation checks: Bloom filter in the coordination store, confirmed
//! against the durable ledger.

use std::sync::Arc;
use std::time::Duration;

use rampart_constants::coordination::DEFAULT_BLOOM_EXPECTED_ITEMS;
use rampart_constants::coordination::DEFAULT_BLOOM_FALSE_POSITIVE_RATE;
use rampart_constants::coordination::DEFAULT_MAINTENANCE_INTERVAL_MS;
use rampart_constants::coordination::REBUILD_CATCH_UP_GRACE_MS;
use rampart_core::KeyValueStore;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use serde::Deserialize;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::bloom::BloomFilter;
use super::ledger::RevocationLedger;
use crate::error::CoordinationError;
use crate::script::AtomicScript;
use crate::script::ScriptRunner;
use crate::script::ScriptStep;
use crate::types::RevocationEntry;

/// Store key holding the serialized filter.
pub const BLOOM_KEY: &str = "revocation:bloom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Revocations the filter is sized for.
    pub expected_items: u64,
    /// Target false positive rate, in (0, 1).
    pub false_positive_rate: f64,
    /// Period of prune + rebuild.
    pub maintenance_interval_ms: u64,
    /// Report unknown credentials as revoked when neither the filter nor
    /// the ledger can answer, instead of returning the ledger error.
    pub fail_closed: bool,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            expected_items: DEFAULT_BLOOM_EXPECTED_ITEMS,
            false_positive_rate: DEFAULT_BLOOM_FALSE_POSITIVE_RATE,
            maintenance_interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
            fail_closed: false,
        }
    }
}

/// Where a revocation answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationSource {
    /// Filter negative; the ledger was not consulted.
    Filter,
    /// Durable ledger lookup.
    Ledger,
    /// Nothing could be consulted and the registry fails closed.
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationStatus {
    pub revoked: bool,
    pub source: RevocationSource,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    /// Expired ledger entries deleted.
    pub pruned: u64,
    /// Ids in the rebuilt filter, catch-up included.
    pub filter_items: u64,
}

/// Adds ids to an existing filter. A missing or unreadable filter is left
/// alone: a filter holding only these ids would give false negatives for
/// everything else, so the next rebuild restores it instead.
struct InsertIntoFilter<'a> {
    token_ids: &'a [String],
}

impl AtomicScript for InsertIntoFilter<'_> {
    type Output = bool;

    fn name(&self) -> &'static str {
        "bloom_insert"
    }

    fn execute(&self, current: Option<&str>, _now_ms: u64) -> Result<ScriptStep<bool>, CoordinationError> {
        let Some(mut filter) = current.and_then(BloomFilter::decode) else {
            return Ok(ScriptStep::keep(false));
        };
        if self.token_ids.iter().all(|id| filter.contains(id)) {
            return Ok(ScriptStep::keep(true));
        }
        for id in self.token_ids {
            filter.insert(id);
        }
        Ok(ScriptStep::put(filter.encode()?, None, true))
    }
}

/// Revoked-credential registry shared by every server process.
pub struct RevocationRegistry<S: KeyValueStore + ?Sized> {
    runner: ScriptRunner<S>,
    ledger: Arc<dyn RevocationLedger>,
    config: RevocationConfig,
}

impl<S: KeyValueStore + ?Sized> RevocationRegistry<S> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<dyn RevocationLedger>,
        clock: Arc<dyn TimeProvider>,
        config: RevocationConfig,
    ) -> Self {
        Self {
            runner: ScriptRunner::new(store, clock),
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &RevocationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn RevocationLedger> {
        &self.ledger
    }

    /// Revoke `token_id` until `expires_at_ms`, the credential's own expiry.
    ///
    /// The ledger write decides success. The filter update after it is best
    /// effort; if it is lost, lookups still hit the ledger once the filter is
    /// rebuilt.
    pub async fn revoke(&self, token_id: &str, expires_at_ms: u64) -> Result<(), CoordinationError> {
        let now_ms = self.runner.now_ms();
        let entry = RevocationEntry {
            token_id: token_id.to_string(),
            expires_at_ms,
            revoked_at_ms: now_ms,
        };

        if let Err(e) = self.ledger.insert(entry).await {
            error!(token_id, error = %e, "failed to record revocation");
            return Err(e.into());
        }

        let ids = [token_id.to_string()];
        match self.runner.run(BLOOM_KEY, &InsertIntoFilter { token_ids: &ids }).await {
            Ok(true) => debug!(token_id, "revocation recorded"),
            Ok(false) => warn!(token_id, "revocation filter missing, lookups use the ledger until rebuilt"),
            Err(e) => warn!(token_id, error = %e, "failed to add revocation to filter"),
        }
        Ok(())
    }

    /// Revocation status of `token_id` and where the answer came from.
    pub async fn check(&self, token_id: &str) -> Result<RevocationStatus, CoordinationError> {
        match self.runner.read(BLOOM_KEY).await {
            Ok(Some(value)) => match BloomFilter::decode(&value) {
                Some(filter) if !filter.contains(token_id) => {
                    return Ok(RevocationStatus {
                        revoked: false,
                        source: RevocationSource::Filter,
                    });
                }
                Some(_) => {}
                None => warn!("revocation filter is corrupt, checking ledger"),
            },
            Ok(None) => debug!("revocation filter missing, checking ledger"),
            Err(e) => warn!(error = %e, "revocation filter unavailable, checking ledger"),
        }

        match self.ledger.contains(token_id).await {
            Ok(revoked) => Ok(RevocationStatus {
                revoked,
                source: RevocationSource::Ledger,
            }),
            Err(e) if self.config.fail_closed => {
                warn!(token_id, error = %e, "revocation ledger unavailable, failing closed");
                Ok(RevocationStatus {
                    revoked: true,
                    source: RevocationSource::FailClosed,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, CoordinationError> {
        Ok(self.check(token_id).await?.revoked)
    }

    /// Replace the filter with one built from the ledger's live entries.
    ///
    /// Revocations that land while the filter is being built are re-added
    /// afterwards from `revoked_since`, with a grace period for clock skew
    /// between processes.
    pub async fn rebuild_filter(&self) -> Result<u64, CoordinationError> {
        let snapshot_ms = self.runner.now_ms();
        let live = self.ledger.live_entries(snapshot_ms).await?;

        let mut filter = BloomFilter::new(
            self.config.expected_items.max(live.len() as u64),
            self.config.false_positive_rate,
        );
        for id in &live {
            filter.insert(id);
        }
        self.runner.store().write(WriteRequest::set(BLOOM_KEY, filter.encode()?)).await?;

        let recent = self.ledger.revoked_since(snapshot_ms.saturating_sub(REBUILD_CATCH_UP_GRACE_MS)).await?;
        if !recent.is_empty() {
            self.runner.run(BLOOM_KEY, &InsertIntoFilter { token_ids: &recent }).await?;
        }

        info!(
            items = live.len(),
            caught_up = recent.len(),
            bits = filter.num_bits(),
            hashes = filter.num_hashes(),
            "rebuilt revocation filter"
        );
        Ok(live.len() as u64)
    }

    /// Prune expired ledger entries, then rebuild the filter.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, CoordinationError> {
        let pruned = self.ledger.prune_expired(self.runner.now_ms()).await?;
        let filter_items = self.rebuild_filter().await?;
        if pruned > 0 {
            info!(pruned, "pruned expired revocations");
        }
        Ok(MaintenanceReport { pruned, filter_items })
    }
}

impl<S: KeyValueStore + ?Sized + 'static> RevocationRegistry<S> {
    /// Run maintenance now and then every `interval` until `cancel` fires.
    pub fn spawn_maintenance(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("revocation maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_maintenance().await {
                            warn!(error = %e, "revocation maintenance failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::testing::FaultyKeyValueStore;
    use rampart_core::DeterministicKeyValueStore;
    use rampart_time::SimulatedTimeProvider;

    use super::*;
    use crate::revocation::InMemoryRevocationLedger;

    const HOUR_MS: u64 = 3_600_000;

    struct Fixture {
        store: Arc<FaultyKeyValueStore<DeterministicKeyValueStore>>,
        ledger: Arc<InMemoryRevocationLedger>,
        clock: SimulatedTimeProvider,
        registry: RevocationRegistry<FaultyKeyValueStore<DeterministicKeyValueStore>>,
    }

    fn fixture(config: RevocationConfig) -> Fixture {
        let clock = SimulatedTimeProvider::new(1_000_000);
        let store = Arc::new(FaultyKeyValueStore::new(DeterministicKeyValueStore::with_time(clock.shared())));
        let ledger = InMemoryRevocationLedger::new();
        let registry = RevocationRegistry::new(store.clone(), ledger.clone(), clock.shared(), config);
        Fixture {
            store,
            ledger,
            clock,
            registry,
        }
    }

    fn small() -> RevocationConfig {
        RevocationConfig {
            expected_items: 1_000,
            ..RevocationConfig::default()
        }
    }

    #[tokio::test]
    async fn revoked_after_rebuild_and_revoke() {
        let f = fixture(small());
        f.registry.rebuild_filter().await.unwrap();

        f.registry.revoke("tok-a", 1_000_000 + HOUR_MS).await.unwrap();
        let status = f.registry.check("tok-a").await.unwrap();
        assert_eq!(status, RevocationStatus {
            revoked: true,
            source: RevocationSource::Ledger,
        });

        let status = f.registry.check("tok-b").await.unwrap();
        assert!(!status.revoked);
    }

    #[tokio::test]
    async fn filter_negative_skips_ledger() {
        let f = fixture(small());
        f.registry.rebuild_filter().await.unwrap();
        f.ledger.set_unavailable(true);

        let status = f.registry.check("never-revoked").await.unwrap();
        assert_eq!(status.source, RevocationSource::Filter);
        assert!(!status.revoked);
    }

    #[tokio::test]
    async fn missing_filter_falls_back_and_is_not_recreated() {
        let f = fixture(small());
        f.registry.revoke("tok-a", 1_000_000 + HOUR_MS).await.unwrap();

        assert!(f.registry.is_revoked("tok-a").await.unwrap());
        assert!(f.registry.runner.read(BLOOM_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_filter_falls_back_to_ledger() {
        let f = fixture(small());
        f.registry.revoke("tok-a", 1_000_000 + HOUR_MS).await.unwrap();
        f.store.write(WriteRequest::set(BLOOM_KEY, "garbage")).await.unwrap();

        let status = f.registry.check("tok-a").await.unwrap();
        assert_eq!(status.source, RevocationSource::Ledger);
        assert!(status.revoked);
    }

    #[tokio::test]
    async fn store_outage_still_answers_from_ledger() {
        let f = fixture(small());
        f.registry.rebuild_filter().await.unwrap();
        f.store.set_unavailable(true);

        // ledger write succeeds, filter update is lost
        f.registry.revoke("tok-a", 1_000_000 + HOUR_MS).await.unwrap();
        assert!(f.registry.is_revoked("tok-a").await.unwrap());

        f.store.set_unavailable(false);
        f.registry.rebuild_filter().await.unwrap();
        assert!(f.registry.is_revoked("tok-a").await.unwrap());
    }

    #[tokio::test]
    async fn ledger_failure_propagates_unless_fail_closed() {
        let f = fixture(small());
        f.ledger.set_unavailable(true);
        assert!(f.registry.revoke("tok-a", 1_000_000 + HOUR_MS).await.is_err());
        assert!(f.registry.check("tok-a").await.is_err());

        let f = fixture(RevocationConfig {
            fail_closed: true,
            ..small()
        });
        f.ledger.set_unavailable(true);
        let status = f.registry.check("tok-a").await.unwrap();
        assert_eq!(status.source, RevocationSource::FailClosed);
        assert!(status.revoked);
    }

    #[tokio::test]
    async fn maintenance_prunes_and_rebuilds() {
        let f = fixture(small());
        f.registry.revoke("short", 1_000_000 + 1_000).await.unwrap();
        f.registry.revoke("long", 1_000_000 + HOUR_MS).await.unwrap();

        f.clock.advance_ms(2 * REBUILD_CATCH_UP_GRACE_MS);
        let report = f.registry.run_maintenance().await.unwrap();
        assert_eq!(report, MaintenanceReport {
            pruned: 1,
            filter_items: 1,
        });

        assert!(f.registry.is_revoked("long").await.unwrap());
        assert!(!f.registry.is_revoked("short").await.unwrap());
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_catches_up_recent_revocations() {
        let f = fixture(small());
        f.registry.revoke("recent", 1_000_000 + HOUR_MS).await.unwrap();
        f.registry.rebuild_filter().await.unwrap();

        let value = f.registry.runner.read(BLOOM_KEY).await.unwrap().unwrap();
        assert!(BloomFilter::decode(&value).unwrap().contains("recent"));
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_task_stops_on_cancel() {
        let f = fixture(small());
        let registry = Arc::new(f.registry);
        let cancel = CancellationToken::new();
        let handle = registry.clone().spawn_maintenance(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.runner.read(BLOOM_KEY).await.unwrap().is_some());

        cancel.cancel();
        handle.await.unwrap();
    }
}
