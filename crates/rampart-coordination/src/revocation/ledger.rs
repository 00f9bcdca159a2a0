//! Durable table of revoked credentials.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::LedgerError;
use crate::types::RevocationEntry;

/// Source of truth for revocations.
///
/// The Bloom filter in the coordination store is only an accelerator; every
/// positive it reports is confirmed here.
#[async_trait]
pub trait RevocationLedger: Send + Sync {
    /// Record a revocation. Re-revoking keeps the later expiry.
    ///
    /// Returns `true` if the id was not present before.
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, LedgerError>;

    /// Whether `token_id` has an entry. Entries past their expiry still
    /// count until pruned.
    async fn contains(&self, token_id: &str) -> Result<bool, LedgerError>;

    /// Delete entries with `expires_at_ms <= now_ms`. Returns how many.
    async fn prune_expired(&self, now_ms: u64) -> Result<u64, LedgerError>;

    /// Ids of entries still live at `now_ms`.
    async fn live_entries(&self, now_ms: u64) -> Result<Vec<String>, LedgerError>;

    /// Ids revoked at or after `since_ms`.
    async fn revoked_since(&self, since_ms: u64) -> Result<Vec<String>, LedgerError>;
}

#[async_trait]
impl<T: RevocationLedger + ?Sized> RevocationLedger for Arc<T> {
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, LedgerError> {
        (**self).insert(entry).await
    }

    async fn contains(&self, token_id: &str) -> Result<bool, LedgerError> {
        (**self).contains(token_id).await
    }

    async fn prune_expired(&self, now_ms: u64) -> Result<u64, LedgerError> {
        (**self).prune_expired(now_ms).await
    }

    async fn live_entries(&self, now_ms: u64) -> Result<Vec<String>, LedgerError> {
        (**self).live_entries(now_ms).await
    }

    async fn revoked_since(&self, since_ms: u64) -> Result<Vec<String>, LedgerError> {
        (**self).revoked_since(since_ms).await
    }
}

/// Ledger held in process memory, for tests and single-node setups.
#[derive(Default)]
pub struct InMemoryRevocationLedger {
    entries: Mutex<HashMap<String, RevocationEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryRevocationLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable {
                reason: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RevocationLedger for InMemoryRevocationLedger {
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, LedgerError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match entries.get_mut(&entry.token_id) {
            Some(existing) => {
                existing.expires_at_ms = existing.expires_at_ms.max(entry.expires_at_ms);
                existing.revoked_at_ms = entry.revoked_at_ms;
                Ok(false)
            }
            None => {
                entries.insert(entry.token_id.clone(), entry);
                Ok(true)
            }
        }
    }

    async fn contains(&self, token_id: &str) -> Result<bool, LedgerError> {
        self.check_available()?;
        Ok(self.entries.lock().contains_key(token_id))
    }

    async fn prune_expired(&self, now_ms: u64) -> Result<u64, LedgerError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at_ms > now_ms);
        Ok((before - entries.len()) as u64)
    }

    async fn live_entries(&self, now_ms: u64) -> Result<Vec<String>, LedgerError> {
        self.check_available()?;
        Ok(self.entries.lock().values().filter(|e| e.expires_at_ms > now_ms).map(|e| e.token_id.clone()).collect())
    }

    async fn revoked_since(&self, since_ms: u64) -> Result<Vec<String>, LedgerError> {
        self.check_available()?;
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|e| e.revoked_at_ms >= since_ms)
            .map(|e| e.token_id.clone())
            .collect())
    }
}
