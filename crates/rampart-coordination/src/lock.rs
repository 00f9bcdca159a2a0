//! Distributed mutual exclusion.
//!
//! A lock is one key, `lock:{name}`, whose value is a random owner token.
//! Acquire is set-if-absent with a TTL; release is compare-and-delete
//! against the token, so a holder whose lease expired can never delete the
//! lock of whoever acquired it next.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rampart_constants::coordination::DEFAULT_LOCK_TTL_MS;
use rampart_constants::coordination::MAX_LOCK_TTL_MS;
use rampart_constants::coordination::MIN_LOCK_TTL_MS;
use rampart_core::KeyValueStore;
use rampart_core::KeyValueStoreError;
use rampart_core::ReadRequest;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::CoordinationError;
use crate::pure::render_lock_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// TTL used by callers that do not pass one.
    pub default_ttl_ms: u64,
    /// Grant process-local leases while the store is unreachable.
    ///
    /// Local leases only exclude tasks in this process.
    pub local_fallback: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_LOCK_TTL_MS,
            local_fallback: false,
        }
    }
}

/// Proof of ownership returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    token: String,
    acquired_at_ms: u64,
    ttl_ms: u64,
    local: bool,
}

impl LockHandle {
    /// Full store key, `lock:{name}`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the lease lapses unless extended.
    pub fn expires_at_ms(&self) -> u64 {
        self.acquired_at_ms.saturating_add(self.ttl_ms)
    }

    /// Whether this is a process-local lease granted during a store outage.
    pub fn is_local(&self) -> bool {
        self.local
    }
}

#[derive(Debug, Clone)]
struct LocalLease {
    token: String,
    expires_at_ms: u64,
}

/// Acquires and releases named locks.
pub struct LockManager<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn TimeProvider>,
    config: LockConfig,
    local: Arc<Mutex<HashMap<String, LocalLease>>>,
}

impl<S: KeyValueStore + ?Sized> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            local: self.local.clone(),
        }
    }
}

fn lock_key(name: &str) -> String {
    format!("lock:{name}")
}

fn validate_ttl(ttl_ms: u64) -> Result<(), CoordinationError> {
    if !(MIN_LOCK_TTL_MS..=MAX_LOCK_TTL_MS).contains(&ttl_ms) {
        return Err(CoordinationError::InvalidTtl {
            ttl_ms,
            min_ms: MIN_LOCK_TTL_MS,
            max_ms: MAX_LOCK_TTL_MS,
        });
    }
    Ok(())
}

impl<S: KeyValueStore + ?Sized> LockManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            config,
            local: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire `name` for `ttl_ms`.
    ///
    /// Does not wait or retry.
    ///
    /// # Errors
    ///
    /// - `LockHeld` if another owner holds it
    /// - `InvalidTtl` if `ttl_ms` is outside the accepted range
    /// - `Storage` if the store is unreachable and local fallback is off
    pub async fn acquire(&self, name: &str, ttl_ms: u64) -> Result<LockHandle, CoordinationError> {
        validate_ttl(ttl_ms)?;
        let key = lock_key(name);
        let token = uuid::Uuid::new_v4().to_string();
        // The store starts the lease no earlier than this.
        let issued_at_ms = self.clock.now_unix_ms();

        match self.store.write(WriteRequest::set_if_absent(&key, &token, Some(ttl_ms))).await {
            Ok(_) => {
                debug!(key = %key, ttl_ms, "lock acquired");
                Ok(LockHandle {
                    key,
                    token,
                    acquired_at_ms: issued_at_ms,
                    ttl_ms,
                    local: false,
                })
            }
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                let remaining_ttl_ms = self.remaining_ttl(&key).await;
                debug!(key = %key, remaining_ttl_ms, "lock busy");
                Err(CoordinationError::LockHeld {
                    name: key,
                    remaining_ttl_ms,
                })
            }
            Err(source) if source.is_unavailable() && self.config.local_fallback => {
                warn!(key = %key, error = %source, "lock store unavailable, granting local lease");
                self.acquire_local(key, token, ttl_ms)
            }
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }

    /// Acquire the lock named by rendering `template` with `args`.
    pub async fn acquire_template(
        &self,
        template: &str,
        args: &[(&str, &str)],
        ttl_ms: u64,
    ) -> Result<LockHandle, CoordinationError> {
        let name = render_lock_name(template, args)?;
        self.acquire(&name, ttl_ms).await
    }

    /// Release a lock if `handle` still owns it.
    ///
    /// Returns `false` if the lease had expired or the lock now belongs to
    /// someone else; in that case nothing is deleted.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, CoordinationError> {
        if handle.local {
            return Ok(self.release_local(handle));
        }

        match self.store.write(WriteRequest::compare_and_delete(&handle.key, &handle.token)).await {
            Ok(_) => {
                debug!(key = %handle.key, "lock released");
                Ok(true)
            }
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => {
                info!(key = %handle.key, "release skipped, lock no longer owned");
                Ok(false)
            }
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }

    /// Reset the lease of a lock `handle` still owns to `ttl_ms` from now.
    ///
    /// Returns `false` if ownership was lost.
    pub async fn extend(&self, handle: &mut LockHandle, ttl_ms: u64) -> Result<bool, CoordinationError> {
        validate_ttl(ttl_ms)?;
        let now_ms = self.clock.now_unix_ms();

        if handle.local {
            let mut local = self.local.lock();
            return Ok(match local.get_mut(&handle.key) {
                Some(lease) if lease.token == handle.token && lease.expires_at_ms > now_ms => {
                    lease.expires_at_ms = now_ms.saturating_add(ttl_ms);
                    handle.acquired_at_ms = now_ms;
                    handle.ttl_ms = ttl_ms;
                    true
                }
                _ => false,
            });
        }

        let request = WriteRequest::compare_and_swap(&handle.key, Some(handle.token.clone()), &handle.token, Some(ttl_ms));
        match self.store.write(request).await {
            Ok(_) => {
                handle.acquired_at_ms = now_ms;
                handle.ttl_ms = ttl_ms;
                debug!(key = %handle.key, ttl_ms, "lock extended");
                Ok(true)
            }
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Ok(false),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }

    async fn remaining_ttl(&self, key: &str) -> u64 {
        match self.store.read(ReadRequest::new(key)).await {
            Ok(result) => result.kv.and_then(|kv| kv.ttl_remaining_ms).unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn acquire_local(&self, key: String, token: String, ttl_ms: u64) -> Result<LockHandle, CoordinationError> {
        let now_ms = self.clock.now_unix_ms();
        let mut local = self.local.lock();
        if let Some(lease) = local.get(&key) {
            if lease.expires_at_ms > now_ms {
                return Err(CoordinationError::LockHeld {
                    remaining_ttl_ms: lease.expires_at_ms - now_ms,
                    name: key,
                });
            }
        }
        local.insert(key.clone(), LocalLease {
            token: token.clone(),
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        });
        Ok(LockHandle {
            key,
            token,
            acquired_at_ms: now_ms,
            ttl_ms,
            local: true,
        })
    }

    fn release_local(&self, handle: &LockHandle) -> bool {
        let mut local = self.local.lock();
        match local.get(&handle.key) {
            Some(lease) if lease.token == handle.token => {
                local.remove(&handle.key);
                true
            }
            _ => false,
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> LockManager<S> {
    /// Acquire `name` and wrap the handle in a guard that releases on drop.
    pub async fn acquire_guard(&self, name: &str, ttl_ms: u64) -> Result<LockGuard<S>, CoordinationError> {
        let handle = self.acquire(name, ttl_ms).await?;
        Ok(LockGuard {
            manager: self.clone(),
            handle: Some(handle),
        })
    }

    /// Run `body` while holding the lock named by `template` and `args`.
    ///
    /// The lock is released on every exit path: normal return, a panic in
    /// `body`, or the returned future being dropped. A failed release after
    /// `body` finished is logged and does not discard its output; the lease
    /// lapses at its TTL.
    pub async fn with_lock<F, Fut, T>(
        &self,
        template: &str,
        args: &[(&str, &str)],
        ttl_ms: u64,
        body: F,
    ) -> Result<T, CoordinationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let name = render_lock_name(template, args)?;
        let guard = self.acquire_guard(&name, ttl_ms).await?;
        let output = body().await;

        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %name, "lease expired before the critical section finished"),
            Err(e) => warn!(lock = %name, error = %e, "failed to release lock, it will expire at its ttl"),
        }
        Ok(output)
    }
}

/// Owns a lock until released or dropped.
///
/// Dropping a guard without calling [`LockGuard::release`] schedules the
/// release on the current Tokio runtime. Outside a runtime the lease is
/// left to expire.
pub struct LockGuard<S: KeyValueStore + ?Sized + 'static> {
    manager: LockManager<S>,
    handle: Option<LockHandle>,
}

impl<S: KeyValueStore + ?Sized + 'static> LockGuard<S> {
    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    /// Extend the held lease.
    pub async fn extend(&mut self, ttl_ms: u64) -> Result<bool, CoordinationError> {
        match self.handle.as_mut() {
            Some(handle) => self.manager.extend(handle, ttl_ms).await,
            None => Ok(false),
        }
    }

    /// Release now and report whether the lock was still owned.
    pub async fn release(mut self) -> Result<bool, CoordinationError> {
        match self.handle.take() {
            Some(handle) => self.manager.release(&handle).await,
            None => Ok(false),
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> Drop for LockGuard<S> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let manager = self.manager.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = manager.release(&handle).await {
                        warn!(key = %handle.key, error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(key = %handle.key, "lock guard dropped outside a runtime, lease will expire"),
        }
    }
}
