//! Atomic read-compute-write scripts.
//!
//! A script is a pure function from the current value of one key (and the
//! current time) to a new value plus an output. [`ScriptRunner`] applies it
//! with compare-and-swap against the value it read, retrying with
//! exponential backoff when another writer got there first. Concurrent
//! callers therefore can never tear a read-modify-write sequence.

use std::sync::Arc;
use std::time::Duration;

use rampart_constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use rampart_constants::CAS_RETRY_MAX_BACKOFF_MS;
use rampart_constants::MAX_CAS_RETRIES;
use rampart_core::KeyValueStore;
use rampart_core::KeyValueStoreError;
use rampart_core::ReadRequest;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use tracing::trace;

use crate::error::CoordinationError;

/// What a script does to its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Leave the key untouched.
    Keep,
    /// Replace the value. `ttl_ms: None` stores it without expiry.
    Put { value: String, ttl_ms: Option<u64> },
    /// Remove the key.
    Delete,
}

/// Result of one script evaluation.
#[derive(Debug, Clone)]
pub struct ScriptStep<T> {
    pub effect: Effect,
    pub output: T,
}

impl<T> ScriptStep<T> {
    pub fn keep(output: T) -> Self {
        Self {
            effect: Effect::Keep,
            output,
        }
    }

    pub fn put(value: String, ttl_ms: Option<u64>, output: T) -> Self {
        Self {
            effect: Effect::Put { value, ttl_ms },
            output,
        }
    }

    pub fn delete(output: T) -> Self {
        Self {
            effect: Effect::Delete,
            output,
        }
    }
}

/// A deterministic transition over one key.
///
/// `execute` may run several times for one [`ScriptRunner::run`] call when
/// writers race, so it must not have side effects.
pub trait AtomicScript: Send + Sync {
    type Output: Send;

    /// Name for logs and retry errors.
    fn name(&self) -> &'static str;

    fn execute(&self, current: Option<&str>, now_ms: u64) -> Result<ScriptStep<Self::Output>, CoordinationError>;
}

/// Runs [`AtomicScript`]s against a store.
pub struct ScriptRunner<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn TimeProvider>,
}

impl<S: KeyValueStore + ?Sized> Clone for ScriptRunner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: KeyValueStore + ?Sized> ScriptRunner<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_unix_ms()
    }

    /// Read the live value of `key`, `None` if absent.
    pub async fn read(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        match self.store.read(ReadRequest::new(key)).await {
            Ok(result) => Ok(result.kv.map(|kv| kv.value)),
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }

    /// Apply `script` to `key` atomically and return its output.
    ///
    /// # Errors
    ///
    /// - `Storage` if the store fails
    /// - `MaxRetriesExceeded` if every attempt lost a race
    /// - whatever the script itself returns
    pub async fn run<A: AtomicScript>(&self, key: &str, script: &A) -> Result<A::Output, CoordinationError> {
        let mut attempt = 0u32;
        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;

        loop {
            let current = self.read(key).await?;
            let step = script.execute(current.as_deref(), self.now_ms())?;

            match self.apply(key, current, step.effect).await {
                Ok(()) => return Ok(step.output),
                Err(CoordinationError::CasConflict) => {
                    attempt += 1;
                    if attempt >= MAX_CAS_RETRIES {
                        return Err(CoordinationError::MaxRetriesExceeded {
                            operation: format!("{} on '{}'", script.name(), key),
                            attempts: attempt,
                        });
                    }
                    trace!(key, script = script.name(), attempt, "script lost CAS race, retrying");
                    // Jitter in [backoff/2, backoff] so racing processes spread out.
                    let delay_ms = backoff_ms / 2 + rand::random::<u64>() % (backoff_ms / 2 + 1);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply(&self, key: &str, current: Option<String>, effect: Effect) -> Result<(), CoordinationError> {
        let request = match effect {
            Effect::Keep => return Ok(()),
            Effect::Put { value, ttl_ms } => WriteRequest::compare_and_swap(key, current, value, ttl_ms),
            Effect::Delete => match current {
                None => return Ok(()),
                Some(expected) => WriteRequest::compare_and_delete(key, expected),
            },
        };

        match self.store.write(request).await {
            Ok(_) => Ok(()),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Err(CoordinationError::CasConflict),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }
}
