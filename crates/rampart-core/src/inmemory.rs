//! In-process coordination store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rampart_kv_types::validate_key;
use rampart_kv_types::validate_write_command;
use rampart_kv_types::DeleteRequest;
use rampart_kv_types::DeleteResult;
use rampart_kv_types::KeyValue;
use rampart_kv_types::KeyValueStoreError;
use rampart_kv_types::ReadRequest;
use rampart_kv_types::ReadResult;
use rampart_kv_types::WriteCommand;
use rampart_kv_types::WriteRequest;
use rampart_kv_types::WriteResult;
use rampart_time::TimeProvider;
use tokio::sync::Mutex;

use crate::traits::KeyValueStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

/// In-memory key-value store with per-key expiry.
///
/// All operations run under one mutex, so every command (including the
/// conditional ones) is atomic. Expired keys are invisible to reads and
/// conditions, and are removed lazily or by [`Self::purge_expired`].
///
/// Used by tests and as the backing state of the `rampart-store` server.
pub struct DeterministicKeyValueStore {
    inner: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn TimeProvider>,
}

impl Default for DeterministicKeyValueStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock: rampart_time::system_time(),
        }
    }
}

impl DeterministicKeyValueStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an empty store whose expiry follows `clock`.
    pub fn with_time(clock: Arc<dyn TimeProvider>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            clock,
        })
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now_ms = self.clock.now_unix_ms();
        self.inner.lock().await.values().filter(|e| e.is_live(now_ms)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired key. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now_unix_ms();
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, e| e.is_live(now_ms));
        before - inner.len()
    }

    fn expiry(now_ms: u64, ttl_ms: Option<u64>) -> Option<u64> {
        ttl_ms.map(|ttl| now_ms.saturating_add(ttl))
    }
}

fn live_value(inner: &HashMap<String, Entry>, key: &str, now_ms: u64) -> Option<String> {
    inner.get(key).filter(|e| e.is_live(now_ms)).map(|e| e.value.clone())
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        validate_write_command(&request.command)?;

        let now_ms = self.clock.now_unix_ms();
        let mut inner = self.inner.lock().await;
        match request.command {
            WriteCommand::Set { key, value } => {
                inner.insert(key.clone(), Entry {
                    value,
                    expires_at_ms: None,
                });
                Ok(WriteResult { key, applied: true })
            }
            WriteCommand::SetWithTTL { key, value, ttl_ms } => {
                inner.insert(key.clone(), Entry {
                    value,
                    expires_at_ms: Self::expiry(now_ms, Some(ttl_ms)),
                });
                Ok(WriteResult { key, applied: true })
            }
            WriteCommand::SetIfAbsent { key, value, ttl_ms } => {
                if let Some(actual) = live_value(&inner, &key, now_ms) {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key,
                        actual: Some(actual),
                    });
                }
                inner.insert(key.clone(), Entry {
                    value,
                    expires_at_ms: Self::expiry(now_ms, ttl_ms),
                });
                Ok(WriteResult { key, applied: true })
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
                ttl_ms,
            } => {
                let current = live_value(&inner, &key, now_ms);
                if current != expected {
                    return Err(KeyValueStoreError::CompareAndSwapFailed { key, actual: current });
                }
                inner.insert(key.clone(), Entry {
                    value: new_value,
                    expires_at_ms: Self::expiry(now_ms, ttl_ms),
                });
                Ok(WriteResult { key, applied: true })
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                let current = live_value(&inner, &key, now_ms);
                if current.as_deref() != Some(expected.as_str()) {
                    return Err(KeyValueStoreError::CompareAndSwapFailed { key, actual: current });
                }
                inner.remove(&key);
                Ok(WriteResult { key, applied: true })
            }
            WriteCommand::Delete { key } => {
                let existed = inner.remove(&key).is_some_and(|e| e.is_live(now_ms));
                Ok(WriteResult { key, applied: existed })
            }
            WriteCommand::Expire { key, ttl_ms } => match inner.get_mut(&key) {
                Some(entry) if entry.is_live(now_ms) => {
                    entry.expires_at_ms = Self::expiry(now_ms, Some(ttl_ms));
                    Ok(WriteResult { key, applied: true })
                }
                _ => Err(KeyValueStoreError::NotFound { key }),
            },
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        validate_key(&request.key)?;

        let now_ms = self.clock.now_unix_ms();
        let mut inner = self.inner.lock().await;
        match inner.get(&request.key) {
            Some(entry) if entry.is_live(now_ms) => Ok(ReadResult {
                kv: Some(KeyValue {
                    key: request.key,
                    value: entry.value.clone(),
                    ttl_remaining_ms: entry.expires_at_ms.map(|at| at - now_ms),
                }),
            }),
            Some(_) => {
                inner.remove(&request.key);
                Err(KeyValueStoreError::NotFound { key: request.key })
            }
            None => Err(KeyValueStoreError::NotFound { key: request.key }),
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        validate_key(&request.key)?;

        let now_ms = self.clock.now_unix_ms();
        let mut inner = self.inner.lock().await;
        let is_deleted = inner.remove(&request.key).is_some_and(|e| e.is_live(now_ms));
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }
}
