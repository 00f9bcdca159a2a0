//! Fault injection for exercising degraded behavior.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rampart_kv_types::DeleteRequest;
use rampart_kv_types::DeleteResult;
use rampart_kv_types::KeyValueStoreError;
use rampart_kv_types::ReadRequest;
use rampart_kv_types::ReadResult;
use rampart_kv_types::WriteRequest;
use rampart_kv_types::WriteResult;

use crate::traits::KeyValueStore;

/// Wraps a store and can simulate an outage or a slow network.
///
/// Toggles are shared across clones, so a test can keep one handle and flip
/// the store down while the primitives hold another.
#[derive(Clone)]
pub struct FaultyKeyValueStore<S> {
    inner: Arc<S>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
}

impl<S: KeyValueStore> FaultyKeyValueStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            unavailable: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of calls that reached this wrapper.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    async fn gate(&self) -> Result<(), KeyValueStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency_ms = self.latency_ms.load(Ordering::SeqCst);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KeyValueStoreError::Unavailable {
                reason: "injected outage".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FaultyKeyValueStore<S> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.gate().await?;
        self.inner.write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.gate().await?;
        self.inner.read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.gate().await?;
        self.inner.delete(request).await
    }
}
