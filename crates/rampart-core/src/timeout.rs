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

/// Bounds every store call by a fixed deadline.
///
/// An elapsed deadline surfaces as [`KeyValueStoreError::Timeout`], which the
/// primitives treat as the store being unavailable.
pub struct TimeoutKeyValueStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: KeyValueStore> TimeoutKeyValueStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, KeyValueStoreError>>,
    ) -> Result<T, KeyValueStoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(KeyValueStoreError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimeoutKeyValueStore<S> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.bounded(self.inner.write(request)).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.bounded(self.inner.read(request)).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.bounded(self.inner.delete(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FaultyKeyValueStore;
    use crate::DeterministicKeyValueStore;

    #[tokio::test]
    async fn passes_through_fast_calls() {
        let store = TimeoutKeyValueStore::new(DeterministicKeyValueStore::new(), Duration::from_millis(100));
        store.write(WriteRequest::set("k", "v")).await.unwrap();
        assert_eq!(store.read(ReadRequest::new("k")).await.unwrap().value(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let faulty = FaultyKeyValueStore::new(DeterministicKeyValueStore::new());
        faulty.set_latency(Duration::from_secs(5));
        let store = TimeoutKeyValueStore::new(faulty, Duration::from_millis(50));

        let err = store.read(ReadRequest::new("k")).await.unwrap_err();
        assert_eq!(err, KeyValueStoreError::Timeout { duration_ms: 50 });
        assert!(err.is_unavailable());
    }
}
