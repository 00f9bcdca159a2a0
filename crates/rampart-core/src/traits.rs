use async_trait::async_trait;
use rampart_kv_types::DeleteRequest;
use rampart_kv_types::DeleteResult;
use rampart_kv_types::KeyValueStoreError;
use rampart_kv_types::ReadRequest;
use rampart_kv_types::ReadResult;
use rampart_kv_types::WriteRequest;
use rampart_kv_types::WriteResult;

/// Shared coordination store.
///
/// Each call is atomic with respect to every other call on the same key.
/// Implementations report infrastructure faults with errors for which
/// [`KeyValueStoreError::is_unavailable`] returns true.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Apply a write command.
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError>;

    /// Read a live key. Missing or expired keys return `NotFound`.
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError>;

    /// Delete a key unconditionally.
    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        (**self).write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        (**self).read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        (**self).delete(request).await
    }
}
