use serde::Deserialize;
use serde::Serialize;

/// Errors returned by a coordination store.
///
/// Serializable so that a remote store can return them verbatim over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KeyValueStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    /// A conditional write saw a different current value.
    ///
    /// Returned by compare-and-swap, compare-and-delete and set-if-absent.
    #[error("conditional write on '{key}' failed")]
    CompareAndSwapFailed { key: String, actual: Option<String> },
    #[error("key must not be empty")]
    EmptyKey,
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: usize, max: u32 },
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: u32 },
    #[error("ttl of {ttl_ms}ms is outside 1..={max_ms}ms")]
    InvalidTtl { ttl_ms: u64, max_ms: u64 },
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("protocol error: {reason}")]
    Protocol { reason: String },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
}

impl KeyValueStoreError {
    /// Whether this error means the store could not be reached or could not answer.
    ///
    /// These are infrastructure faults: every primitive maps them onto its
    /// degraded behavior instead of treating them as a business outcome.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            KeyValueStoreError::Timeout { .. }
                | KeyValueStoreError::Unavailable { .. }
                | KeyValueStoreError::Protocol { .. }
                | KeyValueStoreError::Failed { .. }
        )
    }

    /// Whether this is a failed compare-and-swap style precondition.
    pub fn is_conflict(&self) -> bool {
        matches!(self, KeyValueStoreError::CompareAndSwapFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = KeyValueStoreError::NotFound { key: "lock:a".into() };
        assert_eq!(err.to_string(), "key 'lock:a' not found");
    }

    #[test]
    fn timeout_display() {
        let err = KeyValueStoreError::Timeout { duration_ms: 1000 };
        assert_eq!(err.to_string(), "operation timed out after 1000ms");
    }

    #[test]
    fn unavailable_classification() {
        assert!(KeyValueStoreError::Timeout { duration_ms: 5 }.is_unavailable());
        assert!(KeyValueStoreError::Unavailable { reason: "down".into() }.is_unavailable());
        assert!(KeyValueStoreError::Protocol { reason: "bad frame".into() }.is_unavailable());
        assert!(KeyValueStoreError::Failed { reason: "io".into() }.is_unavailable());

        assert!(!KeyValueStoreError::NotFound { key: "k".into() }.is_unavailable());
        assert!(!KeyValueStoreError::EmptyKey.is_unavailable());
        let conflict = KeyValueStoreError::CompareAndSwapFailed {
            key: "k".into(),
            actual: None,
        };
        assert!(!conflict.is_unavailable());
        assert!(conflict.is_conflict());
    }

    #[test]
    fn errors_survive_the_wire() {
        let err = KeyValueStoreError::CompareAndSwapFailed {
            key: "lock:job".into(),
            actual: Some("owner-1".into()),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: KeyValueStoreError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
