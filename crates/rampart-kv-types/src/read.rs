//! Read and delete request types.

use serde::Deserialize;
use serde::Serialize;

use crate::KeyValue;

/// Request to read a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

impl ReadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Response from a read.
///
/// A missing key is reported as `KeyValueStoreError::NotFound`, so a
/// successful read always carries a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub kv: Option<KeyValue>,
}

impl ReadResult {
    /// The value, if any.
    pub fn value(&self) -> Option<&str> {
        self.kv.as_ref().map(|kv| kv.value.as_str())
    }
}

/// Request to delete a key unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
}

impl DeleteRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Result of a delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub key: String,
    pub is_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_result_value() {
        let result = ReadResult {
            kv: Some(KeyValue {
                key: "k".into(),
                value: "v".into(),
                ttl_remaining_ms: Some(10),
            }),
        };
        assert_eq!(result.value(), Some("v"));
        assert_eq!(ReadResult { kv: None }.value(), None);
    }
}
