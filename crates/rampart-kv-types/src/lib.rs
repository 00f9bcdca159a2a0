//! Key-value types for the coordination store.
//!
//! These types are shared by the store trait, the in-memory backend, the wire
//! protocol and the coordination primitives. They carry no behavior beyond
//! construction helpers and validation.

mod error;
mod read;
mod validation;
mod write;

use serde::Deserialize;
use serde::Serialize;

pub use error::KeyValueStoreError;
pub use read::DeleteRequest;
pub use read::DeleteResult;
pub use read::ReadRequest;
pub use read::ReadResult;
pub use validation::validate_key;
pub use validation::validate_write_command;
pub use write::WriteCommand;
pub use write::WriteRequest;
pub use write::WriteResult;

/// A stored value together with its remaining lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Milliseconds until the record expires, `None` if it never does.
    pub ttl_remaining_ms: Option<u64>,
}
