//! Write operation types.

use serde::Deserialize;
use serde::Serialize;

/// Commands that modify the coordination store.
///
/// The conditional commands are the atomic building blocks of every
/// coordination script: the store applies each one indivisibly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a key with no expiry.
    Set { key: String, value: String },
    /// Set a key that expires after `ttl_ms`.
    SetWithTTL { key: String, value: String, ttl_ms: u64 },
    /// Create a key only if it does not exist.
    SetIfAbsent {
        key: String,
        value: String,
        ttl_ms: Option<u64>,
    },
    /// Replace the value only if the current value equals `expected`.
    ///
    /// `expected: None` means the key must be absent. `ttl_ms: None` stores the
    /// new value without expiry.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
        ttl_ms: Option<u64>,
    },
    /// Delete the key only if the current value equals `expected`.
    CompareAndDelete { key: String, expected: String },
    /// Delete a key unconditionally.
    Delete { key: String },
    /// Reset the expiry of an existing key.
    Expire { key: String, ttl_ms: u64 },
}

impl WriteCommand {
    /// The key this command touches.
    pub fn key(&self) -> &str {
        match self {
            WriteCommand::Set { key, .. }
            | WriteCommand::SetWithTTL { key, .. }
            | WriteCommand::SetIfAbsent { key, .. }
            | WriteCommand::CompareAndSwap { key, .. }
            | WriteCommand::CompareAndDelete { key, .. }
            | WriteCommand::Delete { key }
            | WriteCommand::Expire { key, .. } => key,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            WriteCommand::Set { .. } => "set",
            WriteCommand::SetWithTTL { .. } => "set_with_ttl",
            WriteCommand::SetIfAbsent { .. } => "set_if_absent",
            WriteCommand::CompareAndSwap { .. } => "compare_and_swap",
            WriteCommand::CompareAndDelete { .. } => "compare_and_delete",
            WriteCommand::Delete { .. } => "delete",
            WriteCommand::Expire { .. } => "expire",
        }
    }
}

/// Request to perform a write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::from_command(WriteCommand::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self::from_command(WriteCommand::SetWithTTL {
            key: key.into(),
            value: value.into(),
            ttl_ms,
        })
    }

    pub fn set_if_absent(key: impl Into<String>, value: impl Into<String>, ttl_ms: Option<u64>) -> Self {
        Self::from_command(WriteCommand::SetIfAbsent {
            key: key.into(),
            value: value.into(),
            ttl_ms,
        })
    }

    pub fn compare_and_swap(
        key: impl Into<String>,
        expected: Option<String>,
        new_value: impl Into<String>,
        ttl_ms: Option<u64>,
    ) -> Self {
        Self::from_command(WriteCommand::CompareAndSwap {
            key: key.into(),
            expected,
            new_value: new_value.into(),
            ttl_ms,
        })
    }

    pub fn compare_and_delete(key: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::from_command(WriteCommand::CompareAndDelete {
            key: key.into(),
            expected: expected.into(),
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::from_command(WriteCommand::Delete { key: key.into() })
    }

    pub fn expire(key: impl Into<String>, ttl_ms: u64) -> Self {
        Self::from_command(WriteCommand::Expire { key: key.into(), ttl_ms })
    }

    pub fn from_command(command: WriteCommand) -> Self {
        Self { command }
    }
}

/// Result of a successful write.
///
/// Conditional writes whose precondition fails return
/// `KeyValueStoreError::CompareAndSwapFailed` instead of a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    pub key: String,
    /// False only for deletes of a key that did not exist.
    pub applied: bool,
}
