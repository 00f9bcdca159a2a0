//! Error types for coordination primitives.

use std::fmt;

use rampart_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors from coordination primitives.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Lock is held by another owner.
    #[snafu(display("lock '{name}' is held, expires in {remaining_ttl_ms}ms"))]
    LockHeld {
        /// Full lock key.
        name: String,
        /// Remaining TTL of the current holder.
        remaining_ttl_ms: u64,
    },

    /// A lock name template could not be rendered.
    #[snafu(display("invalid lock template '{template}': {reason}"))]
    InvalidLockTemplate { template: String, reason: String },

    /// A TTL outside the accepted range.
    #[snafu(display("ttl {ttl_ms}ms outside {min_ms}..={max_ms}ms"))]
    InvalidTtl { ttl_ms: u64, min_ms: u64, max_ms: u64 },

    /// A limiter or breaker was configured with unusable parameters.
    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    /// Maximum retries exceeded.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Data in storage is corrupted or unparseable.
    #[snafu(display("corrupted data in key '{key}': {reason}"))]
    CorruptedData {
        /// The key with corrupted data.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// CAS operation failed, retry may succeed.
    #[snafu(display("CAS conflict, retry needed"))]
    CasConflict,

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// JSON serialization/deserialization error.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },

    /// Durable revocation ledger error.
    #[snafu(display("revocation ledger error: {source}"))]
    Ledger { source: LedgerError },
}

impl CoordinationError {
    /// Whether this error means the coordination store could not answer.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            CoordinationError::Storage { source } => source.is_unavailable(),
            _ => false,
        }
    }
}

impl From<KeyValueStoreError> for CoordinationError {
    fn from(source: KeyValueStoreError) -> Self {
        CoordinationError::Storage { source }
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(source: serde_json::Error) -> Self {
        CoordinationError::Serialization { source }
    }
}

impl From<LedgerError> for CoordinationError {
    fn from(source: LedgerError) -> Self {
        CoordinationError::Ledger { source }
    }
}

/// Errors from a durable revocation ledger.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LedgerError {
    /// The backing database rejected an operation.
    #[snafu(display("ledger {operation} failed: {source}"))]
    Database {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("ledger task failed: {source}"))]
    Join { source: tokio::task::JoinError },

    #[snafu(display("ledger connection poisoned"))]
    Poisoned,

    #[snafu(display("ledger unavailable: {reason}"))]
    Unavailable { reason: String },
}

/// A denied admission check, for callers that propagate denials with `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    /// Burst capacity or window limit that applied.
    pub limit: u64,
    /// Wait in milliseconds until a request could be admitted.
    pub retry_after_ms: u64,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limited: limit {}, retry after {}ms", self.limit, self.retry_after_ms)
    }
}

impl std::error::Error for RateLimited {}

/// Error from an operation guarded by a circuit breaker.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    Open { service: String, retry_after_ms: u64 },
    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { service, retry_after_ms } => {
                write!(f, "circuit for '{}' is open, retry after {}ms", service, retry_after_ms)
            }
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}
