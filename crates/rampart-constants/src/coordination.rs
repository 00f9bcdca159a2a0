//! Constants for the coordination primitives.

// ============================================================================
// CAS retry policy
// ============================================================================

/// Maximum compare-and-swap attempts for one atomic script execution.
///
/// Contention beyond this is surfaced to the primitive, which decides the
/// degraded outcome (deny for rate limits, skip for breaker bookkeeping).
pub const MAX_CAS_RETRIES: u32 = 64;

/// Initial backoff between CAS attempts.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;

/// Upper bound on the CAS backoff.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 32;

// ============================================================================
// Rate limiting
// ============================================================================

/// Grace added to the bucket record TTL beyond the time needed to refill.
pub const BUCKET_TTL_GRACE_MS: u64 = 60_000;

/// Extra lifetime of a sliding window record beyond the window itself.
pub const WINDOW_TTL_GRACE_MS: u64 = 1_000;

/// Maximum request limit for one sliding window.
///
/// The window record stores one timestamp per admitted request.
pub const MAX_WINDOW_LIMIT: u64 = 10_000;

/// `Retry-After` given when a check is denied because it could not be
/// evaluated (bad limits, unusable key, corrupt record, CAS contention).
pub const REFUSED_RETRY_AFTER_MS: u64 = 1_000;

/// Default fixed window of the process-local fallback limiter.
pub const DEFAULT_FALLBACK_WINDOW_MS: u64 = 60_000;

/// Maximum identities tracked by the process-local fallback limiter.
pub const MAX_FALLBACK_IDENTITIES: usize = 100_000;

// ============================================================================
// Locks
// ============================================================================

/// Shortest lock TTL accepted.
pub const MIN_LOCK_TTL_MS: u64 = 100;

/// Longest lock TTL accepted (1 hour).
pub const MAX_LOCK_TTL_MS: u64 = 60 * 60 * 1000;

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

// ============================================================================
// Circuit breaker
// ============================================================================

/// Default number of failures that opens a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open circuit waits before allowing a trial call.
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 30_000;

/// Lifetime of a circuit record that is not closed.
///
/// Open and half-open records outlive any sane recovery timeout; a record
/// abandoned by every process eventually disappears and reads as closed.
pub const CIRCUIT_RECORD_TTL_MS: u64 = 24 * 60 * 60 * 1000;

// ============================================================================
// Revocation
// ============================================================================

/// Default number of revocations the Bloom filter is sized for.
pub const DEFAULT_BLOOM_EXPECTED_ITEMS: u64 = 100_000;

/// Default Bloom filter false positive rate.
pub const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Upper bound on Bloom filter size in bits (fits in [`crate::MAX_VALUE_SIZE`] once encoded).
pub const MAX_BLOOM_BITS: u64 = 4 * 1024 * 1024;

/// Upper bound on hash functions per Bloom filter.
pub const MAX_BLOOM_HASHES: u32 = 16;

/// Default interval between revocation maintenance runs.
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 15 * 60 * 1000;

/// Window re-scanned after a filter rebuild to pick up concurrent revocations.
pub const REBUILD_CATCH_UP_GRACE_MS: u64 = 60_000;
