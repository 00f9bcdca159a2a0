//! Coordination primitives over a shared key-value store.
//!
//! Independent server processes share no memory; they agree through the
//! coordination store on four questions:
//!
//! - [`rate_limiter`]: may this caller proceed? (token bucket, sliding window)
//! - [`lock`]: who may run this critical section right now?
//! - [`circuit_breaker`]: is this dependency healthy enough to call?
//! - [`revocation`]: has this credential been invalidated?
//!
//! Every read-modify-write goes through [`script::ScriptRunner`], which turns
//! a pure state transition into a compare-and-swap loop against the store.
//! The transitions themselves live in [`pure`] and take time as an argument.
//!
//! Each primitive owns one key namespace: `ratelimit:`, `lock:`, `circuit:`
//! and `revocation:`.
//!
//! Store faults never reach callers as panics. Each primitive maps them to a
//! documented degraded behavior: admission falls back to a process-local
//! counter, breakers behave as closed, revocation checks consult the durable
//! ledger.

pub mod circuit_breaker;
pub mod error;
pub mod lock;
pub mod pure;
pub mod rate_limiter;
pub mod revocation;
pub mod script;
pub mod types;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerConfig;
pub use circuit_breaker::CircuitBreakerRegistry;
pub use error::BreakerError;
pub use error::CoordinationError;
pub use error::LedgerError;
pub use error::RateLimited;
pub use lock::LockConfig;
pub use lock::LockGuard;
pub use lock::LockHandle;
pub use lock::LockManager;
pub use rate_limiter::AdmissionConfig;
pub use rate_limiter::AdmissionController;
pub use rate_limiter::DecisionSource;
pub use rate_limiter::LimitAlgorithm;
pub use rate_limiter::RateDecision;
pub use rate_limiter::Tier;
pub use rate_limiter::TierLimits;
pub use rate_limiter::TierTable;
pub use revocation::InMemoryRevocationLedger;
pub use revocation::MaintenanceReport;
pub use revocation::RevocationConfig;
pub use revocation::RevocationLedger;
pub use revocation::RevocationRegistry;
pub use revocation::RevocationSource;
pub use revocation::RevocationStatus;
#[cfg(feature = "sqlite")]
pub use revocation::SqliteRevocationLedger;
pub use types::CircuitSnapshot;
pub use types::CircuitState;
