//! Centralized constants for the rampart coordination layer.
//!
//! Constants are grouped by concern so that every bound has one home:
//!
//! - [`api`]: key and value size limits, wire frame limits
//! - [`coordination`]: CAS retry policy, primitive defaults and bounds
//! - [`network`]: store connect/operation timeouts, connection pool size
//!
//! Tiger Style: every resource has an explicit upper bound, enforced before
//! a request leaves the process.

pub mod api;
pub mod coordination;
pub mod network;

pub use api::MAX_KEY_SIZE;
pub use api::MAX_MESSAGE_SIZE;
pub use api::MAX_VALUE_SIZE;
pub use coordination::CAS_RETRY_INITIAL_BACKOFF_MS;
pub use coordination::CAS_RETRY_MAX_BACKOFF_MS;
pub use coordination::MAX_CAS_RETRIES;
pub use network::DEFAULT_STORE_CONNECT_TIMEOUT_MS;
pub use network::DEFAULT_STORE_OPERATION_TIMEOUT_MS;
