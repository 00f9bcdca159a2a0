//! Network constants for talking to the coordination store.

/// Default timeout for establishing a store connection.
pub const DEFAULT_STORE_CONNECT_TIMEOUT_MS: u64 = 1_000;

/// Default timeout for one store round trip.
///
/// Distinct from any TTL stored in a record; hitting it means the store is
/// treated as unavailable.
pub const DEFAULT_STORE_OPERATION_TIMEOUT_MS: u64 = 1_000;

/// Upper bound accepted for either store timeout.
pub const MAX_STORE_TIMEOUT_MS: u64 = 30_000;

/// Idle connections kept by the remote store client.
pub const DEFAULT_STORE_POOL_SIZE: usize = 8;

/// Upper bound on the remote store connection pool.
pub const MAX_STORE_POOL_SIZE: usize = 256;

/// Maximum concurrent connections served by the store server.
pub const MAX_SERVER_CONNECTIONS: usize = 4_096;
