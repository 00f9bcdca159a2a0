//! Admission control and coordination for horizontally scaled API servers.
//!
//! Server processes share no memory. They coordinate through a key-value
//! store (in process, or a `rampart-store` server reached over TCP) and a
//! durable revocation ledger:
//!
//! - rate admission with a token bucket or a sliding window
//! - named locks with owner tokens and TTLs
//! - circuit breakers per downstream dependency
//! - credential revocation through a Bloom filter backed by the ledger
//!
//! [`Rampart`] wires all four from an [`AppConfig`].

pub mod config;
pub mod logging;
mod runtime;

pub use config::AppConfig;
pub use config::ConfigError;
pub use runtime::open_ledger;
pub use runtime::open_store;
pub use runtime::Rampart;
