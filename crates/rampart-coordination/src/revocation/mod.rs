//! Credential revocation.
//!
//! A Bloom filter in the coordination store answers most lookups: a
//! negative is conclusive. Positives, and every lookup while the filter is
//! missing or unreachable, go to a [`RevocationLedger`], the durable source
//! of truth. Periodic maintenance prunes expired entries and rebuilds the
//! filter so it stays small.

mod bloom;
mod ledger;
mod registry;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use bloom::BloomFilter;
pub use ledger::InMemoryRevocationLedger;
pub use ledger::RevocationLedger;
pub use registry::MaintenanceReport;
pub use registry::RevocationConfig;
pub use registry::RevocationRegistry;
pub use registry::RevocationSource;
pub use registry::RevocationStatus;
pub use registry::BLOOM_KEY;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRevocationLedger;
