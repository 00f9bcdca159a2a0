//! Coordination store abstraction.
//!
//! Every rampart primitive talks to shared state through [`KeyValueStore`]:
//! plain reads, writes with expiry, and the conditional writes
//! (set-if-absent, compare-and-swap, compare-and-delete) that make
//! read-compute-write sequences atomic.
//!
//! Backends:
//!
//! - [`DeterministicKeyValueStore`]: in-process store with lazy TTL expiry
//! - [`TimeoutKeyValueStore`]: bounds every call on an inner store
//! - `testing::FaultyKeyValueStore` (feature `testing`): outage and latency injection

mod inmemory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod timeout;
mod traits;

pub use inmemory::DeterministicKeyValueStore;
pub use rampart_kv_types::DeleteRequest;
pub use rampart_kv_types::DeleteResult;
pub use rampart_kv_types::KeyValue;
pub use rampart_kv_types::KeyValueStoreError;
pub use rampart_kv_types::ReadRequest;
pub use rampart_kv_types::ReadResult;
pub use rampart_kv_types::WriteCommand;
pub use rampart_kv_types::WriteRequest;
pub use rampart_kv_types::WriteResult;
pub use timeout::TimeoutKeyValueStore;
pub use traits::KeyValueStore;
