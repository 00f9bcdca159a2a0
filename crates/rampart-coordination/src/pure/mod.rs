//! Pure state transitions for the coordination primitives.
//!
//! Functional core, imperative shell: the async primitives read a record,
//! hand it to a function here together with the current time, and write back
//! whatever it returns. Nothing in this module performs I/O or reads a clock.
//!
//! - [`rate_limiter`]: token bucket refill, sliding window pruning
//! - [`lock`]: lock name templating
//! - [`circuit`]: breaker admission and outcome transitions
//! - [`bloom`]: Bloom filter sizing and probe positions
//!
//! # Tiger Style
//!
//! - Saturating arithmetic on timestamps
//! - Time passed as an explicit parameter
//! - No panics: all functions are total

pub mod bloom;
pub mod circuit;
pub mod lock;
pub mod rate_limiter;

pub use circuit::Admission;
pub use circuit::CallOutcome;
pub use circuit::CircuitParams;
pub use circuit::RecordUpdate;
pub use lock::escape_key_segment;
pub use lock::render_lock_name;
pub use rate_limiter::admit_to_window;
pub use rate_limiter::bucket_ttl_ms;
pub use rate_limiter::prune_window;
pub use rate_limiter::replenish;
pub use rate_limiter::take_tokens;
pub use rate_limiter::TokenAvailability;
pub use rate_limiter::WindowAdmission;
