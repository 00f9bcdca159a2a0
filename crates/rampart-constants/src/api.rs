//! Public API bounds for the coordination store.

/// Maximum size of a single key in bytes (1 KB).
///
/// Keys are composed from a namespace prefix plus caller-supplied identity or
/// lock arguments, so this caps what an untrusted identity can allocate.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single value in bytes (1 MB).
///
/// The largest record in practice is the serialized revocation Bloom filter.
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

/// Maximum size of one wire frame in bytes.
///
/// A frame carries one request or response; leaves headroom over
/// [`MAX_VALUE_SIZE`] for the key, the JSON envelope and escaping.
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Maximum TTL accepted for any record (7 days).
pub const MAX_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
