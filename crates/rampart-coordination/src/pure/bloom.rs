//! Bloom filter sizing and probe positions.

use rampart_constants::coordination::MAX_BLOOM_BITS;
use rampart_constants::coordination::MAX_BLOOM_HASHES;

/// Smallest filter we build, so tiny ledgers still get a usable filter.
pub const MIN_BLOOM_BITS: u64 = 1024;

/// Bits needed for `expected_items` at `false_positive_rate`.
///
/// `m = -n ln(p) / (ln 2)^2`, rounded up to a whole byte and clamped to
/// `[MIN_BLOOM_BITS, MAX_BLOOM_BITS]`.
pub fn optimal_num_bits(expected_items: u64, false_positive_rate: f64) -> u64 {
    let n = expected_items.max(1) as f64;
    let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
    let m = (-n * p.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil() as u64;
    m.div_ceil(8).saturating_mul(8).clamp(MIN_BLOOM_BITS, MAX_BLOOM_BITS)
}

/// Hash functions for `num_bits` over `expected_items`: `k = (m / n) ln 2`,
/// clamped to `[1, MAX_BLOOM_HASHES]`.
pub fn optimal_num_hashes(num_bits: u64, expected_items: u64) -> u32 {
    let k = (num_bits as f64 / expected_items.max(1) as f64 * std::f64::consts::LN_2).round();
    (k as u32).clamp(1, MAX_BLOOM_HASHES)
}

/// Bit positions probed for `item`.
///
/// Double hashing over one BLAKE3 digest: `h1 + i * h2 (mod m)`, with `h2`
/// forced odd so the probes do not collapse.
pub fn bit_positions(item: &str, num_bits: u64, num_hashes: u32) -> impl Iterator<Item = u64> {
    let digest = blake3::hash(item.as_bytes());
    let bytes = digest.as_bytes();
    let mut h1 = [0u8; 8];
    let mut h2 = [0u8; 8];
    h1.copy_from_slice(&bytes[..8]);
    h2.copy_from_slice(&bytes[8..16]);
    let h1 = u64::from_le_bytes(h1);
    let h2 = u64::from_le_bytes(h2) | 1;
    let m = num_bits.max(1);
    (0..u64::from(num_hashes)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
}

/// Expected false positive rate after `inserted` items.
pub fn estimated_false_positive_rate(num_bits: u64, num_hashes: u32, inserted: u64) -> f64 {
    let k = f64::from(num_hashes);
    let exponent = -k * inserted as f64 / num_bits.max(1) as f64;
    (1.0 - exponent.exp()).powf(k)
}
