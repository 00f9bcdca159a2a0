//! Bloom filter stored as one value in the coordination store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;

use crate::pure::bloom::bit_positions;
use crate::pure::bloom::optimal_num_bits;
use crate::pure::bloom::optimal_num_hashes;

/// Probabilistic set of revoked token ids. No false negatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    items: u64,
    bits: Vec<u8>,
}

/// Stored form: parameters plus the bit array in base64.
#[derive(Serialize, Deserialize)]
struct EncodedFilter {
    num_bits: u64,
    num_hashes: u32,
    items: u64,
    bits: String,
}

impl BloomFilter {
    /// An empty filter sized for `expected_items` at `false_positive_rate`.
    pub fn new(expected_items: u64, false_positive_rate: f64) -> Self {
        let num_bits = optimal_num_bits(expected_items, false_positive_rate);
        let num_hashes = optimal_num_hashes(num_bits, expected_items);
        Self {
            num_bits,
            num_hashes,
            items: 0,
            bits: vec![0; (num_bits / 8) as usize],
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Insertions so far, counting repeats.
    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn insert(&mut self, item: &str) {
        for bit in bit_positions(item, self.num_bits, self.num_hashes) {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        self.items = self.items.saturating_add(1);
    }

    /// `false` means definitely absent.
    pub fn contains(&self, item: &str) -> bool {
        bit_positions(item, self.num_bits, self.num_hashes).all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&EncodedFilter {
            num_bits: self.num_bits,
            num_hashes: self.num_hashes,
            items: self.items,
            bits: STANDARD.encode(&self.bits),
        })
    }

    /// Parse a stored filter. `None` if the value is not a well-formed filter.
    pub fn decode(value: &str) -> Option<Self> {
        let encoded: EncodedFilter = serde_json::from_str(value).ok()?;
        let bits = STANDARD.decode(encoded.bits).ok()?;
        if encoded.num_hashes == 0 || encoded.num_bits == 0 || encoded.num_bits % 8 != 0 {
            return None;
        }
        if bits.len() as u64 != encoded.num_bits / 8 {
            return None;
        }
        Some(Self {
            num_bits: encoded.num_bits,
            num_hashes: encoded.num_hashes,
            items: encoded.items,
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_items_are_members() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..1_000 {
            filter.insert(&format!("tok-{i}"));
        }
        assert!((0..1_000).all(|i| filter.contains(&format!("tok-{i}"))));
        assert_eq!(filter.items(), 1_000);
    }

    #[test]
    fn false_positive_rate_is_near_target() {
        let mut filter = BloomFilter::new(2_000, 0.01);
        for i in 0..2_000 {
            filter.insert(&format!("revoked-{i}"));
        }
        let hits = (0..20_000).filter(|i| filter.contains(&format!("live-{i}"))).count();
        // 1% target; allow generous slack
        assert!(hits < 600, "{hits} false positives");
    }

    #[test]
    fn stored_form_survives() {
        let mut filter = BloomFilter::new(100, 0.05);
        filter.insert("abc");
        let decoded = BloomFilter::decode(&filter.encode().unwrap()).unwrap();
        assert_eq!(decoded, filter);
        assert!(decoded.contains("abc"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(BloomFilter::decode("not json").is_none());
        assert!(BloomFilter::decode(r#"{"num_bits":16,"num_hashes":2,"items":0,"bits":"AA=="}"#).is_none());
        assert!(BloomFilter::decode(r#"{"num_bits":8,"num_hashes":0,"items":0,"bits":"AA=="}"#).is_none());
        assert!(BloomFilter::decode(r#"{"num_bits":8,"num_hashes":1,"items":0,"bits":"AA=="}"#).is_some());
    }
}
