//! Fixed-size Bloom filter (C9) used for loop suppression: a routed message
//! carries the set of peers it has already visited as a compact probabilistic
//! bit array, not a growing list, so forwarding cost stays flat regardless of
//! hop count.
//!
//! Sized per spec.md §9: 8 bits x 128 bytes = 1024 bits, `k` positions per
//! element derived from one `blake3` hash rather than `k` independent hash
//! functions (splitting one hash into `k` windows, same trick the source
//! uses by slicing a single `GNUNET_CRYPTO_hash`).

use crate::identity::Id;
use serde::{Deserialize, Serialize};

/// Bit-array size in bytes (`DHT_BLOOM_SIZE` / 8).
pub const BLOOM_BYTES: usize = 128;
const BLOOM_BITS: usize = BLOOM_BYTES * 8;
/// Number of hash positions tested/set per element (`DHT_BLOOM_K`).
pub const BLOOM_K: usize = 4;

/// A fixed-size Bloom filter tracking peers a routed message has visited.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bloom {
    bits: [u8; BLOOM_BYTES],
}

impl Default for Bloom {
    fn default() -> Self {
        Bloom {
            bits: [0u8; BLOOM_BYTES],
        }
    }
}

impl Bloom {
    /// An empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    fn positions(id: &Id) -> [usize; BLOOM_K] {
        let digest = blake3::hash(id.as_bytes());
        let bytes = digest.as_bytes();
        let mut positions = [0usize; BLOOM_K];
        for (i, pos) in positions.iter_mut().enumerate() {
            let window = &bytes[i * 4..i * 4 + 4];
            let value = u32::from_be_bytes([window[0], window[1], window[2], window[3]]);
            *pos = (value as usize) % BLOOM_BITS;
        }
        positions
    }

    fn set_bit(&mut self, bit: usize) {
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    fn get_bit(&self, bit: usize) -> bool {
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// `true` iff every position for `id` is already set.
    pub fn contains(&self, id: &Id) -> bool {
        Self::positions(id).iter().all(|&p| self.get_bit(p))
    }

    /// Test-and-set: records `id` as visited and returns whether it was
    /// already present beforehand.
    pub fn visit(&mut self, id: &Id) -> bool {
        let already = self.contains(id);
        for p in Self::positions(id) {
            self.set_bit(p);
        }
        already
    }

    /// Bit-wise OR merge, used when a duplicate request arrival needs to
    /// fold its visited set into the pending-request record's bloom so loop
    /// suppression survives across duplicate deliveries.
    pub fn merge(&mut self, other: &Bloom) {
        for i in 0..BLOOM_BYTES {
            self.bits[i] |= other.bits[i];
        }
    }

    /// Raw bits, for wire encoding.
    pub fn as_bytes(&self) -> &[u8; BLOOM_BYTES] {
        &self.bits
    }

    /// Reconstruct from raw bits received over the wire.
    pub fn from_bytes(bytes: [u8; BLOOM_BYTES]) -> Self {
        Bloom { bits: bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_BYTES;

    fn id(n: u8) -> Id {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        b[1] = n.wrapping_mul(7);
        Id::from_bytes(b)
    }

    #[test]
    fn fresh_filter_contains_nothing() {
        let bloom = Bloom::new();
        assert!(!bloom.contains(&id(1)));
    }

    #[test]
    fn visit_marks_element_present() {
        let mut bloom = Bloom::new();
        assert!(!bloom.visit(&id(5)));
        assert!(bloom.contains(&id(5)));
        assert!(bloom.visit(&id(5)));
    }

    #[test]
    fn merge_is_union() {
        let mut a = Bloom::new();
        let mut b = Bloom::new();
        a.visit(&id(1));
        b.visit(&id(2));
        a.merge(&b);
        assert!(a.contains(&id(1)));
        assert!(a.contains(&id(2)));
    }

    #[test]
    fn distinct_elements_rarely_collide_over_small_sample() {
        let mut bloom = Bloom::new();
        for i in 0..20u8 {
            bloom.visit(&id(i));
        }
        // every inserted element must still test positive
        for i in 0..20u8 {
            assert!(bloom.contains(&id(i)));
        }
    }
}
