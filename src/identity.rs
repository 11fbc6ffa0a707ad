//! Fixed-width identifiers and the pure hash-arithmetic operations (C1) that
//! every other component builds on: XOR distance, leading-bit match, and the
//! two closeness relations used by the Kademlia and finger-table variants.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Bit width of peer identifiers and keys, matching the source's 512-bit
/// `GNUNET_HashCode`.
pub const ID_BITS: usize = 512;
/// Byte width derived from [`ID_BITS`].
pub const ID_BYTES: usize = ID_BITS / 8;

/// A fixed-width, opaque network identifier. Used both for peer identities
/// and for storage keys; the two are interchangeable at the bit-arithmetic
/// level (a key is just an identifier nothing claims to be reachable).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(pub [u8; ID_BYTES]);

/// Storage key alias; distinct name for readability at call sites, same
/// representation as [`Id`].
pub type Key = Id;
/// Peer identifier alias.
pub type PeerId = Id;

impl Id {
    /// All-zero identifier, used in tests and as a neutral default.
    pub const ZERO: Id = Id([0u8; ID_BYTES]);

    /// Build an identifier from raw bytes.
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Id(bytes)
    }

    /// Derive an identifier deterministically from arbitrary input, for
    /// tests and for hashing content keys from caller-supplied bytes.
    pub fn hash_of(data: &[u8]) -> Self {
        let mut out = [0u8; ID_BYTES];
        let mut offset = 0;
        let mut counter: u32 = 0;
        while offset < ID_BYTES {
            let mut hasher = blake3::Hasher::new();
            hasher.update(data);
            hasher.update(&counter.to_be_bytes());
            let digest = hasher.finalize();
            let chunk = digest.as_bytes();
            let take = chunk.len().min(ID_BYTES - offset);
            out[offset..offset + take].copy_from_slice(&chunk[..take]);
            offset += take;
            counter += 1;
        }
        Id(out)
    }

    /// Raw bytes, most significant first.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Bit-wise XOR distance between two identifiers (Kademlia metric).
    pub fn xor_distance(&self, other: &Id) -> Id {
        let mut out = [0u8; ID_BYTES];
        for i in 0..ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Id(out)
    }

    /// Number of leading bits `self` and `other` share, in `0..=ID_BITS`.
    /// `ID_BITS` means the two identifiers are equal.
    pub fn leading_match_bits(&self, other: &Id) -> usize {
        for byte_index in 0..ID_BYTES {
            let diff = self.0[byte_index] ^ other.0[byte_index];
            if diff != 0 {
                return byte_index * 8 + diff.leading_zeros() as usize;
            }
        }
        ID_BITS
    }

    /// `true` if `self` is strictly closer to `target` than `other` under
    /// XOR distance.
    pub fn xor_closer(&self, target: &Id, other: &Id) -> Ordering {
        let d_self = self.xor_distance(target);
        let d_other = other.xor_distance(target);
        d_self.0.cmp(&d_other.0)
    }

    /// Cyclic "precedes" comparison used by the finger-table variant:
    /// `self` precedes `other` relative to `origin` iff walking clockwise
    /// from `origin` reaches `self` before `other`. Implemented as
    /// unsigned-wrapping distance from `origin`.
    pub fn cyclic_distance_from(&self, origin: &Id) -> Id {
        // distance(origin -> self) = self - origin, computed as a 512-bit
        // big-endian subtraction with wraparound.
        sub_wrapping(&self.0, &origin.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", hex_prefix(&self.0))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

fn hex_prefix(bytes: &[u8; ID_BYTES]) -> String {
    bytes[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn sub_wrapping(a: &[u8; ID_BYTES], b: &[u8; ID_BYTES]) -> [u8; ID_BYTES] {
    let mut out = [0u8; ID_BYTES];
    let mut borrow: i16 = 0;
    for i in (0..ID_BYTES).rev() {
        let mut diff = a[i] as i16 - b[i] as i16 - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

/// `closer(target, a, b)`: the peer with strictly smaller XOR distance to
/// `target`; ties favor `a`.
pub fn closer<'a>(target: &Id, a: &'a Id, b: &'a Id) -> &'a Id {
    match a.xor_closer(target, b) {
        Ordering::Greater => b,
        _ => a,
    }
}

/// `closer_predecessor(target, a, b)`: the peer whose cyclic distance
/// walking backward from `target` (i.e. `target`'s distance from the
/// candidate, `target.cyclic_distance_from(candidate)`) is smaller, so
/// that the result is the one that more closely precedes `target` in
/// identifier space. Ties favor `a`.
pub fn closer_predecessor<'a>(target: &Id, a: &'a Id, b: &'a Id) -> &'a Id {
    let d_a = target.cyclic_distance_from(a);
    let d_b = target.cyclic_distance_from(b);
    if d_b.0 < d_a.0 {
        b
    } else {
        a
    }
}

/// `inverse_distance(bit_index)`: `2^bit_index`, saturating at `u128::MAX`
/// rather than overflowing, so near peers dominate weighted random
/// selection without panicking for `bit_index` close to [`ID_BITS`].
pub fn inverse_distance(bit_index: usize) -> u128 {
    if bit_index >= 127 {
        u128::MAX
    } else {
        1u128 << bit_index
    }
}
