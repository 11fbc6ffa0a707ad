//! Unifies the Kademlia bucket table and the X-Vine finger table behind one
//! `RoutingTable` trait so the request router (C5) and maintenance (C6) are
//! written once against a common "what do I know, who's my best next hop"
//! surface, specialized per variant only where spec.md §4 calls for
//! genuinely different behavior.

use crate::bloom::Bloom;
use crate::bucket::KademliaTable;
use crate::config::{CloserOnlyPolicy, DhtConfig};
use crate::finger::FingerTable;
use crate::identity::{Id, PeerId};
use rand::Rng;

/// `closer_only_policy(hops)` (§4.3): probability of restricting to a
/// strictly-closer-than-self peer, as a function of hop count.
pub fn should_use_closer_only(
    hops: u32,
    max_hops: u32,
    policy: CloserOnlyPolicy,
    rng: &mut impl Rng,
) -> bool {
    if max_hops == 0 {
        return true;
    }
    let threshold = match policy {
        CloserOnlyPolicy::Linear => hops as f64 / max_hops as f64,
        CloserOnlyPolicy::Sqrt => (hops as f64).sqrt() / (max_hops as f64).sqrt(),
    };
    rng.gen::<f64>() < threshold.clamp(0.0, 1.0)
}

/// Abstracts over the two routing-table variants for the pieces the router
/// and maintenance loop need in common.
pub enum RoutingTable {
    /// XOR-distance K-buckets.
    Kademlia(KademliaTable),
    /// X-Vine finger table (trail bookkeeping lives alongside it in
    /// `finger.rs`/`trail.rs`; the router consults both).
    FingerTable(FingerTable),
}

impl RoutingTable {
    /// Build the variant named in `config`.
    pub fn new(self_id: PeerId, config: &DhtConfig) -> Self {
        match config.variant {
            crate::config::RoutingVariant::Kademlia => {
                RoutingTable::Kademlia(KademliaTable::new(self_id, config.bucket_size))
            }
            crate::config::RoutingVariant::FingerTable => RoutingTable::FingerTable(
                FingerTable::new(self_id, config.finger_count, config.max_trails_per_finger),
            ),
        }
    }

    /// `am_i_closest(key, bloom)` (§4.5). For the finger variant, "closest"
    /// means no unvisited known finger/predecessor is a better predecessor
    /// of `key` than the local peer along the ring.
    pub fn am_i_closest(&self, self_id: &PeerId, key: &Id, bloom: &Bloom) -> bool {
        match self {
            RoutingTable::Kademlia(table) => table.am_i_closest(key, bloom),
            RoutingTable::FingerTable(table) => table
                .present_fingers()
                .filter(|f| !bloom.contains(&f.identity))
                .all(|f| {
                    crate::identity::closer_predecessor(key, self_id, &f.identity) == self_id
                }),
        }
    }

    /// Best locally-known next hop toward `key`, excluding anything in
    /// `bloom`, per the variant's own selection rule (§4.3/§4.4).
    pub fn find_closest(&self, key: &Id) -> Option<PeerId> {
        match self {
            RoutingTable::Kademlia(table) => table.find_closest(key),
            RoutingTable::FingerTable(table) => table.successor().map(|f| f.identity),
        }
    }

    /// Number of distinct known peers (Kademlia) or present fingers
    /// (finger variant), used by the forward-count formula's
    /// known-peer-count term.
    pub fn known_peer_count(&self) -> usize {
        match self {
            RoutingTable::Kademlia(table) => table.len(),
            RoutingTable::FingerTable(table) => table.present_fingers().count(),
        }
    }

    /// `estimate_diameter` (§9, grounded on the source's
    /// `MAX_BUCKETS - lowest_bucket`): for Kademlia, `ID_BITS` minus the
    /// smallest leading-bit match among known peers, i.e. the index of the
    /// lowest occupied bucket. For the finger variant, the ceiling of
    /// `log2(finger_count)`, the classic bound on ring hops.
    pub fn estimate_diameter(&self, self_id: &PeerId) -> u32 {
        match self {
            RoutingTable::Kademlia(table) => {
                let lowest = table.all_peers().map(|p| self_id.leading_match_bits(p)).min();
                match lowest {
                    Some(l) => (crate::identity::ID_BITS - l) as u32,
                    None => crate::identity::ID_BITS as u32,
                }
            }
            RoutingTable::FingerTable(table) => {
                let n = (table.finger_count().max(1)) as u32;
                32 - n.leading_zeros()
            }
        }
    }
}
