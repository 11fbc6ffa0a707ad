//! Kademlia routing table (C3, XOR-distance variant): K-buckets indexed by
//! leading-bit match against the local identity.
//!
//! Bucket membership decisions that require pinging a peer (§4.3 step 4)
//! are split into a synchronous "what should happen" half (this module) and
//! an asynchronous "go do it" half the caller (the router/maintenance loop,
//! which owns the transport) drives by calling back in with the ping
//! outcome. This keeps the table itself `async`-free and trivially testable.

use crate::bloom::Bloom;
use crate::identity::{closer, inverse_distance, Id, PeerId, ID_BITS};
use rand::Rng;
use std::cmp::Ordering;

/// Result of proposing a newly-learned candidate for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// The candidate is the local identity; not a routing-table member.
    IsSelf,
    /// The candidate is already present.
    AlreadyPresent,
    /// There was room; the candidate was inserted directly.
    Inserted,
    /// The target bucket is full. The caller must ping `oldest` and report
    /// back via [`KademliaTable::confirm_oldest_alive`] or
    /// [`KademliaTable::replace_oldest`].
    BucketFull {
        /// Index of the bucket that is full.
        bucket: usize,
        /// The least-recently-seen peer in that bucket, to ping.
        oldest: PeerId,
    },
}

/// K-bucket Kademlia routing table.
pub struct KademliaTable {
    self_id: PeerId,
    /// `buckets[b]` holds peers with exactly `b` leading bits in common
    /// with `self_id`, ordered most-recently-seen last.
    buckets: Vec<Vec<PeerId>>,
    k: usize,
}

impl KademliaTable {
    /// Create an empty table for `self_id` with bucket capacity `k`.
    pub fn new(self_id: PeerId, k: usize) -> Self {
        KademliaTable {
            self_id,
            buckets: vec![Vec::new(); ID_BITS],
            k,
        }
    }

    fn bucket_index(&self, candidate: &PeerId) -> usize {
        self.self_id.leading_match_bits(candidate)
    }

    /// Propose a newly learned peer for admission (§4.3 steps 1-4).
    pub fn learn(&mut self, candidate: PeerId) -> LearnOutcome {
        if candidate == self.self_id {
            return LearnOutcome::IsSelf;
        }
        let b = self.bucket_index(&candidate);
        if b >= self.buckets.len() {
            // leading_match_bits == ID_BITS only for self, already handled.
            return LearnOutcome::IsSelf;
        }
        let bucket = &mut self.buckets[b];
        if bucket.contains(&candidate) {
            return LearnOutcome::AlreadyPresent;
        }
        if bucket.len() < self.k {
            bucket.push(candidate);
            LearnOutcome::Inserted
        } else {
            LearnOutcome::BucketFull {
                bucket: b,
                oldest: bucket[0],
            }
        }
    }

    /// The oldest entry in `bucket` answered a ping: discard the candidate,
    /// and move the oldest to most-recently-seen.
    pub fn confirm_oldest_alive(&mut self, bucket: usize) {
        if let Some(b) = self.buckets.get_mut(bucket) {
            if !b.is_empty() {
                let oldest = b.remove(0);
                b.push(oldest);
            }
        }
    }

    /// The oldest entry in `bucket` did not answer: replace it with
    /// `candidate`.
    pub fn replace_oldest(&mut self, bucket: usize, candidate: PeerId) {
        if let Some(b) = self.buckets.get_mut(bucket) {
            if !b.is_empty() {
                b.remove(0);
            }
            b.push(candidate);
        }
    }

    /// Mark `peer` as freshly seen: move it to the most-recently-seen end
    /// of its bucket, if present.
    pub fn touch(&mut self, peer: &PeerId) {
        let b = self.bucket_index(peer);
        if let Some(bucket) = self.buckets.get_mut(b) {
            if let Some(pos) = bucket.iter().position(|p| p == peer) {
                let p = bucket.remove(pos);
                bucket.push(p);
            }
        }
    }

    /// Remove `peer` entirely (disconnect cascade).
    pub fn remove(&mut self, peer: &PeerId) {
        let b = self.bucket_index(peer);
        if let Some(bucket) = self.buckets.get_mut(b) {
            bucket.retain(|p| p != peer);
        }
    }

    /// All known peers, across every bucket.
    pub fn all_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.buckets.iter().flatten()
    }

    /// Count of all known peers.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// `true` iff no peers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `find_closest(key)` (§4.3): the known peer with minimum XOR distance
    /// to `key`, scanning buckets from high-match to low-match so ties
    /// favor the first encountered.
    pub fn find_closest(&self, key: &Id) -> Option<PeerId> {
        let mut best: Option<PeerId> = None;
        for bucket in self.buckets.iter().rev() {
            for &peer in bucket {
                best = Some(match best {
                    None => peer,
                    Some(b) => *closer(key, &peer, &b),
                });
            }
        }
        best
    }

    /// `am_i_closest(key, bloom)` (§4.5): true iff no known peer not in
    /// `bloom` has strictly smaller XOR distance to `key` than `self_id`.
    pub fn am_i_closest(&self, key: &Id, bloom: &Bloom) -> bool {
        let self_distance = self.self_id.xor_distance(key);
        self.all_peers()
            .filter(|p| !bloom.contains(p))
            .all(|p| p.xor_distance(key).as_bytes() >= self_distance.as_bytes())
    }

    /// `select_for_route(key, bloom, hops)` (§4.3): candidates are every
    /// known peer not marked in `bloom`. If `closer_only` is true, returns
    /// the nearest peer strictly closer than `self_id` (or `None` if there
    /// is none); otherwise samples weighted by `inverse_distance` so near
    /// peers dominate while preserving diversity.
    pub fn select_for_route(
        &self,
        key: &Id,
        bloom: &Bloom,
        closer_only: bool,
        rng: &mut impl Rng,
    ) -> Option<PeerId> {
        let candidates: Vec<PeerId> = self
            .all_peers()
            .filter(|p| !bloom.contains(p))
            .copied()
            .collect();
        if candidates.is_empty() {
            return None;
        }
        if closer_only {
            let self_distance = self.self_id.xor_distance(key);
            candidates
                .into_iter()
                .filter(|p| p.xor_distance(key).as_bytes() < self_distance.as_bytes())
                .min_by(|a, b| match a.xor_closer(key, b) {
                    Ordering::Equal => Ordering::Equal,
                    other => other,
                })
        } else {
            weighted_choice(&candidates, key, rng)
        }
    }
}

/// Weighted random selection per spec.md §9: total weight is the sum of
/// `inverse_distance` over candidates, draw `r` in `[0, total)`, walk
/// subtracting weights until the remainder goes negative.
fn weighted_choice(candidates: &[PeerId], target: &Id, rng: &mut impl Rng) -> Option<PeerId> {
    if candidates.is_empty() {
        return None;
    }
    let weights: Vec<u128> = candidates
        .iter()
        .map(|c| inverse_distance(c.leading_match_bits(target)))
        .collect();
    let total: u128 = weights.iter().fold(0u128, |acc, w| acc.saturating_add(*w));
    if total == 0 {
        return candidates.first().copied();
    }
    let mut r = rng.gen_range(0..total);
    for (candidate, weight) in candidates.iter().zip(weights.iter()) {
        if r < *weight {
            return Some(*candidate);
        }
        r -= weight;
    }
    candidates.last().copied()
}
