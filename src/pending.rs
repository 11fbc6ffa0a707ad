//! Pending/recent-request cache (§3, §4.5): tracks in-flight PUT/GET
//! requests so a duplicate arrival can be loop-suppressed and a result can
//! be delivered to its originator exactly once. Bounded by `MAX_RECENT`
//! with oldest-by-arrival eviction, built on the `lru` crate the teacher
//! already depends on.

use crate::bloom::Bloom;
use crate::identity::{Id, PeerId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// A locally-issued client request id, opaque to the wire protocol.
pub type RequestId = u64;

/// Who should receive the eventual result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    /// A local client request, identified by the id returned from
    /// `client_get`.
    Client(RequestId),
    /// A relayed request from another peer, to reply to along the path
    /// rather than out the client sink.
    Peer(PeerId),
}

/// One in-flight request record.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Who to deliver the eventual result to.
    pub originator: Originator,
    /// Peers already visited by this request (or duplicates of it).
    pub visited: Bloom,
    /// Hops traveled so far when this record was created.
    pub hop_count: u32,
    /// When this record was created.
    pub arrival_time: Instant,
    /// How long this request remains valid.
    pub ttl: Duration,
}

impl PendingRequest {
    /// `true` iff `ttl` has elapsed since `arrival_time`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.arrival_time) >= self.ttl
    }
}

/// `(key, request_id)` keyed store of in-flight requests, capped at
/// `MAX_RECENT` with LRU-by-arrival eviction.
pub struct PendingRequestStore {
    entries: LruCache<(Id, RequestId), PendingRequest>,
}

impl PendingRequestStore {
    /// Create a store capped at `max_recent` entries.
    pub fn new(max_recent: usize) -> Self {
        let cap = NonZeroUsize::new(max_recent.max(1)).unwrap();
        PendingRequestStore {
            entries: LruCache::new(cap),
        }
    }

    /// Register a freshly-seen request. If `(key, request_id)` already has
    /// a record, the new visited-bloom is OR'd into the existing one (the
    /// duplicate-arrival loop-suppression rule in §4.5) and the existing
    /// record is returned mutated; otherwise a new record is inserted,
    /// possibly evicting the least-recently-arrived entry.
    pub fn observe(
        &mut self,
        key: Id,
        request_id: RequestId,
        originator: Originator,
        visited: Bloom,
        hop_count: u32,
        ttl: Duration,
        now: Instant,
    ) -> &PendingRequest {
        if let Some(existing) = self.entries.get_mut(&(key, request_id)) {
            existing.visited.merge(&visited);
            return self.entries.peek(&(key, request_id)).unwrap();
        }
        self.entries.put(
            (key, request_id),
            PendingRequest {
                originator,
                visited,
                hop_count,
                arrival_time: now,
                ttl,
            },
        );
        self.entries.peek(&(key, request_id)).unwrap()
    }

    /// Look up a record without affecting recency.
    pub fn peek(&self, key: &Id, request_id: RequestId) -> Option<&PendingRequest> {
        self.entries.peek(&(*key, request_id))
    }

    /// Remove a record (e.g. once its result has been delivered).
    pub fn remove(&mut self, key: &Id, request_id: RequestId) -> Option<PendingRequest> {
        self.entries.pop(&(*key, request_id))
    }

    /// Number of in-flight records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` iff there are no in-flight records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_BYTES;

    fn id(n: u8) -> Id {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        Id::from_bytes(b)
    }

    #[test]
    fn observe_inserts_new_record() {
        let mut store = PendingRequestStore::new(4);
        store.observe(
            id(1),
            1,
            Originator::Client(1),
            Bloom::new(),
            0,
            Duration::from_secs(10),
            Instant::now(),
        );
        assert_eq!(store.len(), 1);
        assert!(store.peek(&id(1), 1).is_some());
    }

    #[test]
    fn duplicate_arrival_merges_bloom_without_new_entry() {
        let mut store = PendingRequestStore::new(4);
        let now = Instant::now();
        let mut first_bloom = Bloom::new();
        first_bloom.visit(&id(9));
        store.observe(
            id(1),
            1,
            Originator::Client(1),
            first_bloom,
            0,
            Duration::from_secs(10),
            now,
        );
        let mut second_bloom = Bloom::new();
        second_bloom.visit(&id(8));
        store.observe(
            id(1),
            1,
            Originator::Client(1),
            second_bloom,
            0,
            Duration::from_secs(10),
            now,
        );
        assert_eq!(store.len(), 1);
        let record = store.peek(&id(1), 1).unwrap();
        assert!(record.visited.contains(&id(9)));
        assert!(record.visited.contains(&id(8)));
    }

    #[test]
    fn eviction_drops_least_recently_arrived_when_full() {
        let mut store = PendingRequestStore::new(2);
        let now = Instant::now();
        store.observe(id(1), 1, Originator::Client(1), Bloom::new(), 0, Duration::from_secs(1), now);
        store.observe(id(2), 1, Originator::Client(2), Bloom::new(), 0, Duration::from_secs(1), now);
        store.observe(id(3), 1, Originator::Client(3), Bloom::new(), 0, Duration::from_secs(1), now);
        assert_eq!(store.len(), 2);
        assert!(store.peek(&id(1), 1).is_none());
        assert!(store.peek(&id(3), 1).is_some());
    }

    #[test]
    fn is_expired_respects_ttl() {
        let now = Instant::now();
        let record = PendingRequest {
            originator: Originator::Client(1),
            visited: Bloom::new(),
            hop_count: 0,
            arrival_time: now,
            ttl: Duration::from_secs(1),
        };
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::from_secs(2)));
    }
}
