//! Friend table (C2): the directly-connected one-hop neighbors delivered by
//! the transport collaborator. Congestion, per-friend queueing, and the
//! disconnect cascade into C3/C4 all key off this table.

use crate::identity::PeerId;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A directly-connected peer.
pub struct Friend {
    id: PeerId,
    outbound: VecDeque<Vec<u8>>,
    max_queued: usize,
    /// Count of trails for which this friend is the first hop
    /// (§3 `trails_through`; checked against `THROUGH_THRESHOLD`).
    trails_through: u32,
    through_threshold: u32,
    congested_until: Option<Instant>,
}

impl Friend {
    fn new(id: PeerId, max_queued: usize, through_threshold: u32) -> Self {
        Friend {
            id,
            outbound: VecDeque::new(),
            max_queued,
            trails_through: 0,
            through_threshold,
            congested_until: None,
        }
    }

    /// Current outbound backlog length.
    pub fn queue_len(&self) -> usize {
        self.outbound.len()
    }

    /// Current count of trails routed through this friend as first hop.
    pub fn trails_through(&self) -> u32 {
        self.trails_through
    }

    /// `true` iff this friend is congested per §3: queue full, through
    /// threshold exceeded, or still within an explicit congestion window.
    pub fn is_congested(&self, now: Instant) -> bool {
        self.outbound.len() >= self.max_queued
            || self.trails_through >= self.through_threshold
            || self.congested_until.map(|t| now < t).unwrap_or(false)
    }

    /// Mark this friend congested for `duration` from `now` (e.g. after a
    /// TRAIL_SETUP_REJECTION response).
    pub fn mark_congested(&mut self, now: Instant, duration: Duration) {
        let until = now + duration;
        self.congested_until = Some(match self.congested_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Enqueue a framed outbound message. Returns `false` (and drops the
    /// message) if the backlog is already at capacity; callers that must
    /// not silently lose a message should check [`Friend::queue_len`]
    /// first, per §4.2.
    pub fn enqueue(&mut self, frame: Vec<u8>) -> bool {
        if self.outbound.len() >= self.max_queued {
            warn!(peer = %self.id, "dropping outbound frame: queue full");
            return false;
        }
        self.outbound.push_back(frame);
        true
    }

    /// Pop the next frame to actually hand to the transport.
    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    fn inc_trails_through(&mut self) {
        self.trails_through = self.trails_through.saturating_add(1);
    }

    fn dec_trails_through(&mut self) {
        self.trails_through = self.trails_through.saturating_sub(1);
    }
}

/// The set of directly-connected peers.
pub struct FriendTable {
    friends: HashMap<PeerId, Friend>,
    max_queued: usize,
    through_threshold: u32,
}

impl FriendTable {
    /// Create an empty table with the given per-friend caps.
    pub fn new(max_queued: usize, through_threshold: u32) -> Self {
        FriendTable {
            friends: HashMap::new(),
            max_queued,
            through_threshold,
        }
    }

    /// Transport reported a new connection. Returns `true` if this is the
    /// very first friend (callers use this to kick off maintenance).
    pub fn on_connect(&mut self, peer: PeerId) -> bool {
        let was_empty = self.friends.is_empty();
        self.friends
            .entry(peer)
            .or_insert_with(|| Friend::new(peer, self.max_queued, self.through_threshold));
        debug!(peer = %peer, "friend connected");
        was_empty
    }

    /// Transport reported a disconnection. Returns the removed friend so
    /// the caller can cascade into routing-table/trail cleanup.
    pub fn on_disconnect(&mut self, peer: &PeerId) -> Option<Friend> {
        let removed = self.friends.remove(peer);
        if removed.is_some() {
            debug!(peer = %peer, "friend disconnected");
        }
        removed
    }

    /// Look up a friend.
    pub fn get(&self, peer: &PeerId) -> Option<&Friend> {
        self.friends.get(peer)
    }

    /// Look up a friend mutably (to enqueue/dequeue, adjust trail counts).
    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut Friend> {
        self.friends.get_mut(peer)
    }

    /// `true` iff `peer` is a current friend.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.friends.contains_key(peer)
    }

    /// Number of current friends.
    pub fn len(&self) -> usize {
        self.friends.len()
    }

    /// `true` iff there are no current friends.
    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    /// Iterate current friend ids.
    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.friends.keys()
    }

    /// Uniform sample among friends whose [`Friend::is_congested`] is
    /// false; `None` if none qualify.
    pub fn select_random_uncongested(&self, now: Instant) -> Option<PeerId> {
        self.friends
            .values()
            .filter(|f| !f.is_congested(now))
            .choose(&mut rand::thread_rng())
            .map(|f| f.id)
    }

    /// `is_congested` lookup by id; unknown peers are treated as congested
    /// (there is no route through a friend we don't have).
    pub fn is_congested(&self, peer: &PeerId, now: Instant) -> bool {
        self.friends
            .get(peer)
            .map(|f| f.is_congested(now))
            .unwrap_or(true)
    }

    /// Increment `trails_through` for `peer`, if it is a current friend.
    pub fn inc_trails_through(&mut self, peer: &PeerId) {
        if let Some(f) = self.friends.get_mut(peer) {
            f.inc_trails_through();
        }
    }

    /// Decrement `trails_through` for `peer`, if it is a current friend.
    pub fn dec_trails_through(&mut self, peer: &PeerId) {
        if let Some(f) = self.friends.get_mut(peer) {
            f.dec_trails_through();
        }
    }

    /// Enqueue a frame to `peer`; `false` if `peer` is not a friend or the
    /// queue was full.
    pub fn send(&mut self, peer: &PeerId, frame: Vec<u8>) -> bool {
        match self.friends.get_mut(peer) {
            Some(f) => f.enqueue(frame),
            None => false,
        }
    }

    /// Sum of `trails_through` across all friends, for the universal
    /// invariant in spec.md §8 (`sum(trails_through_first_hop) <=
    /// sum(friends.trails_through)`).
    pub fn total_trails_through(&self) -> u64 {
        self.friends.values().map(|f| f.trails_through() as u64).sum()
    }
}
