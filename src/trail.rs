//! Trail store (C4, finger-table variant only): per-peer rows that make up
//! the distributed representation of a labeled multi-hop path. Per
//! spec.md §9, a trail is never modeled as an owned linked list — only
//! these local rows exist, addressed by `trail_id`.

use crate::identity::{Id, PeerId};
use std::collections::HashMap;

/// Which endpoint originated the trail; lets TEARDOWN and result messages
/// flow in either direction along the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Flowing from the trail's source toward its destination.
    SrcToDest,
    /// Flowing from the trail's destination back toward its source.
    DestToSrc,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::SrcToDest => Direction::DestToSrc,
            Direction::DestToSrc => Direction::SrcToDest,
        }
    }
}

/// One intermediate peer's row for a trail.
#[derive(Debug, Clone, Copy)]
pub struct TrailRow {
    /// Friend messages in the SRC->DEST direction arrive from.
    pub prev_hop: PeerId,
    /// Friend messages in the SRC->DEST direction are forwarded to.
    pub next_hop: PeerId,
    /// Which endpoint is this trail's source.
    pub direction: Direction,
}

impl TrailRow {
    /// The friend to forward to, given the direction a message is
    /// currently traveling.
    pub fn next_for(&self, traveling: Direction) -> PeerId {
        match traveling {
            Direction::SrcToDest => self.next_hop,
            Direction::DestToSrc => self.prev_hop,
        }
    }
}

/// Per-peer store of trail rows, keyed by `trail_id`.
#[derive(Default)]
pub struct TrailStore {
    rows: HashMap<Id, TrailRow>,
}

impl TrailStore {
    /// An empty store.
    pub fn new() -> Self {
        TrailStore {
            rows: HashMap::new(),
        }
    }

    /// Install a row for `trail_id`, overwriting any previous row (setup
    /// races are expected per spec.md §9).
    pub fn install(&mut self, trail_id: Id, row: TrailRow) {
        self.rows.insert(trail_id, row);
    }

    /// Look up the row for `trail_id`.
    pub fn get(&self, trail_id: &Id) -> Option<&TrailRow> {
        self.rows.get(trail_id)
    }

    /// Remove the row for `trail_id` (explicit TRAIL_TEARDOWN). Returns the
    /// removed row, if any, so the caller can forward the teardown onward.
    pub fn remove(&mut self, trail_id: &Id) -> Option<TrailRow> {
        self.rows.remove(trail_id)
    }

    /// `true` iff a row exists for `trail_id`.
    pub fn contains(&self, trail_id: &Id) -> bool {
        self.rows.contains_key(trail_id)
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` iff no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Disconnect cascade (§4.6): drop every row whose `prev_hop` or
    /// `next_hop` is the disconnected friend, returning the dropped trail
    /// ids. The spec notes sending TEARDOWN in the *opposite* direction is
    /// unnecessary since the peer on the other side observes the same
    /// disconnect event independently.
    pub fn purge_friend(&mut self, friend: &PeerId) -> Vec<Id> {
        let dropped: Vec<Id> = self
            .rows
            .iter()
            .filter(|(_, row)| row.prev_hop == *friend || row.next_hop == *friend)
            .map(|(id, _)| *id)
            .collect();
        for id in &dropped {
            self.rows.remove(id);
        }
        dropped
    }

    /// All rows referencing `friend` as either hop, without removing them
    /// (used to validate the universal invariant "prev/next are current
    /// friends").
    pub fn rows_through(&self, friend: &PeerId) -> impl Iterator<Item = (&Id, &TrailRow)> {
        self.rows
            .iter()
            .filter(move |(_, row)| row.prev_hop == *friend || row.next_hop == *friend)
    }
}
