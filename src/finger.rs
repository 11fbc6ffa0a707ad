//! Finger table (C3, X-Vine variant): slots at power-of-two identifier
//! offsets, each carrying up to `MAX_TRAILS_PER_FINGER` labeled paths, plus
//! a dedicated predecessor slot. Trail *rows* for peers this local peer is
//! an intermediate hop for live in [`crate::trail::TrailStore`]; the
//! records here are the finger owner's own bookkeeping for where to send
//! traffic addressed to that finger.

use crate::identity::{closer, closer_predecessor, Id, PeerId};

/// Which slot an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerSlot {
    /// Slot `i`, covering `my_id + 2^i`.
    Index(usize),
    /// The dedicated predecessor slot, covering `my_id - 1`.
    Predecessor,
}

/// One labeled path the finger owner can use to reach a finger.
#[derive(Debug, Clone)]
pub struct FingerTrail {
    /// Trail identifier, addressed in every message that travels this path.
    pub trail_id: Id,
    /// Intermediate hops, first hop first. Empty iff the finger is itself a
    /// friend (zero-length trail).
    pub hops: Vec<PeerId>,
    /// `hops.len()` as `u32`, kept alongside for cheap comparisons.
    pub length: u32,
    /// Whether this trail is still believed live.
    pub present: bool,
}

impl FingerTrail {
    fn new(trail_id: Id, hops: Vec<PeerId>) -> Self {
        let length = hops.len() as u32;
        FingerTrail {
            trail_id,
            hops,
            length,
            present: true,
        }
    }

    /// The friend this trail is first routed through, or `None` for a
    /// zero-length (direct friend) trail.
    pub fn first_hop(&self) -> Option<PeerId> {
        self.hops.first().copied()
    }
}

/// A peer reachable at a finger slot, with every currently-known path to it.
#[derive(Debug, Clone)]
pub struct Finger {
    /// The peer believed closest to the slot's target value.
    pub identity: PeerId,
    /// Known paths to `identity`, subject to `MAX_TRAILS_PER_FINGER`.
    pub trails: Vec<FingerTrail>,
}

impl Finger {
    fn identity_only(identity: PeerId) -> Self {
        Finger {
            identity,
            trails: Vec::new(),
        }
    }

    /// Choose the trail to forward along: the one whose first hop is not
    /// congested and whose length is minimum (§4.4 "Trail selection").
    /// `is_congested` is supplied by the caller since congestion state
    /// lives in the friend table, not here.
    pub fn select_trail(&self, is_congested: impl Fn(&PeerId) -> bool) -> Option<&FingerTrail> {
        self.trails
            .iter()
            .filter(|t| t.present)
            .filter(|t| match t.first_hop() {
                Some(hop) => !is_congested(&hop),
                None => !is_congested(&self.identity),
            })
            .min_by_key(|t| t.length)
    }
}

/// Outcome of [`FingerTable::add_new_finger`]: tells the caller what
/// side effects (friend-table counters, trail teardowns) to apply, since
/// those tables are owned elsewhere.
#[derive(Debug, Clone)]
pub enum AddFingerOutcome {
    /// `identity == self`; only the identity is recorded.
    SelfOnly,
    /// Installed without needing to evict an existing trail. Carries the
    /// first hop whose `trails_through` counter should be incremented, if
    /// the new trail has one.
    Installed { first_hop: Option<PeerId> },
    /// The finger was already at `MAX_TRAILS_PER_FINGER`; the longest
    /// trail among existing+new was evicted. If the *new* trail survived,
    /// `first_hop` names the hop to increment; `evicted` is the trail the
    /// caller must tear down (if it was one of the existing ones).
    Replaced {
        first_hop: Option<PeerId>,
        evicted: Option<FingerTrail>,
    },
}

/// Outcome of replacing the predecessor or successor (finger 0).
#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    /// The previous finger, if any, whose trails must all be torn down.
    pub evicted: Option<Finger>,
}

/// The local finger table: `finger_count` indexed slots plus a predecessor.
pub struct FingerTable {
    my_id: PeerId,
    slots: Vec<Option<Finger>>,
    predecessor: Option<Finger>,
    max_trails_per_finger: usize,
}

impl FingerTable {
    /// Create an empty table with `finger_count` slots (`N`).
    pub fn new(my_id: PeerId, finger_count: usize, max_trails_per_finger: usize) -> Self {
        FingerTable {
            my_id,
            slots: vec![None; finger_count],
            predecessor: None,
            max_trails_per_finger,
        }
    }

    /// The local identity this table is built around.
    pub fn my_id(&self) -> PeerId {
        self.my_id
    }

    /// Number of index slots (`N`).
    pub fn finger_count(&self) -> usize {
        self.slots.len()
    }

    /// `compute_finger_value`: the 64-bit target for slot `i`, computed as
    /// the local identity's leading 8 bytes plus `2^i`.
    pub fn compute_finger_value(&self, index: usize) -> u64 {
        local_prefix(&self.my_id).wrapping_add(1u64 << index)
    }

    /// The 64-bit target for the predecessor slot: local identity minus 1.
    pub fn predecessor_value(&self) -> u64 {
        local_prefix(&self.my_id).wrapping_sub(1)
    }

    /// `finger_table_index(value)`: recovers the index that produced
    /// `value` via [`FingerTable::compute_finger_value`], if any.
    pub fn finger_table_index(&self, value: u64) -> Option<usize> {
        let diff = value.wrapping_sub(local_prefix(&self.my_id));
        if diff == 0 || !diff.is_power_of_two() {
            return None;
        }
        let index = diff.trailing_zeros() as usize;
        if index < self.slots.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Read a slot.
    pub fn get(&self, slot: FingerSlot) -> Option<&Finger> {
        match slot {
            FingerSlot::Index(i) => self.slots.get(i).and_then(|f| f.as_ref()),
            FingerSlot::Predecessor => self.predecessor.as_ref(),
        }
    }

    /// The current successor (finger 0), if any.
    pub fn successor(&self) -> Option<&Finger> {
        self.slots.first().and_then(|f| f.as_ref())
    }

    /// `Add_new_finger` (§4.4). `slot` must already have been decided by
    /// the caller (typically via [`FingerTable::finger_table_index`]).
    pub fn add_new_finger(
        &mut self,
        slot: FingerSlot,
        identity: PeerId,
        trail_id: Id,
        hops: Vec<PeerId>,
    ) -> AddFingerOutcome {
        if identity == self.my_id {
            self.set_slot(slot, Some(Finger::identity_only(identity)));
            return AddFingerOutcome::SelfOnly;
        }
        let new_trail = FingerTrail::new(trail_id, hops);
        let entry = self.slot_mut(slot);
        match entry {
            None => {
                let first_hop = new_trail.first_hop();
                *entry = Some(Finger {
                    identity,
                    trails: vec![new_trail],
                });
                AddFingerOutcome::Installed { first_hop }
            }
            Some(finger) if finger.identity == identity => {
                if finger.trails.len() < self.max_trails_per_finger {
                    let first_hop = new_trail.first_hop();
                    finger.trails.push(new_trail);
                    AddFingerOutcome::Installed { first_hop }
                } else {
                    let (kept_new, evicted) = select_and_replace_trail(
                        std::mem::take(&mut finger.trails),
                        new_trail,
                    );
                    finger.trails = kept_new.0;
                    AddFingerOutcome::Replaced {
                        first_hop: kept_new.1,
                        evicted,
                    }
                }
            }
            Some(finger) => {
                // A different identity now claims this slot: treat as a
                // fresh install, discarding the previous finger entirely.
                let old = std::mem::replace(
                    finger,
                    Finger {
                        identity,
                        trails: vec![new_trail.clone()],
                    },
                );
                AddFingerOutcome::Replaced {
                    first_hop: new_trail.first_hop(),
                    evicted: old.trails.into_iter().max_by_key(|t| t.length),
                }
            }
        }
    }

    /// `Compare_and_update_predecessor` (§4.4).
    pub fn compare_and_update_predecessor(
        &mut self,
        candidate: PeerId,
        trail_id: Id,
        hops: Vec<PeerId>,
    ) -> ReplaceOutcome {
        let target = predecessor_target(&self.my_id);
        let should_replace = match &self.predecessor {
            None => true,
            Some(current) => {
                *closer_predecessor(&target, &candidate, &current.identity) == candidate
                    && candidate != current.identity
            }
        };
        if !should_replace {
            return ReplaceOutcome { evicted: None };
        }
        let new_finger = Finger {
            identity: candidate,
            trails: vec![FingerTrail::new(trail_id, hops)],
        };
        let evicted = self.predecessor.replace(new_finger);
        ReplaceOutcome { evicted }
    }

    /// `Compare_and_update_successor` (§4.4): identical closeness rule as
    /// the predecessor case but using ordinary XOR/forward closeness and
    /// targeting finger slot 0. The caller is responsible for generating a
    /// fresh trail id and emitting NOTIFY_NEW_SUCCESSOR on replacement, per
    /// spec; this method only decides whether to replace.
    pub fn compare_and_update_successor(
        &mut self,
        probable: PeerId,
        trail_id: Id,
        hops: Vec<PeerId>,
    ) -> ReplaceOutcome {
        let target = successor_target(&self.my_id);
        let should_replace = match self.successor() {
            None => true,
            Some(current) => {
                *closer(&target, &probable, &current.identity) == probable
                    && probable != current.identity
            }
        };
        if !should_replace {
            return ReplaceOutcome { evicted: None };
        }
        let new_finger = Finger {
            identity: probable,
            trails: vec![FingerTrail::new(trail_id, hops)],
        };
        let evicted = self.slots[0].replace(new_finger);
        ReplaceOutcome { evicted }
    }

    /// Disconnect cascade (§4.6): for every finger, if the disconnected
    /// peer *is* the finger itself, mark the slot absent; otherwise drop
    /// every trail whose first hop is the disconnected peer. Returns the
    /// fully-evicted fingers (identity==friend) and, for partially-affected
    /// fingers, the trails that were dropped (for the caller to tear down
    /// friend trail counters appropriately -- teardown in the opposite
    /// direction is not needed, per spec.md §4.6).
    pub fn on_friend_disconnect(&mut self, friend: &PeerId) -> DisconnectImpact {
        let mut evicted_fingers = Vec::new();
        let mut dropped_trails = Vec::new();

        let mut handle = |slot: &mut Option<Finger>| {
            if let Some(finger) = slot {
                if finger.identity == *friend {
                    evicted_fingers.push(slot.take().unwrap());
                    return;
                }
                let before = finger.trails.len();
                let (kept, dropped): (Vec<_>, Vec<_>) = finger
                    .trails
                    .drain(..)
                    .partition(|t| t.first_hop().map(|h| h != *friend).unwrap_or(true));
                finger.trails = kept;
                if dropped.len() != before {
                    dropped_trails.extend(dropped);
                }
            }
        };

        for slot in self.slots.iter_mut() {
            handle(slot);
        }
        handle(&mut self.predecessor);

        DisconnectImpact {
            evicted_fingers,
            dropped_trails,
        }
    }

    fn slot_mut(&mut self, slot: FingerSlot) -> &mut Option<Finger> {
        match slot {
            FingerSlot::Index(i) => &mut self.slots[i],
            FingerSlot::Predecessor => &mut self.predecessor,
        }
    }

    fn set_slot(&mut self, slot: FingerSlot, value: Option<Finger>) {
        *self.slot_mut(slot) = value;
    }

    /// Iterate all currently-present fingers (for maintenance/statistics).
    pub fn present_fingers(&self) -> impl Iterator<Item = &Finger> {
        self.slots
            .iter()
            .chain(std::iter::once(&self.predecessor))
            .filter_map(|f| f.as_ref())
    }
}

/// Result of [`FingerTable::on_friend_disconnect`].
pub struct DisconnectImpact {
    /// Fingers removed entirely because the finger itself disconnected.
    pub evicted_fingers: Vec<Finger>,
    /// Trails dropped because their first hop disconnected, for fingers
    /// that survive (other trails remain).
    pub dropped_trails: Vec<FingerTrail>,
}

/// `Select_and_replace_trail` (§4.4): when at capacity, discard the longest
/// among existing+new. Returns `((surviving trails, first hop of the new
/// trail iff it survived), evicted trail)`.
fn select_and_replace_trail(
    mut existing: Vec<FingerTrail>,
    new_trail: FingerTrail,
) -> ((Vec<FingerTrail>, Option<PeerId>), Option<FingerTrail>) {
    let new_trail_id = new_trail.trail_id;
    let new_first_hop = new_trail.first_hop();
    existing.push(new_trail);
    // ties favor order-of-first-seen (existing trails precede the new one
    // in the vec); spec.md §9 explicitly says not to assume stability of
    // this tie-break across implementations.
    let longest_index = existing
        .iter()
        .enumerate()
        .max_by_key(|(_, t)| t.length)
        .map(|(i, _)| i)
        .unwrap();
    let evicted = existing.remove(longest_index);
    let new_survived = evicted.trail_id != new_trail_id;
    let first_hop = if new_survived { new_first_hop } else { None };
    ((existing, first_hop), Some(evicted))
}

fn local_prefix(id: &Id) -> u64 {
    let bytes = id.as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn predecessor_target(my_id: &PeerId) -> Id {
    // my_id - 1 over the full identifier space.
    let mut bytes = *my_id.as_bytes();
    for byte in bytes.iter_mut().rev() {
        if *byte == 0 {
            *byte = 0xff;
        } else {
            *byte -= 1;
            break;
        }
    }
    Id::from_bytes(bytes)
}

fn successor_target(my_id: &PeerId) -> Id {
    // my_id + 1 over the full identifier space.
    let mut bytes = *my_id.as_bytes();
    for byte in bytes.iter_mut().rev() {
        if *byte == 0xff {
            *byte = 0;
        } else {
            *byte += 1;
            break;
        }
    }
    Id::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_BYTES;

    fn pid(n: u8) -> PeerId {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        PeerId::from_bytes(b)
    }

    #[test]
    fn compute_and_recover_finger_index_round_trip() {
        let table = FingerTable::new(pid(0), 8, 2);
        for i in 0..8 {
            let value = table.compute_finger_value(i);
            assert_eq!(table.finger_table_index(value), Some(i));
        }
    }

    #[test]
    fn add_new_finger_self_records_identity_only() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        let outcome = table.add_new_finger(FingerSlot::Index(0), pid(0), Id::ZERO, vec![]);
        assert!(matches!(outcome, AddFingerOutcome::SelfOnly));
        assert_eq!(table.get(FingerSlot::Index(0)).unwrap().trails.len(), 0);
    }

    #[test]
    fn add_new_finger_friend_is_zero_length_trail() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        let outcome = table.add_new_finger(FingerSlot::Index(1), pid(9), Id::ZERO, vec![]);
        assert!(matches!(
            outcome,
            AddFingerOutcome::Installed { first_hop: None }
        ));
        let finger = table.get(FingerSlot::Index(1)).unwrap();
        assert_eq!(finger.trails[0].hops.len(), 0);
    }

    #[test]
    fn add_new_finger_through_hops_increments_first_hop() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        let outcome =
            table.add_new_finger(FingerSlot::Index(1), pid(9), Id::ZERO, vec![pid(5), pid(6)]);
        assert!(matches!(
            outcome,
            AddFingerOutcome::Installed {
                first_hop: Some(_)
            }
        ));
    }

    #[test]
    fn select_and_replace_trail_evicts_longest() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        table.add_new_finger(FingerSlot::Index(1), pid(9), Id::from_bytes([1; ID_BYTES]), vec![pid(1)]);
        table.add_new_finger(
            FingerSlot::Index(1),
            pid(9),
            Id::from_bytes([2; ID_BYTES]),
            vec![pid(2), pid(3)],
        );
        // table now at capacity (2); this third trail is shorter than the
        // 2-hop one, so the 2-hop trail should be evicted.
        let outcome = table.add_new_finger(
            FingerSlot::Index(1),
            pid(9),
            Id::from_bytes([3; ID_BYTES]),
            vec![pid(4)],
        );
        match outcome {
            AddFingerOutcome::Replaced { evicted, .. } => {
                let evicted = evicted.unwrap();
                assert_eq!(evicted.length, 2);
            }
            other => panic!("expected Replaced, got {:?}", other),
        }
    }

    #[test]
    fn predecessor_replacement_requires_strictly_closer() {
        let mut table = FingerTable::new(pid(10), 4, 2);
        let first = table.compare_and_update_predecessor(pid(8), Id::ZERO, vec![]);
        assert!(first.evicted.is_none());
        assert_eq!(table.get(FingerSlot::Predecessor).unwrap().identity, pid(8));

        // A farther candidate must not replace it.
        let worse = table.compare_and_update_predecessor(pid(1), Id::ZERO, vec![]);
        assert!(worse.evicted.is_none());
        assert_eq!(table.get(FingerSlot::Predecessor).unwrap().identity, pid(8));
    }

    #[test]
    fn successor_replacement_updates_slot_zero() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        table.compare_and_update_successor(pid(5), Id::ZERO, vec![]);
        assert_eq!(table.successor().unwrap().identity, pid(5));
        table.compare_and_update_successor(pid(1), Id::ZERO, vec![]);
        assert_eq!(table.successor().unwrap().identity, pid(1));
    }

    #[test]
    fn disconnect_evicts_finger_identical_to_friend() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        table.add_new_finger(FingerSlot::Index(1), pid(9), Id::ZERO, vec![]);
        let impact = table.on_friend_disconnect(&pid(9));
        assert_eq!(impact.evicted_fingers.len(), 1);
        assert!(table.get(FingerSlot::Index(1)).is_none());
    }

    #[test]
    fn disconnect_drops_only_trails_through_the_friend() {
        let mut table = FingerTable::new(pid(0), 4, 2);
        table.add_new_finger(
            FingerSlot::Index(1),
            pid(9),
            Id::from_bytes([1; ID_BYTES]),
            vec![pid(5)],
        );
        let impact = table.on_friend_disconnect(&pid(5));
        assert_eq!(impact.dropped_trails.len(), 1);
        assert!(table.get(FingerSlot::Index(1)).is_some());
    }
}
