//! Maintenance (C6, §4.6): the timers that keep C3/C4 populated without any
//! client request driving them. Structured the same way as `router.rs` —
//! functions take a bundled state and return the frames the caller (the
//! event loop in `actor.rs`) should actually transmit, plus any connect
//! requests the caller should hand to `Transport`.

use crate::config::{DhtConfig, RoutingVariant};
use crate::finger::{AddFingerOutcome, FingerSlot};
use crate::friend::FriendTable;
use crate::identity::{Id, PeerId};
use crate::router::{resolve_transmit, Outbox};
use crate::routing::RoutingTable;
use crate::stats::{StatEvent, StatsSink};
use crate::trail::{Direction, TrailRow, TrailStore};
use crate::wire::{
    AskHelloBody, DiscoveryBody, Message, NotifyNewSuccessorBody,
    NotifySuccessorConfirmationBody, TrailSetupBody, TrailSetupRejectionBody,
    TrailSetupResultBody, TrailTeardownBody, VerifySuccessorBody, VerifySuccessorResultBody,
    WireDirection,
};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn random_id(rng: &mut impl Rng) -> Id {
    let mut bytes = [0u8; crate::identity::ID_BYTES];
    rng.fill(&mut bytes[..]);
    Id::from_bytes(bytes)
}

/// Frames plus side-channel connect requests a maintenance call wants
/// acted on; mirrors the router's `Outbox`-only return but adds the one
/// extra effect maintenance alone needs (asking the transport to dial a
/// newly learned peer).
#[derive(Default)]
pub struct MaintenanceOutcome {
    pub frames: Vec<Outbox>,
    pub connect_requests: Vec<PeerId>,
}

impl MaintenanceOutcome {
    fn push_frame(&mut self, frame: Option<Outbox>) {
        if let Some(f) = frame {
            self.frames.push(f);
        }
    }
}

/// Per-peer last-message timestamps (§4.6 peer timeout), kept here rather
/// than in `FriendTable`/`KademliaTable` since neither tracks wall-clock
/// recency on its own.
#[derive(Default)]
pub struct LivenessTracker {
    last_seen: HashMap<PeerId, Instant>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a message was just received from `peer`.
    pub fn touch(&mut self, peer: PeerId, now: Instant) {
        self.last_seen.insert(peer, now);
    }

    pub fn forget(&mut self, peer: &PeerId) {
        self.last_seen.remove(peer);
    }

    /// Peers silent for at least `timeout`, for the caller to expire.
    fn silent_since(&self, timeout: Duration, now: Instant) -> Vec<PeerId> {
        self.last_seen
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= timeout)
            .map(|(peer, _)| *peer)
            .collect()
    }
}

/// Backoff/progress bookkeeping for the finger-variant search loop (§4.6
/// "Finger-found reset").
pub struct FingerSearchCursor {
    index: Option<usize>,
    empty_rounds: u32,
}

impl FingerSearchCursor {
    pub fn new(finger_count: usize) -> Self {
        FingerSearchCursor {
            index: if finger_count == 0 { None } else { Some(finger_count - 1) },
            empty_rounds: 0,
        }
    }

    fn current_slot(&self) -> FingerSlot {
        match self.index {
            Some(i) => FingerSlot::Index(i),
            None => FingerSlot::Predecessor,
        }
    }

    /// Advance to the next slot after one round, counting down through the
    /// index slots then through the predecessor slot before wrapping.
    fn advance(&mut self, finger_count: usize, found_something: bool) {
        if found_something {
            self.empty_rounds = 0;
        } else {
            self.empty_rounds = self.empty_rounds.saturating_add(1);
        }
        self.index = match self.index {
            Some(0) => None,
            Some(i) => Some(i - 1),
            None => {
                if finger_count == 0 {
                    None
                } else {
                    Some(finger_count - 1)
                }
            }
        };
    }

    /// Reset to the top of the search order (a full finger table was just
    /// populated).
    pub fn reset(&mut self, finger_count: usize) {
        self.index = if finger_count == 0 { None } else { Some(finger_count - 1) };
        self.empty_rounds = 0;
    }

    /// Current backoff multiplier: doubles per consecutive empty round, capped
    /// at 2^6 so the interval never grows unbounded.
    pub fn backoff_factor(&self) -> u32 {
        1 << self.empty_rounds.min(6)
    }
}

pub struct MaintenanceState<'a> {
    pub self_id: PeerId,
    pub config: &'a DhtConfig,
    pub friends: &'a mut FriendTable,
    pub routing: &'a mut RoutingTable,
    pub trails: &'a mut TrailStore,
    pub stats: &'a dyn StatsSink,
    pub liveness: &'a mut LivenessTracker,
    pub search: &'a mut FingerSearchCursor,
}

fn send_frame(friends: &mut FriendTable, stats: &dyn StatsSink, to: PeerId, msg: &Message) -> Option<Outbox> {
    let frame = msg.encode().freeze();
    if friends.send(&to, frame.to_vec()) {
        Some((to, frame))
    } else {
        stats.bump(StatEvent::FriendQueueDropped);
        None
    }
}

/// Kademlia discovery tick (§4.6). For every friend, with probability
/// `1/maintain_chance(total_peers)`, advertise up to `maintain_adv_cap`
/// other known peers.
pub fn kademlia_discovery_tick(
    state: &mut MaintenanceState,
    now: Instant,
    rng: &mut impl Rng,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    if !matches!(state.config.variant, RoutingVariant::Kademlia) {
        return outcome;
    }
    state.stats.bump(StatEvent::MaintenanceTick);
    let total_peers = state.routing.known_peer_count();
    let chance = DhtConfig::maintain_chance(total_peers).max(1);
    let candidates: Vec<PeerId> = state.friends.ids().copied().collect();
    for friend in candidates {
        if rng.gen_range(0..chance) != 0 {
            continue;
        }
        let random_key = random_id(rng);
        let peers = collect_advert_peers(state.routing, &random_key, state.config.maintain_adv_cap, rng);
        if peers.is_empty() {
            continue;
        }
        let msg = Message::Discovery(DiscoveryBody { peers });
        outcome.push_frame(send_frame(state.friends, state.stats, friend, &msg));
    }
    outcome
}

fn collect_advert_peers(
    routing: &RoutingTable,
    random_key: &Id,
    cap: usize,
    rng: &mut impl Rng,
) -> Vec<PeerId> {
    let bloom = crate::bloom::Bloom::new();
    let mut out = Vec::new();
    let mut excluded = bloom;
    for _ in 0..cap {
        let RoutingTable::Kademlia(table) = routing else { break };
        let Some(candidate) = table.select_for_route(random_key, &excluded, false, rng) else {
            break;
        };
        excluded.visit(&candidate);
        out.push(candidate);
    }
    out
}

/// A DISCOVERY arrived from `from` (§4.6): consider each listed peer for
/// admission; a peer not yet known is asked about via `connect_requests`
/// rather than the wire-level ASK_HELLO round trip, since this crate's
/// `Transport::connect` already resolves addressing on its own (see
/// DESIGN.md).
pub fn handle_discovery(state: &mut MaintenanceState, _from: PeerId, peers: Vec<PeerId>) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::Kademlia(table) = state.routing else {
        return outcome;
    };
    for peer in peers {
        if peer == state.self_id {
            continue;
        }
        let already_friend = state.friends.contains(&peer);
        table.learn(peer);
        if !already_friend {
            outcome.connect_requests.push(peer);
        }
    }
    outcome
}

/// An ASK_HELLO arrived. With this crate's `Transport` abstraction the
/// requested contact descriptor is implicit in `Transport::connect`, so
/// there is nothing further to reply with; kept as an explicit no-op
/// rather than silently dropping the message type from the wire table.
pub fn handle_ask_hello(_state: &mut MaintenanceState, _body: AskHelloBody) -> MaintenanceOutcome {
    MaintenanceOutcome::default()
}

/// Expire Kademlia peers silent for `maintain_peer_timeout` (§4.6). Liveness
/// probing ("PING peers silent for half that") is the transport's concern,
/// not the DHT core's (see DESIGN.md Open Questions).
pub fn expire_silent_peers(state: &mut MaintenanceState, now: Instant) -> Vec<PeerId> {
    if !matches!(state.config.variant, RoutingVariant::Kademlia) {
        return Vec::new();
    }
    let stale = state.liveness.silent_since(state.config.maintain_peer_timeout, now);
    if let RoutingTable::Kademlia(table) = state.routing {
        for peer in &stale {
            table.remove(peer);
            state.liveness.forget(peer);
        }
    }
    stale
}

/// Finger-variant discovery tick (§4.6): every `find_finger_interval`
/// (scaled by the current backoff), pick a random uncongested friend and
/// emit TRAIL_SETUP toward the current search index's target.
pub fn find_finger_tick(state: &mut MaintenanceState, now: Instant, rng: &mut impl Rng) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };
    state.stats.bump(StatEvent::MaintenanceTick);
    let Some(friend) = state.friends.select_random_uncongested(now) else {
        return outcome;
    };
    let slot = state.search.current_slot();
    let target_value = match slot {
        FingerSlot::Index(i) => table.compute_finger_value(i),
        FingerSlot::Predecessor => table.predecessor_value(),
    };
    let trail_id = random_id(rng);
    let msg = Message::TrailSetup(TrailSetupBody {
        is_predecessor: matches!(slot, FingerSlot::Predecessor),
        final_destination_finger_value: target_value,
        source: state.self_id,
        best_known_destination: state.self_id,
        intermediate_trail_id: Id::ZERO,
        trail_id,
        trail_so_far: vec![state.self_id],
    });
    outcome.push_frame(send_frame(state.friends, state.stats, friend, &msg));
    outcome
}

/// A TRAIL_SETUP arrived. If this peer is closest to the target value
/// among its known fingers/predecessor, it is the endpoint and answers
/// with TRAIL_SETUP_RESULT back along `trail_so_far`; otherwise it installs
/// an intermediate trail row and forwards toward a closer peer, or rejects
/// if its own table has no room to take on another trail.
pub fn handle_trail_setup(
    state: &mut MaintenanceState,
    body: TrailSetupBody,
    arrived_from: PeerId,
    now: Instant,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };

    let closer = table
        .successor()
        .map(|f| target_closer_than(&f.identity, &state.self_id, body.final_destination_finger_value))
        .unwrap_or(false);

    if !closer {
        let result = Message::TrailSetupResult(TrailSetupResultBody {
            finger_identity: state.self_id,
            querying_peer: body.source,
            is_predecessor: body.is_predecessor,
            ultimate_value: body.final_destination_finger_value,
            trail_id: body.trail_id,
            reverse_trail: body.trail_so_far,
        });
        outcome.push_frame(send_frame(state.friends, state.stats, arrived_from, &result));
        return outcome;
    }

    if state.friends.is_congested(&arrived_from, now) {
        let rejection = Message::TrailSetupRejection(TrailSetupRejectionBody {
            source: body.source,
            congested_peer: state.self_id,
            ultimate_value: body.final_destination_finger_value,
            is_predecessor: body.is_predecessor,
            trail_id: body.trail_id,
            congestion_time_ms: state.config.congestion_timeout.as_millis() as u64,
            trail_so_far: body.trail_so_far,
        });
        outcome.push_frame(send_frame(state.friends, state.stats, arrived_from, &rejection));
        state.stats.bump(StatEvent::TrailSetupRejected);
        return outcome;
    }

    let Some(next_friend) = state.friends.select_random_uncongested(now) else {
        let rejection = Message::TrailSetupRejection(TrailSetupRejectionBody {
            source: body.source,
            congested_peer: state.self_id,
            ultimate_value: body.final_destination_finger_value,
            is_predecessor: body.is_predecessor,
            trail_id: body.trail_id,
            congestion_time_ms: state.config.congestion_timeout.as_millis() as u64,
            trail_so_far: body.trail_so_far,
        });
        outcome.push_frame(send_frame(state.friends, state.stats, arrived_from, &rejection));
        return outcome;
    };
    state.trails.install(
        body.trail_id,
        TrailRow {
            prev_hop: arrived_from,
            next_hop: next_friend,
            direction: Direction::SrcToDest,
        },
    );
    let mut trail_so_far = body.trail_so_far.clone();
    trail_so_far.push(state.self_id);
    let forwarded = Message::TrailSetup(TrailSetupBody {
        trail_so_far,
        best_known_destination: next_friend,
        ..body
    });
    outcome.push_frame(send_frame(state.friends, state.stats, next_friend, &forwarded));
    outcome
}

fn target_closer_than(candidate: &PeerId, incumbent: &PeerId, target_value: u64) -> bool {
    let target_prefix = |id: &PeerId| -> u64 {
        let bytes = id.as_bytes();
        u64::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
    };
    let d_candidate = target_prefix(candidate).wrapping_sub(target_value);
    let d_incumbent = target_prefix(incumbent).wrapping_sub(target_value);
    d_candidate < d_incumbent
}

/// A TRAIL_SETUP_RESULT arrived, traveling back along `reverse_trail`. Every
/// hop but the origin installs a reversed trail row and forwards; the
/// origin installs the finger.
pub fn handle_trail_setup_result(
    state: &mut MaintenanceState,
    mut body: TrailSetupResultBody,
    arrived_from: PeerId,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    if body.querying_peer == state.self_id {
        let hops: Vec<PeerId> = if arrived_from == body.finger_identity {
            Vec::new()
        } else {
            vec![arrived_from]
        };
        if let RoutingTable::FingerTable(table) = state.routing {
            let slot = table
                .finger_table_index(body.ultimate_value)
                .map(FingerSlot::Index)
                .unwrap_or(FingerSlot::Predecessor);
            let outcome_add = table.add_new_finger(slot, body.finger_identity, body.trail_id, hops.clone());
            let (first_hop, evicted, found_something) = match outcome_add {
                AddFingerOutcome::Installed { first_hop } => (first_hop, None, true),
                AddFingerOutcome::Replaced { first_hop, evicted } => (first_hop, evicted, true),
                AddFingerOutcome::SelfOnly => (None, None, false),
            };
            if let Some(hop) = first_hop {
                state.friends.inc_trails_through(&hop);
            }
            if let Some(old) = evicted {
                if let Some(hop) = old.first_hop() {
                    state.friends.dec_trails_through(&hop);
                }
                state.trails.remove(&old.trail_id);
            }
            state.search.advance(table.finger_count(), found_something);
        }
        if !hops.is_empty() {
            state.trails.install(
                body.trail_id,
                TrailRow {
                    prev_hop: state.self_id,
                    next_hop: arrived_from,
                    direction: Direction::DestToSrc,
                },
            );
        }
        return outcome;
    }

    let Some(next_hop) = body.reverse_trail.pop() else {
        return outcome;
    };
    state.trails.install(
        body.trail_id,
        TrailRow {
            prev_hop: next_hop,
            next_hop: arrived_from,
            direction: Direction::DestToSrc,
        },
    );
    outcome.push_frame(send_frame(
        state.friends,
        state.stats,
        next_hop,
        &Message::TrailSetupResult(body),
    ));
    outcome
}

/// A TRAIL_SETUP_REJECTION arrived: mark the congested peer congested, and
/// if this peer is not the original requester, relay the rejection on.
pub fn handle_trail_setup_rejection(
    state: &mut MaintenanceState,
    mut body: TrailSetupRejectionBody,
    arrived_from: PeerId,
    now: Instant,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    if let Some(f) = state.friends.get_mut(&arrived_from) {
        f.mark_congested(now, Duration::from_millis(body.congestion_time_ms));
    }
    if let Some(prior) = body.trail_so_far.pop() {
        outcome.push_frame(send_frame(
            state.friends,
            state.stats,
            prior,
            &Message::TrailSetupRejection(body),
        ));
    } else if body.source == state.self_id {
        let RoutingTable::FingerTable(table) = state.routing else {
            return outcome;
        };
        state.search.advance(table.finger_count(), false);
    }
    outcome
}

/// Successor-liveness tick (§4.6): emit VERIFY_SUCCESSOR along the shortest
/// trail to the current successor, if any.
pub fn verify_successor_tick(state: &mut MaintenanceState, now: Instant) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };
    let Some(successor) = table.successor() else {
        return outcome;
    };
    let Some(trail) = successor.select_trail(|peer| state.friends.is_congested(peer, now)) else {
        return outcome;
    };
    let next_hop = trail.first_hop().unwrap_or(successor.identity);
    let msg = Message::VerifySuccessor(VerifySuccessorBody {
        source: state.self_id,
        successor: successor.identity,
        trail_id: trail.trail_id,
        trail: trail.hops.clone(),
    });
    outcome.push_frame(send_frame(state.friends, state.stats, next_hop, &msg));
    outcome
}

/// A VERIFY_SUCCESSOR arrived at its destination (the named successor):
/// answer with this peer's own predecessor so the querying peer can decide
/// whether a better successor exists.
pub fn handle_verify_successor(state: &mut MaintenanceState, body: VerifySuccessorBody, arrived_from: PeerId) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };
    let predecessor = table.get(FingerSlot::Predecessor).map(|f| f.identity).unwrap_or(state.self_id);
    let msg = Message::VerifySuccessorResult(VerifySuccessorResultBody {
        querying: body.source,
        current_successor: body.successor,
        probable_successor: predecessor,
        trail_id: body.trail_id,
        direction: WireDirection::DestToSrc,
        trail: body.trail,
    });
    outcome.push_frame(send_frame(state.friends, state.stats, arrived_from, &msg));
    outcome
}

/// The querying peer's VERIFY_SUCCESSOR_RESULT arrived: if the reported
/// predecessor is a better successor than the current one, install it and
/// notify it via NOTIFY_NEW_SUCCESSOR.
pub fn handle_verify_successor_result(
    state: &mut MaintenanceState,
    body: VerifySuccessorResultBody,
    rng: &mut impl Rng,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    if body.probable_successor == body.current_successor {
        return outcome;
    }
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };
    let trail_id = random_id(rng);
    let replace = table.compare_and_update_successor(body.probable_successor, trail_id, Vec::new());
    if table.successor().map(|f| f.identity) != Some(body.probable_successor) {
        return outcome;
    }
    if let Some(evicted) = replace.evicted {
        for trail in &evicted.trails {
            state.trails.remove(&trail.trail_id);
        }
    }
    let msg = Message::NotifyNewSuccessor(NotifyNewSuccessorBody {
        source: state.self_id,
        new_successor: body.probable_successor,
        trail_id,
        trail: Vec::new(),
    });
    outcome.push_frame(send_frame(state.friends, state.stats, body.probable_successor, &msg));
    outcome
}

/// NOTIFY_NEW_SUCCESSOR arrived at the new successor: record the sender as
/// predecessor candidate and confirm.
pub fn handle_notify_new_successor(
    state: &mut MaintenanceState,
    body: NotifyNewSuccessorBody,
    arrived_from: PeerId,
) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    let RoutingTable::FingerTable(table) = state.routing else {
        return outcome;
    };
    let replaced = table.compare_and_update_predecessor(body.source, body.trail_id, body.trail.clone());
    if let Some(evicted) = replaced.evicted {
        for trail in &evicted.trails {
            state.trails.remove(&trail.trail_id);
        }
    }
    let msg = Message::NotifySuccessorConfirmation(NotifySuccessorConfirmationBody {
        trail_id: body.trail_id,
        direction: WireDirection::DestToSrc,
    });
    outcome.push_frame(send_frame(state.friends, state.stats, arrived_from, &msg));
    outcome
}

/// A TRAIL_TEARDOWN arrived: drop the local row (if any) and forward along
/// the remaining direction unless this peer is the far endpoint.
pub fn handle_trail_teardown(state: &mut MaintenanceState, body: TrailTeardownBody) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    if let Some(row) = state.trails.remove(&body.trail_id) {
        let next = row.next_for(match body.direction {
            WireDirection::SrcToDest => Direction::SrcToDest,
            WireDirection::DestToSrc => Direction::DestToSrc,
        });
        outcome.push_frame(send_frame(
            state.friends,
            state.stats,
            next,
            &Message::TrailTeardown(body),
        ));
    }
    outcome
}

/// Disconnect cascade (§4.6): a friend went away. Purges C4 rows through
/// it, invalidates affected fingers/trails, and emits TRAIL_TEARDOWN along
/// any row whose surviving endpoint needs to hear about it.
pub fn on_disconnect(state: &mut MaintenanceState, friend: &PeerId) -> MaintenanceOutcome {
    let mut outcome = MaintenanceOutcome::default();
    state.stats.bump(StatEvent::DisconnectCascade);
    state.liveness.forget(friend);
    state.friends.on_disconnect(friend);
    if let RoutingTable::Kademlia(table) = state.routing {
        table.remove(friend);
    }
    state.trails.purge_friend(friend);
    if let RoutingTable::FingerTable(table) = state.routing {
        let impact = table.on_friend_disconnect(friend);
        for finger in impact.evicted_fingers {
            for trail in finger.trails {
                state.trails.remove(&trail.trail_id);
            }
        }
        for trail in impact.dropped_trails {
            state.trails.remove(&trail.trail_id);
        }
    }
    outcome
}

/// Exposes the router's transmit-resolution for maintenance-originated
/// frames (e.g. TRAIL_SETUP retries) that need the same friend/trail
/// selection PUT/GET forwarding uses.
pub fn resolve_trail_first_hop(routing: &RoutingTable, friends: &FriendTable, target: PeerId, now: Instant) -> Option<(PeerId, Id)> {
    resolve_transmit(routing, friends, target, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DhtConfig;
    use crate::identity::ID_BYTES;
    use crate::stats::CountingStatsSink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pid(n: u8) -> PeerId {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        PeerId::from_bytes(b)
    }

    struct Harness {
        config: DhtConfig,
        friends: FriendTable,
        routing: RoutingTable,
        trails: TrailStore,
        stats: CountingStatsSink,
        liveness: LivenessTracker,
        search: FingerSearchCursor,
    }

    impl Harness {
        fn new(self_id: PeerId, config: DhtConfig) -> Self {
            let routing = RoutingTable::new(self_id, &config);
            let search = FingerSearchCursor::new(config.finger_count);
            Harness {
                friends: FriendTable::new(config.max_queued_per_friend as usize, config.through_threshold),
                routing,
                trails: TrailStore::new(),
                stats: CountingStatsSink::new(),
                liveness: LivenessTracker::new(),
                search,
                config,
            }
        }

        fn state(&mut self, self_id: PeerId) -> MaintenanceState<'_> {
            MaintenanceState {
                self_id,
                config: &self.config,
                friends: &mut self.friends,
                routing: &mut self.routing,
                trails: &mut self.trails,
                stats: &self.stats,
                liveness: &mut self.liveness,
                search: &mut self.search,
            }
        }
    }

    #[test]
    fn liveness_tracker_flags_only_peers_past_timeout() {
        let mut tracker = LivenessTracker::new();
        let now = Instant::now();
        tracker.touch(pid(1), now);
        let stale = tracker.silent_since(Duration::from_secs(10), now + Duration::from_secs(5));
        assert!(stale.is_empty());
        let stale = tracker.silent_since(Duration::from_secs(10), now + Duration::from_secs(11));
        assert_eq!(stale, vec![pid(1)]);
    }

    #[test]
    fn expire_silent_peers_removes_from_routing_table() {
        let self_id = pid(0);
        let mut harness = Harness::new(self_id, DhtConfig::default());
        if let RoutingTable::Kademlia(table) = &mut harness.routing {
            table.learn(pid(9));
        }
        harness.liveness.touch(pid(9), Instant::now());
        let now = Instant::now() + harness.config.maintain_peer_timeout + Duration::from_secs(1);
        let mut state = harness.state(self_id);
        let expired = expire_silent_peers(&mut state, now);
        assert_eq!(expired, vec![pid(9)]);
        if let RoutingTable::Kademlia(table) = &harness.routing {
            assert_eq!(table.len(), 0);
        }
    }

    #[test]
    fn finger_search_cursor_counts_down_and_wraps() {
        let mut cursor = FingerSearchCursor::new(3);
        assert_eq!(cursor.current_slot(), FingerSlot::Index(2));
        cursor.advance(3, false);
        assert_eq!(cursor.current_slot(), FingerSlot::Index(1));
        cursor.advance(3, false);
        assert_eq!(cursor.current_slot(), FingerSlot::Index(0));
        cursor.advance(3, false);
        assert_eq!(cursor.current_slot(), FingerSlot::Predecessor);
        cursor.advance(3, false);
        assert_eq!(cursor.current_slot(), FingerSlot::Index(2));
    }

    #[test]
    fn finger_search_cursor_backoff_doubles_on_empty_rounds() {
        let mut cursor = FingerSearchCursor::new(4);
        assert_eq!(cursor.backoff_factor(), 1);
        cursor.advance(4, false);
        assert_eq!(cursor.backoff_factor(), 2);
        cursor.advance(4, false);
        assert_eq!(cursor.backoff_factor(), 4);
        cursor.advance(4, true);
        assert_eq!(cursor.backoff_factor(), 1);
    }

    #[test]
    fn on_disconnect_purges_friend_and_routing_entry() {
        let self_id = pid(0);
        let mut harness = Harness::new(self_id, DhtConfig::default());
        harness.friends.on_connect(pid(9));
        if let RoutingTable::Kademlia(table) = &mut harness.routing {
            table.learn(pid(9));
        }
        let mut state = harness.state(self_id);
        on_disconnect(&mut state, &pid(9));
        assert!(!harness.friends.contains(&pid(9)));
        if let RoutingTable::Kademlia(table) = &harness.routing {
            assert_eq!(table.len(), 0);
        }
    }

    #[test]
    fn trail_teardown_removes_row_and_forwards_when_present() {
        let self_id = pid(1);
        let mut harness = Harness::new(self_id, DhtConfig::finger_table());
        harness.friends.on_connect(pid(2));
        harness.trails.install(
            Id::ZERO,
            TrailRow {
                prev_hop: pid(9),
                next_hop: pid(2),
                direction: Direction::SrcToDest,
            },
        );
        let mut state = harness.state(self_id);
        let outcome = handle_trail_teardown(
            &mut state,
            TrailTeardownBody {
                trail_id: Id::ZERO,
                direction: WireDirection::SrcToDest,
            },
        );
        assert_eq!(outcome.frames.len(), 1);
        assert!(!harness.trails.contains(&Id::ZERO));
    }

    #[test]
    fn kademlia_discovery_tick_noop_for_finger_variant() {
        let self_id = pid(0);
        let mut harness = Harness::new(self_id, DhtConfig::finger_table());
        let mut rng = StdRng::seed_from_u64(1);
        let now = Instant::now();
        let mut state = harness.state(self_id);
        let outcome = kademlia_discovery_tick(&mut state, now, &mut rng);
        assert!(outcome.frames.is_empty());
    }
}
