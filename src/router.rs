//! Request router (C5, §4.5): PUT/GET/RESULT handling, loop-splicing, the
//! forward-count formula, and the recent-request cache. Ties together the
//! friend table, routing table, trail store, pending-request cache, local
//! cache, and the client/stats collaborators, but never touches a
//! `Transport` directly — every handler returns the frames it wants sent,
//! leaving actual transmission to the event loop, the same synchronous/
//! caller-driven split `bucket.rs` uses for ping-on-bucket-full.

use crate::bloom::Bloom;
use crate::cache::Datastore;
use crate::client::{ClientResult, ClientSink};
use crate::config::{DhtConfig, RoutingVariant};
use crate::error::DhtError;
use crate::finger::FingerSlot;
use crate::friend::FriendTable;
use crate::identity::{Id, Key, PeerId};
use crate::pending::{Originator, PendingRequestStore, RequestId};
use crate::routing::{should_use_closer_only, RoutingTable};
use crate::stats::{StatEvent, StatsSink};
use crate::trail::TrailStore;
use crate::wire::{GetBody, Message, PutBody, ResultBody};
use bytes::Bytes;
use rand::Rng;
use std::time::{Duration, Instant};

/// A frame addressed to a friend, for the caller to actually transmit.
pub type Outbox = (PeerId, Bytes);

/// Everything the router needs, borrowed for the duration of one call.
/// Bundled into a struct (rather than threaded as a dozen parameters)
/// because every handler below needs nearly all of it.
pub struct RouterState<'a> {
    pub self_id: PeerId,
    pub config: &'a DhtConfig,
    pub friends: &'a mut FriendTable,
    pub routing: &'a mut RoutingTable,
    pub trails: &'a mut TrailStore,
    pub pending: &'a mut PendingRequestStore,
    pub datastore: &'a mut dyn Datastore,
    pub client: &'a dyn ClientSink,
    pub stats: &'a dyn StatsSink,
}

/// `forward_count(hops, replication)` (§4.5). `diameter` and
/// `known_peer_count` come from the routing table; `bucket_size` is the
/// configured Kademlia bucket size (`K`), used only to scale the early
/// give-up shortcut below; `strict_kademlia` switches to the simpler "full
/// replication once, then one-at-a-time" policy.
#[allow(clippy::too_many_arguments)]
fn forward_count(
    hop_count: u32,
    replication: u32,
    diameter: u32,
    known_peer_count: usize,
    bucket_size: usize,
    max_hops: u32,
    strict_kademlia: bool,
    rng: &mut impl Rng,
) -> u32 {
    if strict_kademlia {
        return if hop_count == 0 {
            replication
        } else if hop_count < max_hops {
            1
        } else {
            0
        };
    }
    if hop_count > (diameter + 1) * 2 && known_peer_count > (diameter as usize) * bucket_size {
        return 0;
    }
    if hop_count > max_hops {
        return 0;
    }
    let denominator = replication * (hop_count + 1) + diameter;
    if denominator == 0 {
        return 1;
    }
    let draw = rng.gen_range(0..denominator);
    1 + u32::from(draw < replication)
}

/// Drop the earlier occurrence of `self_id` in `path` and everything after
/// it (§4.5/§8 "loop splice"), returning whether a splice happened. A path
/// with no self-occurrence is untouched (splice-idempotence law).
fn splice_loop(path: &mut Vec<PeerId>, self_id: &PeerId) -> bool {
    if let Some(pos) = path.iter().position(|p| p == self_id) {
        path.truncate(pos);
        true
    } else {
        false
    }
}

/// Stable per-query identifier derived from fields every hop can recompute
/// without an explicit wire field (the wire `GET`/`PUT` bodies carry no
/// `request_id`; see DESIGN.md for why).
pub(crate) fn derive_query_id(key: &Key, block_type: u32, originator: &PeerId) -> RequestId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.as_bytes());
    hasher.update(&block_type.to_be_bytes());
    hasher.update(originator.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest.as_bytes()[..8].try_into().unwrap())
}

fn unix_ms_from(expiration: Instant, now: Instant) -> u64 {
    expiration.saturating_duration_since(now).as_millis() as u64
}

/// Resolve the actual friend to transmit to and the trail id to stamp on
/// the outgoing message for a chosen logical next hop. For Kademlia the
/// logical target and the transmit friend are the same peer with no trail.
/// For the finger variant, forwarding to a non-friend finger goes via the
/// first hop of one of its trails.
pub(crate) fn resolve_transmit(
    routing: &RoutingTable,
    friends: &FriendTable,
    logical_target: PeerId,
    now: Instant,
) -> Option<(PeerId, Id)> {
    match routing {
        RoutingTable::Kademlia(_) => Some((logical_target, Id::ZERO)),
        RoutingTable::FingerTable(table) => {
            let finger = table.present_fingers().find(|f| f.identity == logical_target)?;
            let trail = finger.select_trail(|peer| friends.is_congested(peer, now))?;
            match trail.first_hop() {
                Some(hop) => Some((hop, trail.trail_id)),
                None => Some((logical_target, trail.trail_id)),
            }
        }
    }
}

/// Pick the next forwarding candidate for one unit of `forward_count`.
/// Kept as its own function (rather than matching on `state.routing`
/// inline) so a Kademlia arm's mutable borrow of the table never overlaps
/// a FingerTable arm's separate access to the same field.
fn select_next_candidate(
    routing: &RoutingTable,
    key: &crate::identity::Key,
    visited: &Bloom,
    closer_only: bool,
    rng: &mut impl Rng,
) -> Option<PeerId> {
    match routing {
        RoutingTable::Kademlia(table) => table.select_for_route(key, visited, closer_only, rng),
        RoutingTable::FingerTable(_) => routing.find_closest(key),
    }
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

/// `client_put` (§6.4): compute the local best-known next hop; if that is
/// self, store locally; otherwise emit a fresh PUT with `hop_count = 0`.
pub fn client_put(
    state: &mut RouterState,
    key: Key,
    block_type: u32,
    payload: Vec<u8>,
    expiration: Instant,
    replication: u32,
    now: Instant,
) -> Vec<Outbox> {
    let bloom = Bloom::new();
    if state.routing.am_i_closest(&state.self_id, &key, &bloom) {
        state.datastore.put(key, block_type, expiration, payload, vec![state.self_id]);
        state.stats.bump(StatEvent::CachePut);
        return Vec::new();
    }
    let Some(target) = state.routing.find_closest(&key) else {
        state.stats.bump(StatEvent::DroppedNoRoute);
        return Vec::new();
    };
    let Some((transmit_to, trail_id)) = resolve_transmit(state.routing, state.friends, target, now) else {
        state.stats.bump(StatEvent::DroppedNoRoute);
        return Vec::new();
    };
    let msg = Message::Put(PutBody {
        options: 0,
        block_type,
        hop_count: 0,
        desired_replication: replication,
        best_known_destination: target,
        intermediate_trail_id: trail_id,
        expiration_unix_ms: unix_ms_from(expiration, now),
        key,
        put_path: vec![state.self_id],
        payload,
    });
    send_frame(state.friends, state.stats, transmit_to, &msg).into_iter().collect()
}

/// A PUT arrived from `arrived_from` (the direct friend we received bytes
/// from). Validates, loop-splices, caches if terminal, and forwards per
/// `forward_count`.
pub fn handle_put_relayed(
    state: &mut RouterState,
    mut body: PutBody,
    arrived_from: PeerId,
    now: Instant,
    rng: &mut impl Rng,
) -> Result<Vec<Outbox>, DhtError> {
    if body.hop_count >= state.config.max_hops {
        state.stats.bump(StatEvent::DroppedTtlExceeded);
        return Err(DhtError::TtlExceeded {
            hop_count: body.hop_count,
            max_hops: state.config.max_hops,
        });
    }
    if splice_loop(&mut body.put_path, &state.self_id) {
        state.stats.bump(StatEvent::PathSpliced);
    }
    body.put_path.push(state.self_id);
    body.hop_count += 1;

    let expiration = now + Duration::from_millis(body.expiration_unix_ms);
    let bloom = Bloom::new();
    if state.routing.am_i_closest(&state.self_id, &body.key, &bloom) {
        state.datastore.put(
            body.key,
            body.block_type,
            expiration,
            body.payload.clone(),
            body.put_path.clone(),
        );
        state.stats.bump(StatEvent::CachePut);
    }

    let diameter = state.routing.estimate_diameter(&state.self_id);
    let known_peers = state.routing.known_peer_count();
    let count = forward_count(
        body.hop_count,
        body.desired_replication,
        diameter,
        known_peers,
        state.config.bucket_size,
        state.config.max_hops,
        state.config.strict_kademlia_forwarding,
        rng,
    );

    let mut outbox = Vec::new();
    let mut visited = Bloom::new();
    visited.visit(&arrived_from);
    for _ in 0..count {
        let closer_only = should_use_closer_only(
            body.hop_count,
            state.config.max_hops,
            state.config.closer_only_policy,
            rng,
        );
        let candidate = select_next_candidate(state.routing, &body.key, &visited, closer_only, rng);
        let Some(target) = candidate else { break };
        if target == state.self_id {
            break;
        }
        visited.visit(&target);
        let Some((transmit_to, trail_id)) =
            resolve_transmit(state.routing, state.friends, target, now)
        else {
            continue;
        };
        let mut forwarded = body.clone();
        forwarded.best_known_destination = target;
        forwarded.intermediate_trail_id = trail_id;
        let msg = Message::Put(forwarded);
        if let Some(frame) = send_frame(state.friends, state.stats, transmit_to, &msg) {
            outbox.push(frame);
        }
    }
    Ok(outbox)
}

/// `client_get` (§6.4). If the local peer is already closest, serve from
/// the cache immediately and do not forward. Otherwise register a pending
/// entry and emit a fresh GET.
pub fn client_get(
    state: &mut RouterState,
    key: Key,
    block_type: u32,
    replication: u32,
    request_id: RequestId,
    now: Instant,
) -> Vec<Outbox> {
    let bloom = Bloom::new();
    if state.routing.am_i_closest(&state.self_id, &key, &bloom) {
        let mut results = Vec::new();
        state.datastore.get(&key, block_type, &mut |k, _ty, _exp, payload, put_path| {
            results.push((*k, payload.to_vec(), put_path.to_vec()));
        });
        if results.is_empty() {
            state.stats.bump(StatEvent::CacheMiss);
        }
        for (k, payload, put_path) in results {
            state.stats.bump(StatEvent::CacheHit);
            state.client.deliver_result(ClientResult {
                request_id,
                key: k,
                payload,
                put_path,
                get_path: vec![state.self_id],
            });
        }
        return Vec::new();
    }
    let Some(target) = state.routing.find_closest(&key) else {
        state.stats.bump(StatEvent::DroppedNoRoute);
        return Vec::new();
    };
    let Some((transmit_to, trail_id)) = resolve_transmit(state.routing, state.friends, target, now) else {
        state.stats.bump(StatEvent::DroppedNoRoute);
        return Vec::new();
    };
    let mut visited = Bloom::new();
    visited.visit(&state.self_id);
    // The RESULT this GET eventually draws back looks itself up by
    // `derive_query_id`, not by the caller's own id, so the pending entry has
    // to be keyed the same way; `request_id` only survives inside
    // `Originator::Client` for delivery.
    let pending_key = derive_query_id(&key, block_type, &state.self_id);
    state.pending.observe(
        key,
        pending_key,
        Originator::Client(request_id),
        visited,
        0,
        state.config.congestion_timeout,
        now,
    );
    let msg = Message::Get(GetBody {
        options: 0,
        block_type,
        hop_count: 0,
        desired_replication: replication,
        best_known_destination: target,
        intermediate_trail_id: trail_id,
        key,
        get_path: vec![state.self_id],
    });
    send_frame(state.friends, state.stats, transmit_to, &msg).into_iter().collect()
}

/// A GET arrived from `arrived_from`. Mirrors [`handle_put_relayed`]'s
/// validation and loop-splice, then either serves from cache (replying
/// along the reverse path recorded in the pending entry) or forwards, or
/// both, per §4.5.
pub fn handle_get_relayed(
    state: &mut RouterState,
    mut body: GetBody,
    arrived_from: PeerId,
    now: Instant,
    rng: &mut impl Rng,
) -> Result<Vec<Outbox>, DhtError> {
    if body.hop_count >= state.config.max_hops {
        state.stats.bump(StatEvent::DroppedTtlExceeded);
        return Err(DhtError::TtlExceeded {
            hop_count: body.hop_count,
            max_hops: state.config.max_hops,
        });
    }
    if splice_loop(&mut body.get_path, &state.self_id) {
        state.stats.bump(StatEvent::PathSpliced);
    }
    body.get_path.push(state.self_id);
    body.hop_count += 1;

    let originator = *body.get_path.first().unwrap_or(&arrived_from);
    let request_id = derive_query_id(&body.key, body.block_type, &originator);
    let mut visited = Bloom::new();
    visited.visit(&arrived_from);
    state.pending.observe(
        body.key,
        request_id,
        Originator::Peer(arrived_from),
        visited,
        body.hop_count,
        state.config.congestion_timeout,
        now,
    );

    let mut outbox = Vec::new();
    let bloom = Bloom::new();
    if state.routing.am_i_closest(&state.self_id, &body.key, &bloom) {
        let mut hits = Vec::new();
        state.datastore.get(&body.key, body.block_type, &mut |k, _ty, exp, payload, put_path| {
            hits.push((*k, exp, payload.to_vec(), put_path.to_vec()));
        });
        if hits.is_empty() {
            state.stats.bump(StatEvent::CacheMiss);
        }
        for (k, exp, payload, put_path) in hits {
            state.stats.bump(StatEvent::CacheHit);
            let result = Message::Result(ResultBody {
                block_type: body.block_type,
                querying_peer: originator,
                expiration_unix_ms: unix_ms_from(exp, now),
                key: k,
                put_path,
                get_path: body.get_path.clone(),
                payload,
            });
            if let Some(frame) = send_frame(state.friends, state.stats, arrived_from, &result) {
                outbox.push(frame);
            }
        }
    }

    let diameter = state.routing.estimate_diameter(&state.self_id);
    let known_peers = state.routing.known_peer_count();
    let count = forward_count(
        body.hop_count,
        body.desired_replication,
        diameter,
        known_peers,
        state.config.bucket_size,
        state.config.max_hops,
        state.config.strict_kademlia_forwarding,
        rng,
    );
    for _ in 0..count {
        let closer_only = should_use_closer_only(
            body.hop_count,
            state.config.max_hops,
            state.config.closer_only_policy,
            rng,
        );
        let candidate = select_next_candidate(state.routing, &body.key, &visited, closer_only, rng);
        let Some(target) = candidate else { break };
        if target == state.self_id {
            break;
        }
        visited.visit(&target);
        let Some((transmit_to, trail_id)) =
            resolve_transmit(state.routing, state.friends, target, now)
        else {
            continue;
        };
        let mut forwarded = body.clone();
        forwarded.best_known_destination = target;
        forwarded.intermediate_trail_id = trail_id;
        let msg = Message::Get(forwarded);
        if let Some(frame) = send_frame(state.friends, state.stats, transmit_to, &msg) {
            outbox.push(frame);
        }
    }
    Ok(outbox)
}

/// A RESULT arrived. If this peer is the originator (its pending entry's
/// `Originator` is `Client`), deliver locally; otherwise forward to the
/// friend recorded as `reply_via` when the matching GET passed through, per
/// this crate's simplification of §4.5's "forward using get_path indices"
/// (see DESIGN.md).
pub fn handle_result(state: &mut RouterState, body: ResultBody) -> Result<Vec<Outbox>, DhtError> {
    let request_id = derive_query_id(&body.key, body.block_type, &body.querying_peer);
    let Some(pending) = state.pending.peek(&body.key, request_id) else {
        state.stats.bump(StatEvent::DroppedTrailUnknown);
        return Err(DhtError::TrailUnknown { trail_id: Id::ZERO });
    };
    match pending.originator {
        Originator::Client(client_request_id) => {
            state.client.deliver_result(ClientResult {
                request_id: client_request_id,
                key: body.key,
                payload: body.payload,
                put_path: body.put_path,
                get_path: body.get_path,
            });
            state.pending.remove(&body.key, request_id);
            Ok(Vec::new())
        }
        Originator::Peer(reply_via) => {
            let msg = Message::Result(body);
            Ok(send_frame(state.friends, state.stats, reply_via, &msg)
                .into_iter()
                .collect())
        }
    }
}

/// `Add_new_finger` entry point used by the maintenance loop once a finger
/// search completes (kept here since it shares `RouterState`'s borrows with
/// the PUT/GET handlers; the slot-selection arithmetic itself lives in
/// `finger.rs`).
pub fn install_finger(
    state: &mut RouterState,
    slot: FingerSlot,
    identity: PeerId,
    trail_id: Id,
    hops: Vec<PeerId>,
) {
    if !matches!(state.config.variant, RoutingVariant::FingerTable) {
        return;
    }
    if let RoutingTable::FingerTable(table) = state.routing {
        let outcome = table.add_new_finger(slot, identity, trail_id, hops);
        let (first_hop, evicted) = match outcome {
            crate::finger::AddFingerOutcome::Installed { first_hop } => (first_hop, None),
            crate::finger::AddFingerOutcome::Replaced { first_hop, evicted } => {
                (first_hop, evicted)
            }
            crate::finger::AddFingerOutcome::SelfOnly => (None, None),
        };
        if let Some(hop) = first_hop {
            state.friends.inc_trails_through(&hop);
        }
        if let Some(old) = evicted {
            if let Some(hop) = old.first_hop() {
                state.friends.dec_trails_through(&hop);
            }
            state.trails.remove(&old.trail_id);
            state.stats.bump(StatEvent::FingerTrailReplacement);
        }
    }
}
