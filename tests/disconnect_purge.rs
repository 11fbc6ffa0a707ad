//! A friend disconnect cascades through every collaborator that names it:
//! the friend table entry goes away, a finger reachable only as that friend
//! is evicted outright, a finger reachable through it by a longer path
//! merely loses that one trail, every `TrailStore` row touching it is
//! purged, and (since `MaintenanceState` carries no pending-request store of
//! its own) any in-flight GET/PUT bookkeeping for unrelated requests is left
//! completely untouched.

mod common;

use common::{pid, MaintenanceHarness};
use dht_core::bloom::Bloom;
use dht_core::config::DhtConfig;
use dht_core::finger::FingerSlot;
use dht_core::identity::Id;
use dht_core::maintenance::on_disconnect;
use dht_core::pending::{Originator, PendingRequestStore};
use dht_core::routing::RoutingTable;
use dht_core::stats::StatEvent;
use dht_core::trail::{Direction, TrailRow};
use std::time::{Duration, Instant};

#[test]
fn disconnecting_a_friend_purges_fingers_trails_and_friend_table_but_not_pending() {
    let self_id = pid(0);
    let f = pid(9); // the friend that disconnects
    let g = pid(7); // a finger reachable through f, among other hops
    let other_peer = pid(20);
    let now = Instant::now();

    let mut harness = MaintenanceHarness::new(self_id, DhtConfig::finger_table());
    harness.friends.on_connect(f);
    harness.friends.on_connect(other_peer);

    if let RoutingTable::FingerTable(table) = &mut harness.routing {
        // Zero-hop finger: f is reachable as a direct friend, so it must be
        // evicted outright rather than merely losing a trail.
        table.add_new_finger(FingerSlot::Index(0), f, Id::ZERO, vec![]);
        // g is reachable via a trail through f, but also keeps a second,
        // independent trail through other_peer that must survive.
        table.add_new_finger(
            FingerSlot::Index(1),
            g,
            Id::from_bytes([1; dht_core::identity::ID_BYTES]),
            vec![f],
        );
        table.add_new_finger(
            FingerSlot::Index(1),
            g,
            Id::from_bytes([2; dht_core::identity::ID_BYTES]),
            vec![other_peer],
        );
    }

    harness
        .trails
        .install(Id::from_bytes([3; dht_core::identity::ID_BYTES]), TrailRow {
            prev_hop: other_peer,
            next_hop: f,
            direction: Direction::SrcToDest,
        });

    // Pending store lives entirely outside MaintenanceState.
    let mut pending = PendingRequestStore::new(64);
    let unrelated_key = pid(99);
    pending.observe(
        unrelated_key,
        1,
        Originator::Client(1),
        Bloom::new(),
        0,
        Duration::from_secs(30),
        now,
    );

    let mut state = harness.state(self_id);
    on_disconnect(&mut state, &f);

    assert_eq!(harness.stats.get(StatEvent::DisconnectCascade), 1);
    assert!(!harness.friends.contains(&f));
    assert!(harness.friends.contains(&other_peer));

    if let RoutingTable::FingerTable(table) = &harness.routing {
        assert!(table.get(FingerSlot::Index(0)).is_none(), "direct-friend finger must be evicted");
        let g_finger = table.get(FingerSlot::Index(1)).expect("g survives via its other trail");
        assert_eq!(g_finger.identity, g);
        assert_eq!(g_finger.trails.len(), 1);
        assert_eq!(g_finger.trails[0].first_hop(), Some(other_peer));
    }

    assert!(!harness.trails.contains(&Id::from_bytes([3; dht_core::identity::ID_BYTES])));

    // An unrelated pending entry is untouched by the disconnect of f.
    let still_there = pending.peek(&unrelated_key, 1);
    assert!(still_there.is_some());
}
