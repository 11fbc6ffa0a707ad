//! A TRAIL_SETUP is rejected outright when the peer processing it finds its
//! own friend-table entry for the sender already congested, rather than
//! being installed and forwarded on. The resulting rejection, once it
//! reaches the sender, marks the rejecting peer congested in the sender's
//! own friend table.

mod common;

use common::{pid, MaintenanceHarness};
use dht_core::config::DhtConfig;
use dht_core::identity::Id;
use dht_core::maintenance::handle_trail_setup;
use dht_core::routing::RoutingTable;
use dht_core::stats::StatEvent;
use dht_core::wire::{Message, TrailSetupBody};
use std::time::Instant;

fn target_prefix(n: u8) -> u64 {
    (n as u64) << 56
}

#[test]
fn friend_at_through_threshold_is_rejected_and_the_rejection_congests_it_upstream() {
    let p = pid(1);
    let f = pid(2); // arrived_from: the friend that sent TRAIL_SETUP to P
    let succ = pid(3); // P's finger-table successor, closer to the target than P

    let mut config = DhtConfig::finger_table();
    config.through_threshold = 1;
    let mut harness_p = MaintenanceHarness::new(p, config.clone());
    harness_p.friends.on_connect(f);
    harness_p.friends.inc_trails_through(&f);
    if let RoutingTable::FingerTable(table) = &mut harness_p.routing {
        table.compare_and_update_successor(succ, Id::ZERO, vec![]);
    }

    let target_value = target_prefix(3);
    let body = TrailSetupBody {
        is_predecessor: false,
        final_destination_finger_value: target_value,
        source: f,
        best_known_destination: p,
        intermediate_trail_id: Id::ZERO,
        trail_id: Id::ZERO,
        trail_so_far: vec![f],
    };
    let now = Instant::now();
    let outcome = handle_trail_setup(&mut harness_p.state(p), body, f, now);

    assert_eq!(outcome.frames.len(), 1);
    let (to, frame) = outcome.frames[0].clone();
    assert_eq!(to, f);
    assert_eq!(harness_p.stats.get(StatEvent::TrailSetupRejected), 1);

    let rejection = match Message::decode(frame).unwrap() {
        Message::TrailSetupRejection(body) => body,
        other => panic!("expected TrailSetupRejection, got {other:?}"),
    };
    assert_eq!(rejection.congested_peer, p);
    assert_eq!(rejection.source, f);
    assert_eq!(rejection.congestion_time_ms, config.congestion_timeout.as_millis() as u64);
    assert_eq!(rejection.trail_so_far, vec![f]);

    // F receives its own rejection frame back from P and must mark P
    // congested in its own friend table, so it avoids routing through P
    // again until the congestion window named in the rejection elapses.
    let mut harness_f = MaintenanceHarness::new(f, config);
    harness_f.friends.on_connect(p);
    dht_core::maintenance::handle_trail_setup_rejection(&mut harness_f.state(f), rejection, p, now);
    assert!(harness_f.friends.get(&p).unwrap().is_congested(now));
}
