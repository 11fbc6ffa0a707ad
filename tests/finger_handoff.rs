//! A full successor handoff: B verifies its successor C, C reports a better
//! predecessor D, B adopts D as its new successor and notifies it, and D in
//! turn records B as its predecessor and confirms. Each step is driven
//! through a separate peer's own `MaintenanceState`, wiring the frame one
//! hop produces straight into the next hop's handler (no transport).

mod common;

use common::{pid, MaintenanceHarness};
use dht_core::config::DhtConfig;
use dht_core::finger::FingerSlot;
use dht_core::identity::Id;
use dht_core::maintenance::{
    handle_notify_new_successor, handle_verify_successor, handle_verify_successor_result,
    verify_successor_tick,
};
use dht_core::routing::RoutingTable;
use dht_core::wire::Message;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

#[test]
fn verify_successor_round_trip_hands_off_to_a_closer_successor() {
    // Same self/candidate identities as finger.rs's own
    // `successor_replacement_updates_slot_zero` unit test, so the XOR-
    // closeness comparison favoring D over C is already known-good.
    let b = pid(0);
    let c = pid(5);
    let d = pid(1);
    let config = DhtConfig::finger_table();
    let now = Instant::now();
    let mut rng = StdRng::seed_from_u64(1);

    let mut harness_b = MaintenanceHarness::new(b, config.clone());
    if let RoutingTable::FingerTable(table) = &mut harness_b.routing {
        table.compare_and_update_successor(c, Id::ZERO, vec![]);
    }
    harness_b.friends.on_connect(c);

    // Step 1: B's periodic tick asks its successor to verify itself.
    let outcome1 = verify_successor_tick(&mut harness_b.state(b), now);
    assert_eq!(outcome1.frames.len(), 1);
    assert_eq!(outcome1.frames[0].0, c);
    let verify_body = match Message::decode(outcome1.frames[0].1.clone()).unwrap() {
        Message::VerifySuccessor(body) => body,
        other => panic!("expected VerifySuccessor, got {other:?}"),
    };
    assert_eq!(verify_body.source, b);
    assert_eq!(verify_body.successor, c);

    // Step 2: C answers with its own predecessor, D.
    let mut harness_c = MaintenanceHarness::new(c, config.clone());
    if let RoutingTable::FingerTable(table) = &mut harness_c.routing {
        table.compare_and_update_predecessor(d, Id::ZERO, vec![]);
    }
    let outcome2 = handle_verify_successor(&mut harness_c.state(c), verify_body, b);
    assert_eq!(outcome2.frames.len(), 1);
    assert_eq!(outcome2.frames[0].0, b);
    let result_body = match Message::decode(outcome2.frames[0].1.clone()).unwrap() {
        Message::VerifySuccessorResult(body) => body,
        other => panic!("expected VerifySuccessorResult, got {other:?}"),
    };
    assert_eq!(result_body.probable_successor, d);
    assert_eq!(result_body.current_successor, c);

    // Step 3: B adopts D as its successor and notifies it.
    let outcome3 = handle_verify_successor_result(&mut harness_b.state(b), result_body, &mut rng);
    if let RoutingTable::FingerTable(table) = &harness_b.routing {
        assert_eq!(table.successor().unwrap().identity, d);
    }
    assert_eq!(outcome3.frames.len(), 1);
    assert_eq!(outcome3.frames[0].0, d);
    let notify_body = match Message::decode(outcome3.frames[0].1.clone()).unwrap() {
        Message::NotifyNewSuccessor(body) => body,
        other => panic!("expected NotifyNewSuccessor, got {other:?}"),
    };
    assert_eq!(notify_body.source, b);
    assert_eq!(notify_body.new_successor, d);

    // Step 4: D records B as its predecessor and confirms back to B.
    let mut harness_d = MaintenanceHarness::new(d, config);
    let outcome4 = handle_notify_new_successor(&mut harness_d.state(d), notify_body, b);
    if let RoutingTable::FingerTable(table) = &harness_d.routing {
        assert_eq!(table.get(FingerSlot::Predecessor).unwrap().identity, b);
    }
    assert_eq!(outcome4.frames.len(), 1);
    assert_eq!(outcome4.frames[0].0, b);
    match Message::decode(outcome4.frames[0].1.clone()).unwrap() {
        Message::NotifySuccessorConfirmation(_) => {}
        other => panic!("expected NotifySuccessorConfirmation, got {other:?}"),
    }
}
