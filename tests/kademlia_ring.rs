//! A three-peer Kademlia ring, A-B-C, with only the A-B and B-C friend edges
//! present (no direct A-C link). A PUT issued on A must land in B's cache
//! (B's id is the key, so B is unambiguously closest); a GET issued on C must
//! then retrieve that value by relaying through B, with the delivered
//! `get_path` recording the hop through B.

mod common;

use common::{pid, RouterHarness};
use dht_core::config::DhtConfig;
use dht_core::router::{client_get, client_put, handle_get_relayed, handle_put_relayed};
use dht_core::routing::RoutingTable;
use dht_core::wire::Message;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

#[test]
fn get_on_the_far_side_of_the_ring_retrieves_a_value_put_on_the_near_side() {
    let a = pid(1);
    let b = pid(2); // the PUT key: trivially closest to itself
    let c = pid(3);
    let key = b;
    let config = DhtConfig::default();
    let now = Instant::now();
    let mut rng = StdRng::seed_from_u64(1);

    let (mut harness_a, _results_a) = RouterHarness::new(a, config.clone());
    let (mut harness_b, _results_b) = RouterHarness::new(b, config.clone());
    let (mut harness_c, mut results_c) = RouterHarness::new(c, config.clone());

    if let RoutingTable::Kademlia(table) = &mut harness_a.routing {
        table.learn(b);
    }
    if let RoutingTable::Kademlia(table) = &mut harness_c.routing {
        table.learn(b);
    }
    // B's own routing table stays empty: with no known peers it is always
    // closest to anything (see `am_i_closest_true_when_alone`) and has no
    // forwarding candidates, so it neither forwards the PUT past itself nor
    // relays the GET anywhere but straight back to whichever friend asked.
    harness_a.friends.on_connect(b);
    harness_b.friends.on_connect(a);
    harness_b.friends.on_connect(c);
    harness_c.friends.on_connect(b);

    // A puts the value; B is closer to `key` than A so A forwards to B.
    let outbox = client_put(
        &mut harness_a.state(a),
        key,
        1,
        b"abc".to_vec(),
        now + Duration::from_secs(60),
        3,
        now,
    );
    assert_eq!(outbox.len(), 1);
    let (to, frame) = outbox[0].clone();
    assert_eq!(to, b);
    let put_body = match Message::decode(frame).unwrap() {
        Message::Put(body) => body,
        other => panic!("expected Put, got {other:?}"),
    };

    let outbox = handle_put_relayed(&mut harness_b.state(b), put_body, a, now, &mut rng)
        .expect("well under max_hops");
    assert!(outbox.is_empty(), "B is closest to its own id, nothing further to forward");

    let mut stored_path = Vec::new();
    harness_b.datastore.get(&key, 1, &mut |_, _, _, _, put_path| {
        stored_path = put_path.to_vec();
    });
    assert_eq!(stored_path, vec![a, b]);

    // C gets the value; B is closer to `key` than C so C forwards to B.
    let outbox = client_get(&mut harness_c.state(c), key, 1, 3, 42, now + Duration::from_secs(1));
    assert_eq!(outbox.len(), 1);
    let (to, frame) = outbox[0].clone();
    assert_eq!(to, b);
    let get_body = match Message::decode(frame).unwrap() {
        Message::Get(body) => body,
        other => panic!("expected Get, got {other:?}"),
    };
    assert_eq!(get_body.get_path, vec![c]);

    let outbox = handle_get_relayed(&mut harness_b.state(b), get_body, c, now + Duration::from_secs(1), &mut rng)
        .expect("well under max_hops");
    assert_eq!(outbox.len(), 1, "B answers directly, it holds the block");
    let (to, frame) = outbox[0].clone();
    assert_eq!(to, c);
    let result_body = match Message::decode(frame).unwrap() {
        Message::Result(body) => body,
        other => panic!("expected Result, got {other:?}"),
    };
    assert_eq!(result_body.get_path, vec![c, b]);
    assert_eq!(result_body.payload, b"abc".to_vec());

    dht_core::router::handle_result(&mut harness_c.state(c), result_body).expect("pending entry is present");

    let delivered = results_c.try_recv().expect("result delivered to the originating client");
    assert_eq!(delivered.request_id, 42);
    assert_eq!(delivered.key, key);
    assert_eq!(delivered.payload, b"abc".to_vec());
    assert_eq!(delivered.get_path, vec![c, b]);
}
