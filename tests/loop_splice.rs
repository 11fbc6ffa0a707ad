//! A PUT whose recorded path already contains the receiving peer is a loop;
//! `handle_put_relayed` must truncate the path at that earlier occurrence
//! (dropping everything from it onward) before appending itself, rather than
//! forwarding or storing the untouched, looping path.

mod common;

use common::{pid, RouterHarness};
use dht_core::config::DhtConfig;
use dht_core::identity::Id;
use dht_core::router::handle_put_relayed;
use dht_core::stats::StatEvent;
use dht_core::wire::PutBody;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

#[test]
fn put_path_containing_self_is_truncated_before_self_is_reappended() {
    let self_id = pid(1); // P
    let x = pid(2);
    let y = pid(3);
    let (mut harness, _results) = RouterHarness::new(self_id, DhtConfig::default());
    let now = Instant::now();
    let mut rng = StdRng::seed_from_u64(1);

    let body = PutBody {
        options: 0,
        block_type: 7,
        hop_count: 2,
        desired_replication: 3,
        best_known_destination: self_id,
        intermediate_trail_id: Id::ZERO,
        expiration_unix_ms: 60_000,
        key: self_id,
        put_path: vec![x, self_id, y, x],
        payload: b"abc".to_vec(),
    };

    let outbox = handle_put_relayed(&mut harness.state(self_id), body, x, now, &mut rng)
        .expect("well under max_hops");
    assert!(outbox.is_empty(), "self is closest to its own id, nothing to forward");
    assert_eq!(harness.stats.get(StatEvent::PathSpliced), 1);

    let mut stored_path = Vec::new();
    harness.datastore.get(&self_id, 7, &mut |_, _, _, _, put_path| {
        stored_path = put_path.to_vec();
    });
    assert_eq!(stored_path, vec![x, self_id]);
}

#[test]
fn put_path_without_self_passes_through_unspliced() {
    let self_id = pid(1);
    let x = pid(2);
    let (mut harness, _results) = RouterHarness::new(self_id, DhtConfig::default());
    let now = Instant::now();
    let mut rng = StdRng::seed_from_u64(1);

    let body = PutBody {
        options: 0,
        block_type: 7,
        hop_count: 0,
        desired_replication: 3,
        best_known_destination: self_id,
        intermediate_trail_id: Id::ZERO,
        expiration_unix_ms: 60_000,
        key: self_id,
        put_path: vec![x],
        payload: b"abc".to_vec(),
    };

    handle_put_relayed(&mut harness.state(self_id), body, x, now + Duration::from_millis(1), &mut rng)
        .expect("well under max_hops");
    assert_eq!(harness.stats.get(StatEvent::PathSpliced), 0);

    let mut stored_path = Vec::new();
    harness.datastore.get(&self_id, 7, &mut |_, _, _, _, put_path| {
        stored_path = put_path.to_vec();
    });
    assert_eq!(stored_path, vec![x, self_id]);
}
