//! Tunables (§4.9, §6, §9) gathered into one configuration struct, with
//! defaults lifted from the source's `#define`s (`gnunet-service-dht.c`,
//! `gnunet-service-xdht_neighbours.c`) per spec.md §9's "Open questions"
//! resolutions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which DHT variant this instance runs. The two coexist in the source but
/// not within a single running peer (spec.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingVariant {
    /// Kademlia-style XOR-distance overlay ("R5N").
    Kademlia,
    /// X-Vine finger-table overlay with multi-hop trails.
    FingerTable,
}

/// `closer_only_policy(hops)` shape (§4.3): how the probability of
/// "forward only to a strictly closer peer" scales with hop count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloserOnlyPolicy {
    /// `hops / MAX_HOPS`.
    Linear,
    /// `sqrt(hops) / sqrt(MAX_HOPS)`.
    Sqrt,
}

/// Evaluation-only malicious behaviors (§4.9); never engaged unless
/// explicitly configured, and independent of the error-handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaliciousMode {
    /// Normal, honest operation.
    #[default]
    None,
    /// Silently drop every PUT/GET instead of routing it.
    DropAll,
    /// Periodically emit a GET for a random key in addition to normal
    /// operation.
    PeriodicRandomGet,
    /// Periodically emit a PUT for a random key in addition to normal
    /// operation.
    PeriodicRandomPut,
}

/// All tunables for one DHT instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Which variant this instance runs.
    pub variant: RoutingVariant,
    /// Kademlia bucket size (`K`).
    pub bucket_size: usize,
    /// Number of finger slots, not counting the predecessor slot (`N`,
    /// `MAX_FINGERS` in the source).
    pub finger_count: usize,
    /// Hard cap on hop_count (`MAX_HOPS`).
    pub max_hops: u32,
    /// Default replication factor for PUT/GET (`DHT_KADEMLIA_REPLICATION`).
    pub replication: u32,
    /// Max concurrent trails for which a friend can be the first hop
    /// (`THROUGH_THRESHOLD`).
    pub through_threshold: u32,
    /// Per-friend outbound queue cap (`MAXIMUM_PENDING_PER_FRIEND`).
    pub max_queued_per_friend: u32,
    /// How long a congested peer remains marked congested
    /// (`CONGESTION_TIMEOUT`).
    pub congestion_timeout: Duration,
    /// Max trails stored per finger (`MAX_TRAILS_PER_FINGER`).
    pub max_trails_per_finger: usize,
    /// Bound on the pending/recent-request cache (`MAX_RECENT`).
    pub max_recent: usize,
    /// Policy used to decide closer-only vs. weighted-random forwarding.
    pub closer_only_policy: CloserOnlyPolicy,
    /// Whether `select_for_route` restricts to strictly-closer-than-self
    /// peers once `closer_only_policy` fires, vs. weighted random sampling.
    pub strict_kademlia_forwarding: bool,
    /// Kademlia maintenance cadence (`MAINTAIN_FREQUENCY`).
    pub maintain_frequency: Duration,
    /// Cap on peer IDs advertised per DISCOVERY (`MAINTAIN_ADV_CAP`).
    pub maintain_adv_cap: usize,
    /// How long a peer may stay silent before being expired
    /// (`MAINTAIN_PEER_TIMEOUT`).
    pub maintain_peer_timeout: Duration,
    /// Finger-table discovery cadence (`DHT_FIND_FINGER_TRAIL_INTERVAL`).
    pub find_finger_interval: Duration,
    /// Successor-liveness probe cadence
    /// (`DHT_SEND_VERIFY_SUCCESSOR_INTERVAL`).
    pub verify_successor_interval: Duration,
    /// Retry cadence if a VERIFY_SUCCESSOR_RESULT never arrives
    /// (`DHT_SEND_VERIFY_SUCCESSOR_RETRY_INTERVAL`).
    pub verify_successor_retry_interval: Duration,
    /// Retry cadence for an unconfirmed NOTIFY_NEW_SUCCESSOR
    /// (`DHT_SEND_NOTIFY_SUCCESSOR_RETRY_INTERVAL`).
    pub notify_successor_retry_interval: Duration,
    /// Evaluation-only behavior; off in production.
    pub malicious_mode: MaliciousMode,
}

impl Default for DhtConfig {
    fn default() -> Self {
        DhtConfig {
            variant: RoutingVariant::Kademlia,
            bucket_size: 8,
            finger_count: 64,
            max_hops: 10,
            replication: 3,
            through_threshold: 16,
            max_queued_per_friend: 32,
            congestion_timeout: Duration::from_secs(120),
            max_trails_per_finger: 3,
            max_recent: 1000,
            closer_only_policy: CloserOnlyPolicy::Linear,
            strict_kademlia_forwarding: false,
            maintain_frequency: Duration::from_secs(30),
            maintain_adv_cap: 8,
            maintain_peer_timeout: Duration::from_secs(5 * 60),
            find_finger_interval: Duration::from_secs(2),
            verify_successor_interval: Duration::from_secs(2),
            verify_successor_retry_interval: Duration::from_secs(30),
            notify_successor_retry_interval: Duration::from_secs(30),
            malicious_mode: MaliciousMode::None,
        }
    }
}

impl DhtConfig {
    /// Convenience constructor for the finger-table variant with otherwise
    /// default tunables.
    pub fn finger_table() -> Self {
        DhtConfig {
            variant: RoutingVariant::FingerTable,
            ..Default::default()
        }
    }

    /// `MAINTAIN_CHANCE`'s active formula per spec.md §9's anomaly note:
    /// `10 + 100 * total_peers`, not the commented-out `1 + total_peers`.
    pub fn maintain_chance(total_peers: usize) -> u64 {
        10 + 100 * total_peers as u64
    }
}
