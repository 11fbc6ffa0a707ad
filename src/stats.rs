//! Statistics collaborator: every "bump a counter" point called out across
//! §4/§5/§7/§9 (drops, rejections, splices, replacements, maintenance
//! firings) goes through this narrow trait rather than each module reaching
//! for a global. `CountingStatsSink` is a plain-atomics reference
//! implementation in the style of the teacher's `NetworkMetrics`.

use std::sync::atomic::{AtomicU64, Ordering};

/// One statistics event the core reports. Kept as an enum rather than a
/// free-form string key so call sites can't typo a counter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// A message was dropped for being malformed (§7).
    DroppedMalformed,
    /// A message was dropped for failing its type-specific integrity check.
    DroppedUnauthenticated,
    /// A message was dropped for exceeding `MAX_HOPS`.
    DroppedTtlExceeded,
    /// A message was dropped for lacking any uncongested route.
    DroppedNoRoute,
    /// A message referenced a trail_id this peer has no row for.
    DroppedTrailUnknown,
    /// A routed path was spliced at an earlier self-occurrence (§8 law).
    PathSpliced,
    /// A TRAIL_SETUP was rejected for congestion.
    TrailSetupRejected,
    /// A friend's outbound queue dropped a frame for being full.
    FriendQueueDropped,
    /// A Kademlia bucket admission evicted or replaced its oldest entry.
    BucketReplacement,
    /// A finger-table slot's trail set evicted its longest trail.
    FingerTrailReplacement,
    /// A maintenance timer fired (DISCOVERY, find_finger, verify_successor,
    /// ...); counted in aggregate, not per-timer-kind.
    MaintenanceTick,
    /// A friend disconnect triggered trail/finger cleanup.
    DisconnectCascade,
    /// A cache PUT stored a new block.
    CachePut,
    /// A cache GET matched at least one stored block.
    CacheHit,
    /// A cache GET matched nothing.
    CacheMiss,
}

/// Narrow interface to whatever aggregates/exports counters. Calls must be
/// cheap and non-blocking; this is invoked from the single event-loop task.
pub trait StatsSink: Send {
    /// Record one occurrence of `event`.
    fn bump(&self, event: StatEvent);
}

/// In-memory atomic counters, one per [`StatEvent`] variant, safe to share
/// behind an `Arc` without additional locking.
#[derive(Default)]
pub struct CountingStatsSink {
    dropped_malformed: AtomicU64,
    dropped_unauthenticated: AtomicU64,
    dropped_ttl_exceeded: AtomicU64,
    dropped_no_route: AtomicU64,
    dropped_trail_unknown: AtomicU64,
    path_spliced: AtomicU64,
    trail_setup_rejected: AtomicU64,
    friend_queue_dropped: AtomicU64,
    bucket_replacement: AtomicU64,
    finger_trail_replacement: AtomicU64,
    maintenance_tick: AtomicU64,
    disconnect_cascade: AtomicU64,
    cache_put: AtomicU64,
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
}

impl CountingStatsSink {
    /// All counters start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, event: StatEvent) -> &AtomicU64 {
        match event {
            StatEvent::DroppedMalformed => &self.dropped_malformed,
            StatEvent::DroppedUnauthenticated => &self.dropped_unauthenticated,
            StatEvent::DroppedTtlExceeded => &self.dropped_ttl_exceeded,
            StatEvent::DroppedNoRoute => &self.dropped_no_route,
            StatEvent::DroppedTrailUnknown => &self.dropped_trail_unknown,
            StatEvent::PathSpliced => &self.path_spliced,
            StatEvent::TrailSetupRejected => &self.trail_setup_rejected,
            StatEvent::FriendQueueDropped => &self.friend_queue_dropped,
            StatEvent::BucketReplacement => &self.bucket_replacement,
            StatEvent::FingerTrailReplacement => &self.finger_trail_replacement,
            StatEvent::MaintenanceTick => &self.maintenance_tick,
            StatEvent::DisconnectCascade => &self.disconnect_cascade,
            StatEvent::CachePut => &self.cache_put,
            StatEvent::CacheHit => &self.cache_hit,
            StatEvent::CacheMiss => &self.cache_miss,
        }
    }

    /// Current value of one counter, for tests/diagnostics.
    pub fn get(&self, event: StatEvent) -> u64 {
        self.counter(event).load(Ordering::Relaxed)
    }
}

impl StatsSink for CountingStatsSink {
    fn bump(&self, event: StatEvent) {
        self.counter(event).fetch_add(1, Ordering::Relaxed);
    }
}

/// A sink that discards every event, for callers that don't care (e.g. unit
/// tests of modules that take a `&dyn StatsSink` only incidentally).
pub struct NullStatsSink;

impl StatsSink for NullStatsSink {
    fn bump(&self, _event: StatEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let sink = CountingStatsSink::new();
        assert_eq!(sink.get(StatEvent::CacheHit), 0);
    }

    #[test]
    fn bump_increments_only_the_named_counter() {
        let sink = CountingStatsSink::new();
        sink.bump(StatEvent::CacheHit);
        sink.bump(StatEvent::CacheHit);
        sink.bump(StatEvent::CacheMiss);
        assert_eq!(sink.get(StatEvent::CacheHit), 2);
        assert_eq!(sink.get(StatEvent::CacheMiss), 1);
        assert_eq!(sink.get(StatEvent::PathSpliced), 0);
    }

    #[test]
    fn null_sink_never_panics() {
        let sink = NullStatsSink;
        sink.bump(StatEvent::DroppedMalformed);
    }
}
