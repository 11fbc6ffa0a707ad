//! Shared harness for integration tests that exercise the router and
//! maintenance handlers directly, the same pattern each module's own
//! `#[cfg(test)]` harness uses, just rebuilt here since those are private to
//! their module.

use dht_core::cache::InMemoryDatastore;
use dht_core::client::{ChannelClientSink, ClientResult};
use dht_core::config::DhtConfig;
use dht_core::friend::FriendTable;
use dht_core::identity::{PeerId, ID_BYTES};
use dht_core::maintenance::{FingerSearchCursor, LivenessTracker, MaintenanceState};
use dht_core::pending::PendingRequestStore;
use dht_core::router::RouterState;
use dht_core::routing::RoutingTable;
use dht_core::stats::CountingStatsSink;
use dht_core::trail::TrailStore;
use tokio::sync::mpsc::UnboundedReceiver;

#[allow(dead_code)]
pub fn pid(n: u8) -> PeerId {
    let mut bytes = [0u8; ID_BYTES];
    bytes[0] = n;
    PeerId::from_bytes(bytes)
}

/// Borrows for one `router.rs` call, reassembled fresh every time since
/// `RouterState` only borrows for the duration of the call it's passed to.
#[allow(dead_code)]
pub struct RouterHarness {
    pub config: DhtConfig,
    pub friends: FriendTable,
    pub routing: RoutingTable,
    pub trails: TrailStore,
    pub pending: PendingRequestStore,
    pub datastore: InMemoryDatastore,
    pub client: ChannelClientSink,
    pub stats: CountingStatsSink,
}

#[allow(dead_code)]
impl RouterHarness {
    pub fn new(self_id: PeerId, config: DhtConfig) -> (Self, UnboundedReceiver<ClientResult>) {
        let routing = RoutingTable::new(self_id, &config);
        let (client, rx) = ChannelClientSink::new();
        (
            RouterHarness {
                friends: FriendTable::new(config.max_queued_per_friend as usize, config.through_threshold),
                routing,
                trails: TrailStore::new(),
                pending: PendingRequestStore::new(config.max_recent),
                datastore: InMemoryDatastore::new(64),
                client,
                stats: CountingStatsSink::new(),
                config,
            },
            rx,
        )
    }

    pub fn state(&mut self, self_id: PeerId) -> RouterState<'_> {
        RouterState {
            self_id,
            config: &self.config,
            friends: &mut self.friends,
            routing: &mut self.routing,
            trails: &mut self.trails,
            pending: &mut self.pending,
            datastore: &mut self.datastore,
            client: &self.client,
            stats: &self.stats,
        }
    }
}

#[allow(dead_code)]
pub struct MaintenanceHarness {
    pub config: DhtConfig,
    pub friends: FriendTable,
    pub routing: RoutingTable,
    pub trails: TrailStore,
    pub stats: CountingStatsSink,
    pub liveness: LivenessTracker,
    pub search: FingerSearchCursor,
}

#[allow(dead_code)]
impl MaintenanceHarness {
    pub fn new(self_id: PeerId, config: DhtConfig) -> Self {
        let routing = RoutingTable::new(self_id, &config);
        let search = FingerSearchCursor::new(config.finger_count);
        MaintenanceHarness {
            friends: FriendTable::new(config.max_queued_per_friend as usize, config.through_threshold),
            routing,
            trails: TrailStore::new(),
            stats: CountingStatsSink::new(),
            liveness: LivenessTracker::new(),
            search,
            config,
        }
    }

    pub fn state(&mut self, self_id: PeerId) -> MaintenanceState<'_> {
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
