//! Event loop: the one task that owns every table this crate defines and
//! the only caller of `Transport::connect`/`disconnect`/`send`. Mirrors the
//! teacher's `P2PNode`/`P2PHandle` split — `DhtHandle` is the cheap,
//! `Clone`, `Send` facade application code actually holds; `DhtActor::run`
//! is the `tokio::select!` loop nothing outside this module drives
//! directly. Every handler elsewhere in this crate (`router.rs`,
//! `maintenance.rs`) returns frames to send rather than touching the
//! transport itself; this is where those frames actually go out.

use crate::cache::Datastore;
use crate::client::ClientSink;
use crate::config::DhtConfig;
use crate::identity::{Key, PeerId};
use crate::maintenance::{self, FingerSearchCursor, LivenessTracker, MaintenanceOutcome, MaintenanceState};
use crate::pending::{PendingRequestStore, RequestId};
use crate::router::{self, Outbox, RouterState};
use crate::routing::RoutingTable;
use crate::stats::{StatEvent, StatsSink};
use crate::trail::TrailStore;
use crate::transport::{Transport, TransportEvent};
use crate::wire::Message;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Connectivity events surfaced to observers. Result delivery for GETs goes
/// through `ClientSink` instead of this channel; there is no "put failed"
/// or "get failed" variant here, matching §7's no-negative-ack contract.
#[derive(Debug, Clone)]
pub enum DhtEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
}

/// Requests `DhtHandle` posts into the event loop. Every variant is a
/// fire-and-forget send; nothing here carries a response channel, since
/// none of §6.4's operations are meant to block the caller.
enum DhtCommand {
    Put {
        key: Key,
        block_type: u32,
        payload: Vec<u8>,
        ttl: Duration,
        replication: u32,
    },
    Get {
        key: Key,
        block_type: u32,
        replication: u32,
        request_id: RequestId,
    },
    Stop {
        request_id: RequestId,
    },
    Connect {
        peer: PeerId,
    },
    Disconnect {
        peer: PeerId,
    },
    Shutdown,
}

/// Application-facing handle (§6.4). Cheap to clone; every method just
/// posts a command and returns immediately.
#[derive(Clone)]
pub struct DhtHandle {
    command_tx: mpsc::UnboundedSender<DhtCommand>,
    next_request_id: Arc<AtomicU64>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<DhtEvent>>>,
}

impl DhtHandle {
    /// `client_put` (§6.4): fire-and-forget, `ttl` counted from when the
    /// event loop actually processes the command rather than from now.
    pub fn client_put(&self, key: Key, block_type: u32, payload: Vec<u8>, ttl: Duration, replication: u32) {
        let _ = self.command_tx.send(DhtCommand::Put {
            key,
            block_type,
            payload,
            ttl,
            replication,
        });
    }

    /// `client_get` (§6.4): returns the request id immediately; the result
    /// itself arrives later via the `ClientSink` the actor was built with.
    pub fn client_get(&self, key: Key, block_type: u32, replication: u32) -> RequestId {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.command_tx.send(DhtCommand::Get {
            key,
            block_type,
            replication,
            request_id,
        });
        request_id
    }

    /// `client_stop` (§6.4): the caller no longer cares about `request_id`.
    pub fn client_stop(&self, request_id: RequestId) {
        let _ = self.command_tx.send(DhtCommand::Stop { request_id });
    }

    /// Ask the transport to establish a friend connection. Not part of
    /// §6.4; exposed so embedders can bootstrap a network without reaching
    /// into the transport directly.
    pub fn connect(&self, peer: PeerId) {
        let _ = self.command_tx.send(DhtCommand::Connect { peer });
    }

    pub fn disconnect(&self, peer: PeerId) {
        let _ = self.command_tx.send(DhtCommand::Disconnect { peer });
    }

    /// Stop the event loop. In-flight commands already queued ahead of this
    /// one still run first.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(DhtCommand::Shutdown);
    }

    /// Next connectivity event, or `None` once the actor has exited.
    pub async fn next_event(&self) -> Option<DhtEvent> {
        self.event_rx.lock().await.recv().await
    }
}

/// Owns every table C1-C9 define, plus the transport, for the lifetime of
/// one running peer.
pub struct DhtActor<T: Transport> {
    self_id: PeerId,
    config: DhtConfig,
    transport: T,
    friends: crate::friend::FriendTable,
    routing: RoutingTable,
    trails: TrailStore,
    pending: PendingRequestStore,
    datastore: Box<dyn Datastore>,
    client: Box<dyn ClientSink>,
    stats: Arc<dyn StatsSink>,
    liveness: LivenessTracker,
    search: FingerSearchCursor,
    active_gets: HashMap<RequestId, (Key, u32)>,
    rng: StdRng,
    find_finger_ticks_since_fire: u32,
    command_rx: mpsc::UnboundedReceiver<DhtCommand>,
    event_tx: mpsc::UnboundedSender<DhtEvent>,
}

impl<T: Transport> DhtActor<T> {
    /// Build an actor and the handle application code drives it through.
    /// `self_id` is whatever `transport.local_identity()` reports.
    pub fn new(
        config: DhtConfig,
        transport: T,
        datastore: Box<dyn Datastore>,
        client: Box<dyn ClientSink>,
        stats: Arc<dyn StatsSink>,
    ) -> (Self, DhtHandle) {
        let self_id = transport.local_identity();
        let routing = RoutingTable::new(self_id, &config);
        let search = FingerSearchCursor::new(config.finger_count);
        let friends = crate::friend::FriendTable::new(config.max_queued_per_friend as usize, config.through_threshold);
        let pending = PendingRequestStore::new(config.max_recent);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = DhtActor {
            self_id,
            config,
            transport,
            friends,
            routing,
            trails: TrailStore::new(),
            pending,
            datastore,
            client,
            stats,
            liveness: LivenessTracker::new(),
            search,
            active_gets: HashMap::new(),
            rng: StdRng::from_entropy(),
            find_finger_ticks_since_fire: 0,
            command_rx,
            event_tx,
        };

        let handle = DhtHandle {
            command_tx,
            next_request_id: Arc::new(AtomicU64::new(1)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        };
        (actor, handle)
    }

    fn transmit(&mut self, frames: Vec<Outbox>) {
        for (to, frame) in frames {
            self.transport.send(&to, frame);
        }
    }

    fn process_connect_requests(&mut self, requests: Vec<PeerId>) {
        for peer in requests {
            self.transport.connect(peer);
            self.friends.on_connect(peer);
        }
    }

    fn apply_outcome(&mut self, outcome: MaintenanceOutcome) {
        self.transmit(outcome.frames);
        self.process_connect_requests(outcome.connect_requests);
    }

    /// Drive the event loop until `shutdown()` is called, the command
    /// channel's last handle is dropped, or the transport closes.
    pub async fn run(mut self) {
        let mut discovery_timer = tokio::time::interval(self.config.maintain_frequency);
        discovery_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut find_finger_timer = tokio::time::interval(self.config.find_finger_interval);
        find_finger_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut verify_successor_timer = tokio::time::interval(self.config.verify_successor_interval);
        verify_successor_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut peer_timeout_timer =
            tokio::time::interval((self.config.maintain_peer_timeout / 2).max(Duration::from_secs(1)));
        peer_timeout_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(DhtCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => self.handle_transport_event(ev),
                        None => break,
                    }
                }
                _ = discovery_timer.tick() => self.run_discovery_tick(),
                _ = find_finger_timer.tick() => self.run_find_finger_tick(),
                _ = verify_successor_timer.tick() => self.run_verify_successor_tick(),
                _ = peer_timeout_timer.tick() => self.run_peer_timeout_tick(),
            }
        }
        debug!(peer = %self.self_id, "event loop exiting");
    }

    fn handle_command(&mut self, command: DhtCommand) {
        match command {
            DhtCommand::Put {
                key,
                block_type,
                payload,
                ttl,
                replication,
            } => {
                let now = Instant::now();
                let expiration = now + ttl;
                let frames = {
                    let mut state = RouterState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        pending: &mut self.pending,
                        datastore: self.datastore.as_mut(),
                        client: self.client.as_ref(),
                        stats: self.stats.as_ref(),
                    };
                    router::client_put(&mut state, key, block_type, payload, expiration, replication, now)
                };
                self.transmit(frames);
            }
            DhtCommand::Get {
                key,
                block_type,
                replication,
                request_id,
            } => {
                self.active_gets.insert(request_id, (key, block_type));
                let now = Instant::now();
                let frames = {
                    let mut state = RouterState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        pending: &mut self.pending,
                        datastore: self.datastore.as_mut(),
                        client: self.client.as_ref(),
                        stats: self.stats.as_ref(),
                    };
                    router::client_get(&mut state, key, block_type, replication, request_id, now)
                };
                self.transmit(frames);
            }
            DhtCommand::Stop { request_id } => {
                if let Some((key, block_type)) = self.active_gets.remove(&request_id) {
                    let pending_key = router::derive_query_id(&key, block_type, &self.self_id);
                    self.pending.remove(&key, pending_key);
                }
            }
            DhtCommand::Connect { peer } => {
                self.transport.connect(peer);
                self.friends.on_connect(peer);
            }
            DhtCommand::Disconnect { peer } => {
                self.transport.disconnect(&peer);
            }
            DhtCommand::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => {
                self.liveness.touch(peer, Instant::now());
                self.friends.on_connect(peer);
                if let RoutingTable::Kademlia(table) = &mut self.routing {
                    table.learn(peer);
                }
                let _ = self.event_tx.send(DhtEvent::PeerConnected(peer));
            }
            TransportEvent::PeerDisconnected(peer) => {
                {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::on_disconnect(&mut state, &peer);
                }
                let _ = self.event_tx.send(DhtEvent::PeerDisconnected(peer));
            }
            TransportEvent::FrameReceived(from, bytes) => {
                self.liveness.touch(from, Instant::now());
                self.handle_frame(from, bytes);
            }
        }
    }

    /// Decode one frame and dispatch it to the router or maintenance
    /// collaborator that owns its message type.
    fn handle_frame(&mut self, arrived_from: PeerId, bytes: bytes::Bytes) {
        let message = match Message::decode(bytes) {
            Ok(m) => m,
            Err(err) => {
                trace!(peer = %arrived_from, error = %err, "dropping undecodable frame");
                return;
            }
        };
        let now = Instant::now();
        match message {
            Message::Put(body) => {
                let frames = {
                    let mut state = RouterState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        pending: &mut self.pending,
                        datastore: self.datastore.as_mut(),
                        client: self.client.as_ref(),
                        stats: self.stats.as_ref(),
                    };
                    router::handle_put_relayed(&mut state, body, arrived_from, now, &mut self.rng)
                };
                if let Ok(frames) = frames {
                    self.transmit(frames);
                }
            }
            Message::Get(body) => {
                let frames = {
                    let mut state = RouterState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        pending: &mut self.pending,
                        datastore: self.datastore.as_mut(),
                        client: self.client.as_ref(),
                        stats: self.stats.as_ref(),
                    };
                    router::handle_get_relayed(&mut state, body, arrived_from, now, &mut self.rng)
                };
                if let Ok(frames) = frames {
                    self.transmit(frames);
                }
            }
            Message::Result(body) => {
                let frames = {
                    let mut state = RouterState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        pending: &mut self.pending,
                        datastore: self.datastore.as_mut(),
                        client: self.client.as_ref(),
                        stats: self.stats.as_ref(),
                    };
                    router::handle_result(&mut state, body)
                };
                if let Ok(frames) = frames {
                    self.transmit(frames);
                }
            }
            Message::Discovery(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_discovery(&mut state, arrived_from, body.peers)
                };
                self.apply_outcome(outcome);
            }
            Message::AskHello(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_ask_hello(&mut state, body)
                };
                self.apply_outcome(outcome);
            }
            Message::TrailSetup(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_trail_setup(&mut state, body, arrived_from, now)
                };
                self.apply_outcome(outcome);
            }
            Message::TrailSetupResult(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_trail_setup_result(&mut state, body, arrived_from)
                };
                self.apply_outcome(outcome);
            }
            Message::TrailSetupRejection(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_trail_setup_rejection(&mut state, body, arrived_from, now)
                };
                self.apply_outcome(outcome);
            }
            Message::VerifySuccessor(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_verify_successor(&mut state, body, arrived_from)
                };
                self.apply_outcome(outcome);
            }
            Message::VerifySuccessorResult(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_verify_successor_result(&mut state, body, &mut self.rng)
                };
                self.apply_outcome(outcome);
            }
            Message::NotifyNewSuccessor(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_notify_new_successor(&mut state, body, arrived_from)
                };
                self.apply_outcome(outcome);
            }
            // No retry bookkeeping is kept for unconfirmed NOTIFY_NEW_SUCCESSOR
            // (see DESIGN.md); the confirmation itself carries nothing further
            // to act on.
            Message::NotifySuccessorConfirmation(_) => {}
            Message::TrailTeardown(body) => {
                let outcome = {
                    let mut state = MaintenanceState {
                        self_id: self.self_id,
                        config: &self.config,
                        friends: &mut self.friends,
                        routing: &mut self.routing,
                        trails: &mut self.trails,
                        stats: self.stats.as_ref(),
                        liveness: &mut self.liveness,
                        search: &mut self.search,
                    };
                    maintenance::handle_trail_teardown(&mut state, body)
                };
                self.apply_outcome(outcome);
            }
            // Trail compression is out of scope (see DESIGN.md); drop and
            // count rather than silently ignoring a known wire type.
            Message::AddTrail(_) => {
                self.stats.bump(StatEvent::DroppedMalformed);
            }
        }
    }

    fn run_discovery_tick(&mut self) {
        let now = Instant::now();
        let outcome = {
            let mut state = MaintenanceState {
                self_id: self.self_id,
                config: &self.config,
                friends: &mut self.friends,
                routing: &mut self.routing,
                trails: &mut self.trails,
                stats: self.stats.as_ref(),
                liveness: &mut self.liveness,
                search: &mut self.search,
            };
            maintenance::kademlia_discovery_tick(&mut state, now, &mut self.rng)
        };
        self.apply_outcome(outcome);
    }

    /// Backoff-scaled finger discovery: only actually fires once
    /// `FingerSearchCursor::backoff_factor()` base ticks have elapsed since
    /// the last firing, so an idle table searches less aggressively.
    fn run_find_finger_tick(&mut self) {
        self.find_finger_ticks_since_fire += 1;
        if self.find_finger_ticks_since_fire < self.search.backoff_factor() {
            return;
        }
        self.find_finger_ticks_since_fire = 0;
        let now = Instant::now();
        let outcome = {
            let mut state = MaintenanceState {
                self_id: self.self_id,
                config: &self.config,
                friends: &mut self.friends,
                routing: &mut self.routing,
                trails: &mut self.trails,
                stats: self.stats.as_ref(),
                liveness: &mut self.liveness,
                search: &mut self.search,
            };
            maintenance::find_finger_tick(&mut state, now, &mut self.rng)
        };
        self.apply_outcome(outcome);
    }

    fn run_verify_successor_tick(&mut self) {
        let now = Instant::now();
        let outcome = {
            let mut state = MaintenanceState {
                self_id: self.self_id,
                config: &self.config,
                friends: &mut self.friends,
                routing: &mut self.routing,
                trails: &mut self.trails,
                stats: self.stats.as_ref(),
                liveness: &mut self.liveness,
                search: &mut self.search,
            };
            maintenance::verify_successor_tick(&mut state, now)
        };
        self.apply_outcome(outcome);
    }

    fn run_peer_timeout_tick(&mut self) {
        let now = Instant::now();
        let expired = {
            let mut state = MaintenanceState {
                self_id: self.self_id,
                config: &self.config,
                friends: &mut self.friends,
                routing: &mut self.routing,
                trails: &mut self.trails,
                stats: self.stats.as_ref(),
                liveness: &mut self.liveness,
                search: &mut self.search,
            };
            maintenance::expire_silent_peers(&mut state, now)
        };
        for peer in expired {
            self.transport.disconnect(&peer);
            {
                let mut state = MaintenanceState {
                    self_id: self.self_id,
                    config: &self.config,
                    friends: &mut self.friends,
                    routing: &mut self.routing,
                    trails: &mut self.trails,
                    stats: self.stats.as_ref(),
                    liveness: &mut self.liveness,
                    search: &mut self.search,
                };
                maintenance::on_disconnect(&mut state, &peer);
            }
            let _ = self.event_tx.send(DhtEvent::PeerDisconnected(peer));
        }
    }
}
