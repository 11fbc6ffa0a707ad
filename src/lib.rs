//! Kademlia (R5N) and X-Vine finger-table DHT core.
//!
//! This crate implements the routing table, trail subsystem, request
//! router, local cache, and maintenance loop for a peer-to-peer
//! distributed hash table, decoupled from transport and storage through
//! the [`Transport`] and [`Datastore`] traits. Embedders provide both,
//! plus a [`ClientSink`] to receive GET results, and drive everything
//! through [`DhtActor`]/[`DhtHandle`].

pub mod actor;
pub mod bloom;
pub mod bucket;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod finger;
pub mod friend;
pub mod identity;
pub mod maintenance;
pub mod pending;
pub mod router;
pub mod routing;
pub mod stats;
pub mod trail;
pub mod transport;
pub mod wire;

pub use actor::{DhtActor, DhtEvent, DhtHandle};
pub use cache::{CachedBlock, Datastore, InMemoryDatastore};
pub use client::{ChannelClientSink, ClientResult, ClientSink};
pub use config::{CloserOnlyPolicy, DhtConfig, MaliciousMode, RoutingVariant};
pub use error::DhtError;
pub use identity::{Id, Key, PeerId};
pub use pending::RequestId;
pub use stats::{CountingStatsSink, NullStatsSink, StatEvent, StatsSink};
pub use transport::{FriendHandle, InMemoryTransport, Transport, TransportEvent};
