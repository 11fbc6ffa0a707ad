//! Transport collaborator (§6.2): the core never opens a socket itself. It
//! asks this trait to connect/disconnect/send, and is in turn driven by
//! whatever the transport reports back as `DhtEvent::PeerConnected` /
//! `PeerDisconnected` / `FrameReceived` (see `actor.rs`). `InMemoryTransport`
//! is a reference implementation wiring a handful of in-process peers
//! together, used by tests and by nothing else.

use crate::identity::PeerId;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A friend handle. The source treats this as an opaque pointer; here it is
/// simply the peer's identity, since nothing below this trait needs a
/// separate handle type.
pub type FriendHandle = PeerId;

/// Narrow interface to whatever moves bytes between peers (§6.2).
/// Best-effort: `send` may drop on a full backlog and always returns
/// immediately, matching "no blocking send, no delivery receipts."
#[async_trait::async_trait]
pub trait Transport: Send {
    /// This instance's own identity, as the transport sees it.
    fn local_identity(&self) -> PeerId;

    /// Request a connection be established to `peer`, yielding the handle
    /// to address it by. Idempotent if already connected.
    fn connect(&mut self, peer: PeerId) -> FriendHandle;

    /// Request an established connection be torn down.
    fn disconnect(&mut self, peer: &PeerId);

    /// Best-effort send of a pre-framed message.
    fn send(&mut self, friend: &FriendHandle, frame: Bytes) -> bool;

    /// Next event to arrive (connect/disconnect/frame), or `None` once the
    /// transport is permanently closed. The event loop in `actor.rs` is the
    /// only caller.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// One event the transport reports back to the core's event loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new friend connected (either because we asked, or because it
    /// dialed us).
    PeerConnected(PeerId),
    /// A friend disconnected.
    PeerDisconnected(PeerId),
    /// A framed message arrived from a friend.
    FrameReceived(PeerId, Bytes),
}

/// An in-process reference transport: peers are registered up front and
/// messages sent to a connected peer are delivered via its `mpsc` channel
/// for the receiving peer's event loop to pick up. No real I/O.
pub struct InMemoryTransport {
    local: PeerId,
    connected: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    inbox: mpsc::UnboundedReceiver<TransportEvent>,
    registry: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
}

impl InMemoryTransport {
    /// Build a transport for `local`, sharing `registry` (a map from peer id
    /// to that peer's inbox sender) with every other peer in the same
    /// simulated network so `connect` can look up and wire up both sides.
    pub fn new(
        local: PeerId,
        registry: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    ) -> (Self, mpsc::UnboundedSender<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            InMemoryTransport {
                local,
                connected: HashMap::new(),
                inbox: rx,
                registry,
            },
            tx,
        )
    }

    /// Next event, if any is already queued or arrives before this resolves.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbox.recv().await
    }

    /// Replace the peer registry wholesale. Needed when wiring up a
    /// simulated network of more than two peers: each transport is
    /// constructed before every other peer's sender exists, so the full
    /// registry can only be handed over afterward.
    pub fn set_registry(&mut self, registry: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>) {
        self.registry = registry;
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    fn local_identity(&self) -> PeerId {
        self.local
    }

    fn connect(&mut self, peer: PeerId) -> FriendHandle {
        if let Some(sender) = self.registry.get(&peer) {
            self.connected.insert(peer, sender.clone());
        }
        peer
    }

    fn disconnect(&mut self, peer: &PeerId) {
        self.connected.remove(peer);
    }

    fn send(&mut self, friend: &FriendHandle, frame: Bytes) -> bool {
        match self.connected.get(friend) {
            Some(sender) => sender
                .send(TransportEvent::FrameReceived(self.local, frame))
                .is_ok(),
            None => false,
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbox.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_BYTES;

    fn pid(n: u8) -> PeerId {
        let mut b = [0u8; ID_BYTES];
        b[0] = n;
        PeerId::from_bytes(b)
    }

    #[tokio::test]
    async fn send_to_connected_peer_delivers_frame_received() {
        let a = pid(1);
        let b = pid(2);
        let mut registry = HashMap::new();
        let (mut transport_a, tx_a) = InMemoryTransport::new(a, HashMap::new());
        let (mut transport_b, tx_b) = InMemoryTransport::new(b, HashMap::new());
        registry.insert(a, tx_a);
        registry.insert(b, tx_b);
        transport_a.registry = registry.clone();
        transport_b.registry = registry;

        transport_a.connect(b);
        assert!(transport_a.send(&b, Bytes::from_static(b"hello")));

        match transport_b.recv().await {
            Some(TransportEvent::FrameReceived(from, bytes)) => {
                assert_eq!(from, a);
                assert_eq!(bytes.as_ref(), b"hello");
            }
            other => panic!("expected FrameReceived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_to_unconnected_peer_fails() {
        let a = pid(1);
        let b = pid(2);
        let (mut transport_a, _tx_a) = InMemoryTransport::new(a, HashMap::new());
        assert!(!transport_a.send(&b, Bytes::from_static(b"hi")));
    }
}
