//! Application-facing interface (§6.4). `client_put`/`client_get`/
//! `client_stop` are exposed on `DhtHandle` (`actor.rs`); this module holds
//! the result-delivery half: the narrow `ClientSink` callback the router
//! invokes once a GET's `RESULT` arrives, plus a channel-backed reference
//! implementation.

use crate::identity::{Key, PeerId};
use crate::pending::RequestId;
use tokio::sync::mpsc;

/// One delivered GET result (§6.4 `result_cb`).
#[derive(Debug, Clone)]
pub struct ClientResult {
    pub request_id: RequestId,
    pub key: Key,
    pub payload: Vec<u8>,
    pub put_path: Vec<PeerId>,
    pub get_path: Vec<PeerId>,
}

/// Narrow callback interface the router delivers GET results through.
/// There is deliberately no negative acknowledgement (§7): a GET simply
/// times out client-side if nothing ever arrives.
pub trait ClientSink: Send {
    /// Deliver one result for an outstanding `client_get`.
    fn deliver_result(&self, result: ClientResult);
}

/// Reference `ClientSink` backed by an unbounded `mpsc` channel, so tests
/// and small embedders can just `.await` on results rather than
/// implementing the trait themselves.
pub struct ChannelClientSink {
    tx: mpsc::UnboundedSender<ClientResult>,
}

impl ChannelClientSink {
    /// Create a sink/receiver pair.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelClientSink { tx }, rx)
    }
}

impl ClientSink for ChannelClientSink {
    fn deliver_result(&self, result: ClientResult) {
        // The receiver may have been dropped (client stopped caring); that
        // is not an error condition for the DHT core.
        let _ = self.tx.send(result);
    }
}
