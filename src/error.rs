//! Error kinds (§7) and their propagation policy. Every variant here is a
//! *handled* condition: the router and maintenance loops match on these and
//! either drop-and-count, splice, or reply with a protocol message — none of
//! them are meant to reach the transport or the client as a hard failure.

use crate::identity::{Id, PeerId};
use thiserror::Error;

/// A DHT-core error, per spec.md §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DhtError {
    /// Declared length fields don't fit the message body.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The local peer already appears in a forwarded path.
    #[error("loop detected: {peer} already in path")]
    LoopDetected {
        /// The peer that was found to repeat.
        peer: PeerId,
    },

    /// `hop_count` has reached the configured cap.
    #[error("ttl exceeded: hop_count {hop_count} >= max_hops {max_hops}")]
    TtlExceeded {
        /// Hop count carried by the message.
        hop_count: u32,
        /// The configured cap it met or exceeded.
        max_hops: u32,
    },

    /// The relevant friend (or finger's first hop) is congested.
    #[error("peer congested: {peer}")]
    Congested {
        /// The congested peer.
        peer: PeerId,
    },

    /// No uncongested next hop could be selected.
    #[error("no route available toward key")]
    NoRoute,

    /// A message referenced a `trail_id` this peer has no row for.
    #[error("unknown trail: {trail_id:?}")]
    TrailUnknown {
        /// The trail identifier that was not found.
        trail_id: Id,
    },

    /// A cache lookup matched a key but the block had already expired.
    #[error("cached block expired")]
    Expired,

    /// A block's type-specific integrity check failed.
    #[error("payload failed integrity check for block_type {block_type}")]
    Unauthenticated {
        /// The declared block type whose check failed.
        block_type: u32,
    },
}

impl DhtError {
    /// `true` for errors the propagation policy says to drop silently
    /// without penalizing the sender (§7: `Malformed`, `Unauthenticated`,
    /// `TtlExceeded`, `NoRoute`, `TrailUnknown`).
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            DhtError::Malformed(_)
                | DhtError::Unauthenticated { .. }
                | DhtError::TtlExceeded { .. }
                | DhtError::NoRoute
                | DhtError::TrailUnknown { .. }
        )
    }
}
