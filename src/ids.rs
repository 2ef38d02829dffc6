//! Identity types shared by Peer, Session, Broker and Dealer.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::ID;

/// Stable identity of a connected peer. External peers get a freshly
/// generated v4 UUID; the router's own in-process peer always uses
/// [`INTERNAL_PEER_ID`].
pub type PeerId = String;

/// Reserved identity of the router's own in-process peer.
pub const INTERNAL_PEER_ID: &str = "internal";

pub fn new_peer_id() -> PeerId {
    Uuid::new_v4().to_string()
}

/// Single process-wide counter backing every router-generated id (session,
/// subscription, registration, publication). §3 specifies these as
/// "router-generated monotonically increasing integers"; the ground-truth
/// original (`core/types.go`'s `NewId`) draws them from one
/// `atomic.AddUint64` counter shared across all of them, which this mirrors.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A fresh router-generated id: monotonically increasing, never reused,
/// shared across sessions/subscriptions/registrations/publications.
pub fn next_id() -> ID {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
