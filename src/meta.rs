//! Lifecycle events re-published on the reserved meta topic (§4.6).
//!
//! Firing an event is a non-blocking enqueue onto an unbounded channel;
//! events originating from the internal peer are dropped right there so the
//! consumer never re-publishes its own activity back to itself. The
//! consumer runs as one long-lived task per router, turning each event into
//! a Publish against the Broker using the internal session as publisher.

use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc;

use crate::broker::{Broker, META_TOPIC};
use crate::ids::{PeerId, INTERNAL_PEER_ID};
use crate::messages::{Dict, PublishOptions, Value, URI};
use crate::session::Session;

struct MetaEvent {
    origin: PeerId,
    event: String,
    details: Dict,
}

/// The fire-side handle. Cheap to clone; every component that can raise a
/// lifecycle event (Broker, Dealer, Router) holds one.
#[derive(Clone)]
pub struct MetaHandle {
    tx: mpsc::UnboundedSender<MetaEvent>,
}

impl MetaHandle {
    pub fn fire(&self, origin: &PeerId, event: &str, details: Dict) {
        if origin == INTERNAL_PEER_ID {
            return;
        }
        let _ = self.tx.send(MetaEvent {
            origin: origin.clone(),
            event: event.to_string(),
            details,
        });
    }

    /// A handle with no consumer on the other end: `fire` still accepts
    /// every call (the channel is unbounded and simply never drained), but
    /// nothing ever republishes through a Broker. Used by component tests
    /// (Broker, Dealer) that want lifecycle events to be harmlessly
    /// swallowed rather than standing up a full router.
    pub fn noop() -> MetaHandle {
        channel().0
    }
}

/// The consume-side half, handed to the router's startup task.
pub struct MetaConsumer {
    rx: mpsc::UnboundedReceiver<MetaEvent>,
}

/// Builds a fire/consume pair for one router instance.
pub fn channel() -> (MetaHandle, MetaConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MetaHandle { tx }, MetaConsumer { rx })
}

impl MetaConsumer {
    /// Runs until the last [`MetaHandle`] is dropped (router shutdown drops
    /// the Broker/Dealer/Router, which drops every clone).
    pub async fn run(mut self, broker: Arc<Broker>, internal_session: Arc<Session>) {
        while let Some(event) = self.rx.recv().await {
            let mut options = PublishOptions::new(true);
            options.insert(
                "session_id".to_string(),
                Value::String(event.origin.clone()),
            );
            options.insert("details".to_string(), Value::Dict(event.details));

            let mut message = Dict::new();
            message.insert("message".to_string(), Value::String(event.event.clone()));

            let request = crate::ids::next_id();
            let result = broker
                .publish(
                    request,
                    options,
                    URI::new(META_TOPIC),
                    Some(vec![Value::Dict(message)]),
                    None,
                    internal_session.clone(),
                )
                .await;
            if let Err(e) = result {
                warn!("meta handler: failed to publish {}: {}", event.event, e);
            }
        }
    }
}
