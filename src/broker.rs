//! Topic registry and event fan-out (§4.4).
//!
//! `topics`, `topic_peers` and `subscriptions` are kept in lockstep under a
//! single readers-writer lock: subscribe/unsubscribe take the write half,
//! publish takes the read half and spawns each subscriber delivery as its
//! own task so one slow subscriber cannot delay the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::RwLock;

use crate::ids::PeerId;
use crate::ids::next_id;
use crate::meta::MetaHandle;
use crate::messages::{
    Dict, ErrorType, EventDetails, List, Message, PublishOptions, Reason, SubscribeOptions, URI,
};
use crate::session::Session;
use crate::{Error, ErrorKind, WampResult, ID};

/// The meta topic is created at router startup and is never garbage
/// collected even once its subscriber set is empty.
pub const META_TOPIC: &str = "wampire.session.meta.events";

struct BrokerState {
    topics: HashMap<String, HashSet<ID>>,
    topic_peers: HashMap<String, HashMap<PeerId, ID>>,
    subscriptions: HashMap<ID, Arc<Session>>,
    subscription_topic: HashMap<ID, String>,
}

pub struct Broker {
    state: RwLock<BrokerState>,
    meta: MetaHandle,
}

impl Broker {
    pub fn new(meta: MetaHandle) -> Broker {
        let mut topics = HashMap::new();
        topics.insert(META_TOPIC.to_string(), HashSet::new());
        let mut topic_peers = HashMap::new();
        topic_peers.insert(META_TOPIC.to_string(), HashMap::new());
        Broker {
            state: RwLock::new(BrokerState {
                topics,
                topic_peers,
                subscriptions: HashMap::new(),
                subscription_topic: HashMap::new(),
            }),
            meta,
        }
    }

    pub async fn subscribe(
        &self,
        request: ID,
        _options: SubscribeOptions,
        topic: URI,
        session: Arc<Session>,
    ) -> WampResult<()> {
        let mut state = self.state.write().await;
        if let Some(peers) = state.topic_peers.get(&topic.uri) {
            if peers.contains_key(session.id()) {
                return Err(Error::new(ErrorKind::ErrorReason(
                    ErrorType::Subscribe,
                    request,
                    Reason::NotAuthorized,
                )));
            }
        }

        let created = !state.topics.contains_key(&topic.uri);
        if created {
            state.topics.insert(topic.uri.clone(), HashSet::new());
            state
                .topic_peers
                .insert(topic.uri.clone(), HashMap::new());
        }

        let subscription = next_id();
        state
            .topics
            .get_mut(&topic.uri)
            .expect("topic just ensured")
            .insert(subscription);
        state
            .topic_peers
            .get_mut(&topic.uri)
            .expect("topic just ensured")
            .insert(session.id().clone(), subscription);
        state
            .subscriptions
            .insert(subscription, session.clone());
        state
            .subscription_topic
            .insert(subscription, topic.uri.clone());
        drop(state);

        session.add_subscription(subscription, topic.uri.clone()).await?;

        if created {
            self.meta.fire(session.id(), "wampire.subscription.on_create", Dict::new());
        }
        self.meta.fire(session.id(), "wampire.subscription.on_subscribe", Dict::new());

        trace!(
            "session {}: subscribed to {} as {}",
            session.id(),
            topic.uri,
            subscription
        );
        session.send(Message::Subscribed(request, subscription))
    }

    pub async fn unsubscribe(
        &self,
        request: ID,
        subscription: ID,
        session: Arc<Session>,
    ) -> WampResult<()> {
        let topic = session.remove_subscription(subscription).await.map_err(|_| {
            Error::new(ErrorKind::ErrorReason(
                ErrorType::Unsubscribe,
                request,
                Reason::NoSuchSubscription,
            ))
        })?;

        let mut state = self.state.write().await;
        state.subscriptions.remove(&subscription);
        state.subscription_topic.remove(&subscription);
        let mut deleted = false;
        if let Some(peers) = state.topic_peers.get_mut(&topic) {
            peers.remove(session.id());
        }
        if let Some(set) = state.topics.get_mut(&topic) {
            set.remove(&subscription);
            if set.is_empty() && topic != META_TOPIC {
                state.topics.remove(&topic);
                state.topic_peers.remove(&topic);
                deleted = true;
            }
        }
        drop(state);

        self.meta.fire(session.id(), "wampire.subscription.on_unsubscribe", Dict::new());
        if deleted {
            self.meta.fire(session.id(), "wampire.subscription.on_delete", Dict::new());
        }

        debug!("session {}: unsubscribed from {}", session.id(), topic);
        session.send(Message::Unsubscribed(request))
    }

    pub async fn publish(
        &self,
        request: ID,
        options: PublishOptions,
        topic: URI,
        args: Option<List>,
        kwargs: Option<Dict>,
        publisher: Arc<Session>,
    ) -> WampResult<()> {
        let state = self.state.read().await;
        let subscribers: Vec<(ID, Arc<Session>)> = match state.topics.get(&topic.uri) {
            Some(set) => set
                .iter()
                .filter_map(|id| state.subscriptions.get(id).map(|s| (*id, s.clone())))
                .collect(),
            None => {
                drop(state);
                return Err(Error::new(ErrorKind::ErrorReason(
                    ErrorType::Publish,
                    request,
                    Reason::NoSuchSubscription,
                )));
            }
        };
        drop(state);

        let publication = next_id();
        let details = EventDetails::from_publish_options(&options, &topic);
        let publisher_id = publisher.id().clone();
        for (subscription, subscriber) in subscribers {
            if subscriber.id() == &publisher_id {
                continue;
            }
            let details = details.clone();
            let args = args.clone();
            let kwargs = kwargs.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    subscriber.send(Message::Event(subscription, publication, details, args, kwargs))
                {
                    warn!(
                        "session {}: failed to deliver event for publication {}: {}",
                        subscriber.id(),
                        publication,
                        e
                    );
                }
            });
        }

        if options.should_acknowledge() {
            publisher.send(Message::Published(request, publication))?;
        }
        Ok(())
    }

    /// `wampire.subscription.list_topics`
    pub async fn list_topics(&self) -> Vec<String> {
        self.state.read().await.topics.keys().cloned().collect()
    }

    /// `wampire.subscription.list_subscribers`
    pub async fn list_subscribers(&self) -> Vec<PeerId> {
        self.state
            .read()
            .await
            .subscriptions
            .values()
            .map(|s| s.id().clone())
            .collect()
    }

    /// `wampire.subscription.count_subscribers`
    pub async fn count_subscribers(&self, topic: &str) -> u64 {
        self.state
            .read()
            .await
            .topic_peers
            .get(topic)
            .map(|peers| peers.len() as u64)
            .unwrap_or(0)
    }

    /// `wampire.subscription.list_topic_subscribers`
    pub async fn list_topic_subscribers(&self, topic: &str) -> Vec<PeerId> {
        self.state
            .read()
            .await
            .topic_peers
            .get(topic)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::Peer;

    fn broker() -> Broker {
        Broker::new(crate::meta::MetaHandle::noop())
    }

    fn session(id: &str) -> (Arc<Session>, crate::peer::ReceiveStream, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (peer, recv, _inbound, outbound) = Peer::new_test(id.to_string());
        (Session::new(peer), recv, outbound)
    }

    #[tokio::test]
    async fn meta_topic_is_present_from_construction() {
        let broker = broker();
        assert!(broker.list_topics().await.contains(&META_TOPIC.to_string()));
    }

    #[tokio::test]
    async fn duplicate_subscription_from_same_peer_errors() {
        let broker = broker();
        let (alice, _recv, _out) = session("alice");
        broker
            .subscribe(1, SubscribeOptions::new(), URI::new("foo"), alice.clone())
            .await
            .unwrap();
        let err = broker
            .subscribe(2, SubscribeOptions::new(), URI::new("foo"), alice.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ErrorReason(ErrorType::Subscribe, 2, Reason::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn publish_excludes_the_publisher() {
        let broker = broker();
        let (alice, _recv, mut alice_out) = session("alice");
        broker
            .subscribe(1, SubscribeOptions::new(), URI::new("foo"), alice.clone())
            .await
            .unwrap();
        assert!(matches!(alice_out.recv().await, Some(Message::Subscribed(1, _))));

        broker
            .publish(2, PublishOptions::new(true), URI::new("foo"), None, None, alice.clone())
            .await
            .unwrap();
        match alice_out.recv().await {
            Some(Message::Published(2, _)) => {}
            other => panic!("expected only PUBLISHED, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_errors() {
        let broker = broker();
        let (alice, _recv, _out) = session("alice");
        let err = broker
            .publish(5, PublishOptions::new(true), URI::new("nope"), None, None, alice)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ErrorReason(ErrorType::Publish, 5, Reason::NoSuchSubscription)
        ));
    }

    #[tokio::test]
    async fn unsubscribe_removes_empty_topic_but_keeps_meta_topic() {
        let broker = broker();
        let (alice, _recv, mut alice_out) = session("alice");
        broker
            .subscribe(1, SubscribeOptions::new(), URI::new("foo"), alice.clone())
            .await
            .unwrap();
        let subscription = match alice_out.recv().await {
            Some(Message::Subscribed(1, subscription)) => subscription,
            other => panic!("expected SUBSCRIBED, got {:?}", other),
        };
        broker.unsubscribe(2, subscription, alice.clone()).await.unwrap();
        assert!(!broker.list_topics().await.contains(&"foo".to_string()));
        assert!(broker.list_topics().await.contains(&META_TOPIC.to_string()));
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_subscription_errors() {
        let broker = broker();
        let (alice, _recv, _out) = session("alice");
        let err = broker.unsubscribe(9, 12345, alice).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ErrorReason(ErrorType::Unsubscribe, 9, Reason::NoSuchSubscription)
        ));
    }
}
