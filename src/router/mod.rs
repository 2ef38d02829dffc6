//! Ties Peer, Session, Broker, Dealer and the meta-event pipeline together
//! into one running router (§4.7).
//!
//! `Router::new` builds the router's own internal session and registers
//! every `wampire.*` bootstrap procedure against it before accepting any
//! real peer. `Router::accept` runs the HELLO/WELCOME handshake for one
//! connection and spawns its session loop; `Router::shutdown` signals every
//! loop to exit and waits for the session table to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::dealer::Dealer;
use crate::ids::{next_id, PeerId};
use crate::meta::{self, MetaHandle};
use crate::messages::{
    Dict, ErrorDetails, InterruptOptions, Message, Reason, RouterRoles, Value, WelcomeDetails,
    YieldOptions, URI,
};
use crate::peer::{Peer, ReceiveStream, SocketHandle};
use crate::session::{send_yield, HandlerFuture, LocalHandler, Session};
use crate::{Error, ErrorKind, WampResult, ID};

/// How long `accept` waits for the first (HELLO) message before giving up.
const HELLO_TIMEOUT: Duration = Duration::from_secs(1);

/// How often `shutdown` polls the session table while waiting for it to
/// drain.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tick cadence for `wampire.core.long.duration.call` while the caller asked
/// for progressive results.
const PROGRESSIVE_TICK: Duration = Duration::from_millis(200);

/// Overall lifetime of a `wampire.core.long.duration.call` invocation before
/// it resolves with a terminal (non-progressive) Yield.
const LONG_DURATION_TIMEOUT: Duration = Duration::from_secs(5);

const HELP_TEXT: &str =
    "wampire: a WAMP v2 JSON router. See wampire.core.list for registered procedures.";

type SessionMap = Arc<RwLock<HashMap<PeerId, Arc<Session>>>>;

/// Decides whether a connecting peer's HELLO is admitted. The default
/// predicate (used by `Router::new`) always allows; a realm/role-aware check
/// can be supplied via `Router::new_with_auth`.
pub type AuthPredicate = Arc<dyn Fn(&URI, &crate::messages::HelloDetails) -> bool + Send + Sync>;

pub struct Router {
    broker: Arc<Broker>,
    dealer: Arc<Dealer>,
    meta: MetaHandle,
    sessions: SessionMap,
    #[allow(dead_code)]
    internal_session: Arc<Session>,
    auth: AuthPredicate,
    shutdown_tx: watch::Sender<bool>,
    meta_task: Mutex<Option<JoinHandle<()>>>,
    internal_task: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Builds a router that admits every HELLO.
    pub async fn new() -> WampResult<Arc<Router>> {
        Router::new_with_auth(Arc::new(|_realm: &URI, _details: &crate::messages::HelloDetails| true))
            .await
    }

    pub async fn new_with_auth(auth: AuthPredicate) -> WampResult<Arc<Router>> {
        let (meta_handle, meta_consumer) = meta::channel();
        let broker = Arc::new(Broker::new(meta_handle.clone()));
        let dealer = Arc::new(Dealer::new(meta_handle.clone()));
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, _) = watch::channel(false);

        let (internal_peer, internal_recv) = Peer::new_internal();
        let internal_session = Session::new(internal_peer);

        let meta_task = tokio::spawn(meta_consumer.run(broker.clone(), internal_session.clone()));

        bootstrap(&dealer, &broker, &sessions, &internal_session).await?;

        let router = Arc::new(Router {
            broker,
            dealer,
            meta: meta_handle,
            sessions,
            internal_session: internal_session.clone(),
            auth,
            shutdown_tx,
            meta_task: Mutex::new(Some(meta_task)),
            internal_task: Mutex::new(None),
        });

        let internal_task = tokio::spawn(router.clone().run_session(internal_session, internal_recv));
        *router.internal_task.lock().await = Some(internal_task);

        Ok(router)
    }

    #[inline]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    #[inline]
    pub fn dealer(&self) -> &Arc<Dealer> {
        &self.dealer
    }

    /// Runs the HELLO/WELCOME handshake for one newly connected peer and, on
    /// success, spawns its session loop. Returns once the peer has either
    /// been admitted or rejected; the session itself keeps running in the
    /// background until GOODBYE, disconnect, or router shutdown.
    pub async fn accept(
        self: &Arc<Self>,
        peer: Peer,
        mut recv: ReceiveStream,
        handle: SocketHandle,
    ) -> WampResult<()> {
        let hello = match tokio::time::timeout(HELLO_TIMEOUT, recv.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => return Err(Error::new(ErrorKind::ConnectionLost)),
            Err(_) => return Err(Error::new(ErrorKind::Timeout)),
        };
        let (realm, details) = match hello {
            Message::Hello(realm, details) => (realm, details),
            _ => return Err(Error::new(ErrorKind::UnexpectedMessage("first message must be HELLO"))),
        };

        if !(self.auth)(&realm, &details) {
            debug!("peer {}: rejected for realm {}", peer.id(), realm.uri);
            let _ = peer.send(Message::Abort(ErrorDetails::new(), Reason::NoSuchRealm));
            handle.terminate(&peer).await;
            return Ok(());
        }

        peer.send(Message::Welcome(next_id(), WelcomeDetails::new(RouterRoles::new())))?;

        let session = Session::new(peer.clone());
        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(session.id()) {
                return Err(Error::new(ErrorKind::InvalidState("duplicate peer id in session map")));
            }
            sessions.insert(session.id().clone(), session.clone());
        }
        self.meta.fire(session.id(), "wampire.session.on_join", Dict::new());
        debug!("session {}: admitted on realm {}", session.id(), realm.uri);

        let router = self.clone();
        tokio::spawn(async move {
            router.clone().run_session(session, recv).await;
            handle.terminate(&peer).await;
        });
        Ok(())
    }

    /// Signals every session loop to exit, waits for the session table to
    /// drain, then tears down the meta-event consumer.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        while !self.sessions.read().await.is_empty() {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        if let Some(task) = self.internal_task.lock().await.take() {
            let _ = task.await;
        }
        if let Some(task) = self.meta_task.lock().await.take() {
            task.abort();
        }
        debug!("router shutdown complete");
    }

    async fn run_session(self: Arc<Self>, session: Arc<Session>, mut recv: ReceiveStream) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                message = recv.recv() => {
                    match message {
                        Some(Message::Goodbye(..)) => {
                            trace!("session {}: received GOODBYE", session.id());
                            break;
                        }
                        Some(message) => {
                            let router = self.clone();
                            let session = session.clone();
                            tokio::spawn(async move { router.dispatch_message(session, message).await; });
                        }
                        None => break,
                    }
                }
                _ = shutdown_rx.changed() => {
                    trace!("session {}: shutting down", session.id());
                    break;
                }
            }
        }
        self.teardown_session(&session).await;
    }

    async fn dispatch_message(&self, session: Arc<Session>, message: Message) {
        let result = match message {
            Message::Subscribe(request, options, topic) => {
                self.broker.subscribe(request, options, topic, session.clone()).await
            }
            Message::Unsubscribe(request, subscription) => {
                self.broker.unsubscribe(request, subscription, session.clone()).await
            }
            Message::Publish(request, options, topic, args, kwargs) => {
                self.broker
                    .publish(request, options, topic, args, kwargs, session.clone())
                    .await
            }
            Message::Call(request, options, procedure, args, kwargs) => {
                self.dealer
                    .call(request, options, procedure, args, kwargs, session.clone())
                    .await
            }
            Message::Cancel(request, _options) => self.dealer.cancel(request, session.clone()).await,
            Message::Yield(request, options, args, kwargs) => {
                self.dealer.yield_(request, options, args, kwargs).await
            }
            Message::Register(request, options, procedure) => {
                self.dealer.register(request, options, procedure, session.clone()).await
            }
            Message::Unregister(request, registration) => {
                self.dealer.unregister(request, registration, session.clone()).await
            }
            Message::Invocation(request, ..) => {
                warn!("session {}: dropping unexpected inbound INVOCATION {}", session.id(), request);
                return;
            }
            Message::Result(request, ..) => {
                warn!("session {}: dropping unexpected inbound RESULT {}", session.id(), request);
                return;
            }
            Message::Published(..) => return, // the internal session's own acknowledgement loopback
            other => {
                trace!("session {}: dropping {} in session loop", session.id(), other.name());
                return;
            }
        };

        if let Err(e) = result {
            self.reply_with_error(&session, e);
        }
    }

    fn reply_with_error(&self, session: &Session, error: Error) {
        match error.get_kind() {
            ErrorKind::ErrorReason(error_type, request, reason) => {
                let _ = session.send(Message::Error(error_type, request, Dict::new(), reason, None, None));
            }
            kind => warn!("session {}: dispatch failed: {}", session.id(), kind.description()),
        }
    }

    async fn teardown_session(&self, session: &Arc<Session>) {
        for subscription in session.subscription_ids().await {
            if let Err(e) = self.broker.unsubscribe(next_id(), subscription, session.clone()).await {
                warn!("session {}: teardown unsubscribe {} failed: {}", session.id(), subscription, e);
            }
        }
        for registration in session.registration_ids().await {
            if let Err(e) = self.dealer.unregister(next_id(), registration, session.clone()).await {
                warn!("session {}: teardown unregister {} failed: {}", session.id(), registration, e);
            }
        }
        self.meta.fire(session.id(), "wampire.session.on_leave", Dict::new());
        self.sessions.write().await.remove(session.id());
        debug!("session {}: disconnected", session.id());
    }
}

/// Registers every reserved `wampire.*` procedure against the internal
/// session (§4.7.1), pairing a Dealer registration with a local handler in
/// one call.
async fn bootstrap(
    dealer: &Arc<Dealer>,
    broker: &Arc<Broker>,
    sessions: &SessionMap,
    internal_session: &Arc<Session>,
) -> WampResult<()> {
    let help: LocalHandler = Arc::new(|session, invocation| {
        Box::pin(async move {
            send_yield(&session, invocation.request, Some(vec![Value::String(HELP_TEXT.to_string())]), None);
        }) as HandlerFuture
    });
    dealer.register_session_handler(internal_session, "wampire.core.help", help).await?;

    let list_dealer = dealer.clone();
    let list: LocalHandler = Arc::new(move |session, invocation| {
        let dealer = list_dealer.clone();
        Box::pin(async move {
            let procedures = dealer.list_procedures().await;
            let args = vec![Value::List(procedures.into_iter().map(Value::String).collect())];
            send_yield(&session, invocation.request, Some(args), None);
        }) as HandlerFuture
    });
    dealer.register_session_handler(internal_session, "wampire.core.list", list).await?;

    let echo: LocalHandler = Arc::new(|session, invocation| {
        Box::pin(async move {
            send_yield(&session, invocation.request, invocation.args, invocation.kwargs);
        }) as HandlerFuture
    });
    dealer.register_session_handler(internal_session, "wampire.core.echo", echo).await?;

    let dump_dealer = dealer.clone();
    let dump: LocalHandler = Arc::new(move |session, invocation| {
        let dealer = dump_dealer.clone();
        Box::pin(async move {
            let dump = dealer.dump().await;
            send_yield(&session, invocation.request, Some(vec![Value::Dict(dump)]), None);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.core.dealer.dump", dump)
        .await?;

    let active_dealer = dealer.clone();
    let active_tasks: LocalHandler = Arc::new(move |session, invocation| {
        let dealer = active_dealer.clone();
        Box::pin(async move {
            let ids = dealer.active_task_ids().await;
            let args = vec![Value::List(ids.into_iter().map(Value::UnsignedInteger).collect())];
            send_yield(&session, invocation.request, Some(args), None);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.core.dealer.active.tasks", active_tasks)
        .await?;

    let duration_dealer = dealer.clone();
    let long_duration: LocalHandler = Arc::new(move |_session, invocation| {
        let dealer = duration_dealer.clone();
        Box::pin(long_duration_call(dealer, invocation.request)) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.core.long.duration.call", long_duration)
        .await?;

    let list_sessions = sessions.clone();
    let session_list: LocalHandler = Arc::new(move |session, invocation| {
        let sessions = list_sessions.clone();
        Box::pin(async move {
            let ids: Vec<Value> = sessions.read().await.keys().cloned().map(Value::String).collect();
            send_yield(&session, invocation.request, Some(ids), None);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.session.list", session_list)
        .await?;

    let count_sessions = sessions.clone();
    let session_count: LocalHandler = Arc::new(move |session, invocation| {
        let sessions = count_sessions.clone();
        Box::pin(async move {
            let count = sessions.read().await.len() as u64;
            send_yield(&session, invocation.request, Some(vec![Value::UnsignedInteger(count)]), None);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.session.count", session_count)
        .await?;

    let get_sessions = sessions.clone();
    let session_get: LocalHandler = Arc::new(move |session, invocation| {
        let sessions = get_sessions.clone();
        Box::pin(async move {
            let peer_id = match invocation.args.as_ref().and_then(|args| args.first()) {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    send_yield(&session, invocation.request, None, None);
                    return;
                }
            };
            let target = sessions.read().await.get(&peer_id).cloned();
            let reply = match target {
                Some(target) => {
                    let mut dict = Dict::new();
                    dict.insert(
                        "subscriptions".to_string(),
                        Value::List(target.subscriptions().await.into_iter().map(Value::String).collect()),
                    );
                    dict.insert(
                        "registrations".to_string(),
                        Value::List(target.registrations().await.into_iter().map(Value::String).collect()),
                    );
                    dict.insert("init_ts".to_string(), Value::UnsignedInteger(target.init_ts()));
                    Some(dict)
                }
                None => None,
            };
            send_yield(&session, invocation.request, None, reply);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.session.get", session_get)
        .await?;

    let list_topics_broker = broker.clone();
    let list_topics: LocalHandler = Arc::new(move |session, invocation| {
        let broker = list_topics_broker.clone();
        Box::pin(async move {
            let topics = broker.list_topics().await;
            send_yield(
                &session,
                invocation.request,
                Some(topics.into_iter().map(Value::String).collect()),
                None,
            );
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.subscription.list_topics", list_topics)
        .await?;

    let list_subscribers_broker = broker.clone();
    let list_subscribers: LocalHandler = Arc::new(move |session, invocation| {
        let broker = list_subscribers_broker.clone();
        Box::pin(async move {
            let peers = broker.list_subscribers().await;
            send_yield(
                &session,
                invocation.request,
                Some(peers.into_iter().map(Value::String).collect()),
                None,
            );
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.subscription.list_subscribers", list_subscribers)
        .await?;

    let count_subscribers_broker = broker.clone();
    let count_subscribers: LocalHandler = Arc::new(move |session, invocation| {
        let broker = count_subscribers_broker.clone();
        Box::pin(async move {
            let topic = match invocation.args.as_ref().and_then(|args| args.first()) {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    send_yield(&session, invocation.request, Some(vec![Value::UnsignedInteger(0)]), None);
                    return;
                }
            };
            let count = broker.count_subscribers(&topic).await;
            send_yield(&session, invocation.request, Some(vec![Value::UnsignedInteger(count)]), None);
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(internal_session, "wampire.subscription.count_subscribers", count_subscribers)
        .await?;

    let list_topic_subscribers_broker = broker.clone();
    let list_topic_subscribers: LocalHandler = Arc::new(move |session, invocation| {
        let broker = list_topic_subscribers_broker.clone();
        Box::pin(async move {
            let topic = match invocation.args.as_ref().and_then(|args| args.first()) {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    send_yield(&session, invocation.request, Some(Vec::new()), None);
                    return;
                }
            };
            let peers = broker.list_topic_subscribers(&topic).await;
            send_yield(
                &session,
                invocation.request,
                Some(peers.into_iter().map(Value::String).collect()),
                None,
            );
        }) as HandlerFuture
    });
    dealer
        .register_session_handler(
            internal_session,
            "wampire.subscription.list_topic_subscribers",
            list_topic_subscribers,
        )
        .await?;

    Ok(())
}

/// `wampire.core.long.duration.call` (§4.5.1): a demonstration task that
/// yields progressively if the caller asked for `receive_progress`, resolves
/// after a fixed timeout, and answers a cancel with an Interrupt.
async fn long_duration_call(dealer: Arc<Dealer>, request: ID) {
    let terminate = match dealer.terminate_signal(request).await {
        Some(terminate) => terminate,
        None => return,
    };
    let progressive = dealer.is_progressive(request).await;

    let mut ticker = tokio::time::interval(PROGRESSIVE_TICK);
    ticker.tick().await; // the first tick fires immediately, discard it
    let deadline = tokio::time::sleep(LONG_DURATION_TIMEOUT);
    tokio::pin!(deadline);

    let mut counter: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick(), if progressive => {
                counter += 1;
                let mut kwargs = Dict::new();
                kwargs.insert("update".to_string(), Value::UnsignedInteger(counter));
                let _ = dealer.yield_(request, YieldOptions { progress: true }, None, Some(kwargs)).await;
            }
            _ = &mut deadline => {
                dealer.finish_progressive(request).await;
                let _ = dealer.yield_(request, YieldOptions::new(), None, None).await;
                break;
            }
            _ = terminate.notified() => {
                let _ = dealer.interrupt(request, InterruptOptions::new()).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::*;
    use crate::messages::{
        CallOptions, CancelOptions, ClientRoles, ErrorType, HelloDetails, PublishOptions, ResultDetails, SubscribeOptions,
    };

    async fn connect(
        router: &Arc<Router>,
        id: &str,
    ) -> (mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>) {
        let (peer, recv, inbound, mut outbound) = Peer::new_test(id.to_string());
        router.accept(peer, recv, SocketHandle::noop()).await.unwrap();
        inbound
            .send(Message::Hello(URI::new("realm1"), HelloDetails::new(ClientRoles::new())))
            .unwrap();
        match outbound.recv().await {
            Some(Message::Welcome(..)) => {}
            other => panic!("expected WELCOME, got {:?}", other),
        }
        (inbound, outbound)
    }

    #[tokio::test]
    async fn accept_rejects_non_hello_first_message() {
        let router = Router::new().await.unwrap();
        let (peer, recv, inbound, _outbound) = Peer::new_test("rude".to_string());
        inbound
            .send(Message::Goodbye(ErrorDetails::new(), Reason::NormalClose))
            .unwrap();
        let err = router.accept(peer, recv, SocketHandle::noop()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedMessage(_)));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn basic_pubsub_round_trip() {
        let router = Router::new().await.unwrap();
        let (pub_in, _pub_out) = connect(&router, "publisher").await;
        let (sub_in, mut sub_out) = connect(&router, "subscriber").await;

        sub_in
            .send(Message::Subscribe(1, SubscribeOptions::new(), URI::new("com.test.topic")))
            .unwrap();
        match sub_out.recv().await {
            Some(Message::Subscribed(1, _)) => {}
            other => panic!("expected SUBSCRIBED, got {:?}", other),
        }

        pub_in
            .send(Message::Publish(2, PublishOptions::new(true), URI::new("com.test.topic"), None, None))
            .unwrap();
        match sub_out.recv().await {
            Some(Message::Event(..)) => {}
            other => panic!("expected EVENT, got {:?}", other),
        }

        router.shutdown().await;
    }

    #[tokio::test]
    async fn echo_round_trip_via_dealer() {
        let router = Router::new().await.unwrap();
        let (caller_in, mut caller_out) = connect(&router, "caller").await;

        caller_in
            .send(Message::Call(
                10,
                CallOptions::new(),
                URI::new("wampire.core.echo"),
                Some(vec![Value::String("hi".to_string())]),
                None,
            ))
            .unwrap();
        match caller_out.recv().await {
            Some(Message::Result(10, ResultDetails {}, Some(args), None)) => {
                assert_eq!(args, vec![Value::String("hi".to_string())]);
            }
            other => panic!("expected RESULT, got {:?}", other),
        }

        router.shutdown().await;
    }

    #[tokio::test]
    async fn call_to_unknown_procedure_errors() {
        let router = Router::new().await.unwrap();
        let (caller_in, mut caller_out) = connect(&router, "caller").await;

        caller_in
            .send(Message::Call(11, CallOptions::new(), URI::new("com.nope"), None, None))
            .unwrap();
        match caller_out.recv().await {
            Some(Message::Error(ErrorType::Call, 11, _, Reason::NoSuchProcedure, _, _)) => {}
            other => panic!("expected ERROR NoSuchProcedure, got {:?}", other),
        }

        router.shutdown().await;
    }

    #[tokio::test]
    async fn progressive_call_then_cancel_yields_interrupt() {
        let router = Router::new().await.unwrap();
        let (caller_in, mut caller_out) = connect(&router, "caller").await;

        let mut options = CallOptions::new();
        options.receive_progress = true;
        caller_in
            .send(Message::Call(
                43,
                options,
                URI::new("wampire.core.long.duration.call"),
                None,
                None,
            ))
            .unwrap();

        let mut last_update = 0u64;
        for _ in 0..3 {
            match caller_out.recv().await {
                Some(Message::Result(43, _, None, Some(kwargs))) => {
                    let update = match kwargs.get("update") {
                        Some(Value::UnsignedInteger(n)) => *n,
                        other => panic!("expected update counter, got {:?}", other),
                    };
                    assert!(update > last_update);
                    last_update = update;
                }
                other => panic!("expected progressive RESULT, got {:?}", other),
            }
        }

        caller_in.send(Message::Cancel(43, CancelOptions::new())).unwrap();
        match caller_out.recv().await {
            Some(Message::Interrupt(43, _)) => {}
            other => panic!("expected INTERRUPT, got {:?}", other),
        }

        router.shutdown().await;
    }

    #[tokio::test]
    async fn meta_events_observe_new_session_join() {
        let router = Router::new().await.unwrap();
        let (meta_in, mut meta_out) = connect(&router, "observer").await;

        meta_in
            .send(Message::Subscribe(1, SubscribeOptions::new(), URI::new(crate::broker::META_TOPIC)))
            .unwrap();
        assert!(matches!(meta_out.recv().await, Some(Message::Subscribed(1, _))));

        let (_joiner_in, _joiner_out) = connect(&router, "newcomer").await;

        match meta_out.recv().await {
            Some(Message::Event(_, _, _, Some(args), _)) => match args.first() {
                Some(Value::Dict(dict)) => match dict.get("message") {
                    Some(Value::String(s)) => assert_eq!(s, "wampire.session.on_join"),
                    other => panic!("expected message string, got {:?}", other),
                },
                other => panic!("expected a dict argument, got {:?}", other),
            },
            other => panic!("expected EVENT, got {:?}", other),
        }

        router.shutdown().await;
    }
}
