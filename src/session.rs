//! Per-connection state layered on top of a [`Peer`]: subscriptions,
//! registrations, and the local handler table used only by the internal
//! session.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use tokio::sync::RwLock;

use crate::ids::PeerId;
use crate::messages::{Dict, InvocationDetails, List, Message, YieldOptions};
use crate::peer::Peer;
use crate::{Error, ErrorKind, WampResult, ID};

/// The fields of an INVOCATION, unpacked for handler convenience.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request: ID,
    pub registration: ID,
    pub details: InvocationDetails,
    pub args: Option<List>,
    pub kwargs: Option<Dict>,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A callable registered directly against the internal session. Handlers
/// run to completion (synchronously, in spirit) and are responsible for
/// sending their own reply through `session.peer().send`; long-running
/// handlers (the progressive demo call) may spawn a background task and
/// return immediately, continuing to send further Yields later.
pub type LocalHandler = Arc<dyn Fn(Arc<Session>, Invocation) -> HandlerFuture + Send + Sync>;

struct SessionInner {
    subs: HashMap<ID, String>,
    regs: HashMap<ID, String>,
    handlers: HashMap<String, LocalHandler>,
}

pub struct Session {
    peer: Peer,
    inner: RwLock<SessionInner>,
    init_ts: u64,
}

impl Session {
    pub fn new(peer: Peer) -> Arc<Session> {
        let init_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Arc::new(Session {
            peer,
            inner: RwLock::new(SessionInner {
                subs: HashMap::new(),
                regs: HashMap::new(),
                handlers: HashMap::new(),
            }),
            init_ts,
        })
    }

    #[inline]
    pub fn id(&self) -> &PeerId {
        self.peer.id()
    }

    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    #[inline]
    pub fn init_ts(&self) -> u64 {
        self.init_ts
    }

    pub fn send(&self, message: Message) -> WampResult<()> {
        self.peer.send(message)
    }

    pub async fn add_subscription(&self, id: ID, topic: String) -> WampResult<()> {
        let mut inner = self.inner.write().await;
        if inner.subs.contains_key(&id) {
            return Err(Error::new(ErrorKind::InvalidState(
                "subscription id already present on session",
            )));
        }
        inner.subs.insert(id, topic);
        Ok(())
    }

    pub async fn remove_subscription(&self, id: ID) -> WampResult<String> {
        let mut inner = self.inner.write().await;
        inner.subs.remove(&id).ok_or_else(|| {
            Error::new(ErrorKind::InvalidState(
                "subscription id not present on session",
            ))
        })
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.read().await.subs.values().cloned().collect()
    }

    /// Subscription ids owned by this session, used by router teardown to
    /// walk `Broker::unsubscribe` for every subscription still open when the
    /// session exits.
    pub async fn subscription_ids(&self) -> Vec<ID> {
        self.inner.read().await.subs.keys().cloned().collect()
    }

    pub async fn add_registration(&self, id: ID, uri: String) -> WampResult<()> {
        let mut inner = self.inner.write().await;
        if inner.regs.contains_key(&id) {
            return Err(Error::new(ErrorKind::InvalidState(
                "registration id already present on session",
            )));
        }
        inner.regs.insert(id, uri);
        Ok(())
    }

    pub async fn remove_registration(&self, id: ID) -> WampResult<String> {
        let mut inner = self.inner.write().await;
        inner.regs.remove(&id).ok_or_else(|| {
            Error::new(ErrorKind::InvalidState(
                "registration id not present on session",
            ))
        })
    }

    pub async fn uri_from_registration(&self, id: ID) -> Option<String> {
        self.inner.read().await.regs.get(&id).cloned()
    }

    pub async fn registrations(&self) -> Vec<String> {
        self.inner.read().await.regs.values().cloned().collect()
    }

    /// Registration ids owned by this session, used by router teardown to
    /// walk `Dealer::unregister` for every procedure still owned when the
    /// session exits.
    pub async fn registration_ids(&self) -> Vec<ID> {
        self.inner.read().await.regs.keys().cloned().collect()
    }

    /// Installs a local (in-process) handler. Used only by the internal
    /// session at router startup.
    pub async fn register_handler(&self, uri: String, handler: LocalHandler) {
        self.inner.write().await.handlers.insert(uri, handler);
    }

    pub async fn unregister_handler(&self, uri: &str) {
        self.inner.write().await.handlers.remove(uri);
    }

    /// Dispatches an INVOCATION: if this session owns a local handler for
    /// the invocation's procedure, run it; otherwise forward the
    /// INVOCATION unchanged to this peer (a remote callee).
    pub async fn dispatch(self: &Arc<Self>, invocation: Invocation) -> WampResult<()> {
        let uri = self.uri_from_registration(invocation.registration).await;
        let handler = match &uri {
            Some(uri) => self.inner.read().await.handlers.get(uri).cloned(),
            None => None,
        };
        match handler {
            Some(handler) => {
                trace!(
                    "session {}: dispatching invocation {} to local handler {:?}",
                    self.id(),
                    invocation.request,
                    uri
                );
                handler(self.clone(), invocation).await;
                Ok(())
            }
            None => self.peer.send(Message::Invocation(
                invocation.request,
                invocation.registration,
                invocation.details,
                invocation.args,
                invocation.kwargs,
            )),
        }
    }
}

/// Convenience for local handlers: build and send a terminal, non-progressive
/// Yield back through this session's own peer (which, for the internal
/// session, loops straight back into its receive stream and from there
/// through the Dealer's normal yield path).
pub fn send_yield(session: &Session, request: ID, args: Option<List>, kwargs: Option<Dict>) {
    let _ = session.send(Message::Yield(request, YieldOptions::new(), args, kwargs));
}

/// Same as [`send_yield`] but marks the yield as progressive so the Dealer
/// keeps the task alive for further yields.
pub fn send_progressive_yield(
    session: &Session,
    request: ID,
    args: Option<List>,
    kwargs: Option<Dict>,
) {
    let _ = session.send(Message::Yield(
        request,
        YieldOptions { progress: true },
        args,
        kwargs,
    ));
}
