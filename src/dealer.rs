//! Procedure registry, call forwarding, and the active-task table (§4.5).
//!
//! A [`Task`] exists for exactly as long as a call has been forwarded to a
//! callee but has not yet received its final yield, an interrupt, or a
//! cancel. `terminate` is a `tokio::sync::Notify`: closing it is naturally
//! idempotent (extra `notify_one` calls before anyone is waiting are simply
//! remembered once).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::{Notify, RwLock};

use crate::ids::{next_id, INTERNAL_PEER_ID};
use crate::meta::MetaHandle;
use crate::messages::{
    CallOptions, Dict, ErrorType, InvocationDetails, List, Message, Reason, RegisterOptions,
    ResultDetails, Value, YieldOptions, URI,
};
use crate::session::{Invocation, LocalHandler};
use crate::session::Session;
use crate::{Error, ErrorKind, WampResult, ID};

/// A call that has been forwarded to a callee and is awaiting resolution.
pub struct Task {
    pub caller: Arc<Session>,
    pub request: ID,
    pub procedure: String,
    pub progressive: bool,
    pub terminate: Arc<Notify>,
}

struct DealerState {
    procedures: HashMap<String, ID>,
    registrations: HashMap<ID, Arc<Session>>,
    registration_uri: HashMap<ID, String>,
    active_tasks: HashMap<ID, Task>,
}

pub struct Dealer {
    state: RwLock<DealerState>,
    meta: MetaHandle,
}

impl Dealer {
    pub fn new(meta: MetaHandle) -> Dealer {
        Dealer {
            state: RwLock::new(DealerState {
                procedures: HashMap::new(),
                registrations: HashMap::new(),
                registration_uri: HashMap::new(),
                active_tasks: HashMap::new(),
            }),
            meta,
        }
    }

    pub async fn register(
        &self,
        request: ID,
        _options: RegisterOptions,
        procedure: URI,
        session: Arc<Session>,
    ) -> WampResult<()> {
        let mut state = self.state.write().await;
        if state.procedures.contains_key(&procedure.uri) {
            return Err(Error::new(ErrorKind::ErrorReason(
                ErrorType::Register,
                request,
                Reason::ProcedureAlreadyExists,
            )));
        }
        let registration = next_id();
        state
            .procedures
            .insert(procedure.uri.clone(), registration);
        state
            .registrations
            .insert(registration, session.clone());
        state
            .registration_uri
            .insert(registration, procedure.uri.clone());
        drop(state);

        session
            .add_registration(registration, procedure.uri.clone())
            .await?;
        self.meta
            .fire(session.id(), "wampire.registration.on_register", Dict::new());

        trace!(
            "session {}: registered {} as {}",
            session.id(),
            procedure.uri,
            registration
        );
        if session.id() == INTERNAL_PEER_ID {
            return Ok(());
        }
        session.send(Message::Registered(request, registration))
    }

    pub async fn unregister(
        &self,
        request: ID,
        registration: ID,
        session: Arc<Session>,
    ) -> WampResult<()> {
        let owned = session
            .uri_from_registration(registration)
            .await
            .ok_or_else(|| {
                Error::new(ErrorKind::ErrorReason(
                    ErrorType::Unregister,
                    request,
                    Reason::NoSuchRegistration,
                ))
            })?;
        session.remove_registration(registration).await?;

        let mut state = self.state.write().await;
        state.registrations.remove(&registration);
        state.registration_uri.remove(&registration);
        state.procedures.remove(&owned);
        drop(state);

        self.meta
            .fire(session.id(), "wampire.registration.on_unregister", Dict::new());
        debug!(
            "session {}: unregistered {} ({})",
            session.id(),
            owned,
            registration
        );
        session.send(Message::Unregistered(request))
    }

    pub async fn call(
        &self,
        request: ID,
        options: CallOptions,
        procedure: URI,
        args: Option<List>,
        kwargs: Option<Dict>,
        caller: Arc<Session>,
    ) -> WampResult<()> {
        let mut state = self.state.write().await;
        let registration = *state.procedures.get(&procedure.uri).ok_or_else(|| {
            Error::new(ErrorKind::ErrorReason(
                ErrorType::Call,
                request,
                Reason::NoSuchProcedure,
            ))
        })?;
        let callee = state
            .registrations
            .get(&registration)
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::ErrorReason(
                    ErrorType::Call,
                    request,
                    Reason::NoSuchProcedure,
                ))
            })?;

        let task = Task {
            caller: caller.clone(),
            request,
            procedure: procedure.uri.clone(),
            progressive: options.receive_progress,
            terminate: Arc::new(Notify::new()),
        };
        state.active_tasks.insert(request, task);
        drop(state);

        let invocation = Invocation {
            request,
            registration,
            details: InvocationDetails::new(),
            args,
            kwargs,
        };
        trace!(
            "session {}: dispatching call {} ({}) to session {}",
            caller.id(),
            request,
            procedure.uri,
            callee.id()
        );
        if let Err(e) = callee.dispatch(invocation).await {
            self.state.write().await.active_tasks.remove(&request);
            warn!(
                "call {} to {}: callee dispatch failed: {}",
                request, procedure.uri, e
            );
            return Err(Error::new(ErrorKind::ErrorReason(
                ErrorType::Call,
                request,
                Reason::NoSuchProcedure,
            )));
        }
        Ok(())
    }

    pub async fn yield_(
        &self,
        request: ID,
        _options: YieldOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> WampResult<()> {
        let mut state = self.state.write().await;
        let (caller, caller_request, remove) = match state.active_tasks.get(&request) {
            Some(task) => (task.caller.clone(), task.request, !task.progressive),
            None => {
                trace!("yield for unknown or completed task {}, dropping", request);
                return Ok(());
            }
        };
        if remove {
            state.active_tasks.remove(&request);
        }
        drop(state);

        caller.send(Message::Result(
            caller_request,
            ResultDetails::new(),
            args,
            kwargs,
        ))
    }

    /// Closes the task's terminate signal but leaves the task in
    /// `active_tasks`: the callee's handler observes the signal and is
    /// expected to answer with an Interrupt, and `interrupt` is what
    /// actually removes the task and routes the reply to the caller. A
    /// task that is cancelled but whose callee never answers stays parked
    /// here, same as one whose Yield never arrives.
    pub async fn cancel(&self, request: ID, _caller: Arc<Session>) -> WampResult<()> {
        let state = self.state.read().await;
        if let Some(task) = state.active_tasks.get(&request) {
            task.terminate.notify_one();
        }
        Ok(())
    }

    pub async fn interrupt(
        &self,
        request: ID,
        _options: crate::messages::InterruptOptions,
    ) -> WampResult<()> {
        let mut state = self.state.write().await;
        if let Some(task) = state.active_tasks.remove(&request) {
            drop(state);
            task.caller.send(Message::Interrupt(
                request,
                crate::messages::InterruptOptions::new(),
            ))?;
        }
        Ok(())
    }

    /// Installs a handler on the internal session and registers it against
    /// the Dealer in one step. Used at router startup for every
    /// `wampire.*` bootstrap procedure.
    pub async fn register_session_handler(
        &self,
        internal_session: &Arc<Session>,
        uri: &str,
        handler: LocalHandler,
    ) -> WampResult<()> {
        internal_session
            .register_handler(uri.to_string(), handler)
            .await;
        self.register(
            next_id(),
            RegisterOptions::new(),
            URI::new(uri),
            internal_session.clone(),
        )
        .await
    }

    /// `wampire.core.dealer.dump`
    pub async fn dump(&self) -> Dict {
        let state = self.state.read().await;
        let mut out = Dict::new();
        for (uri, registration) in state.procedures.iter() {
            if let Some(session) = state.registrations.get(registration) {
                out.insert(uri.clone(), Value::String(session.id().clone()));
            }
        }
        out
    }

    /// `wampire.core.dealer.active.tasks`
    pub async fn active_task_ids(&self) -> Vec<ID> {
        self.state.read().await.active_tasks.keys().cloned().collect()
    }

    /// `wampire.core.list`
    pub async fn list_procedures(&self) -> Vec<String> {
        self.state.read().await.procedures.keys().cloned().collect()
    }

    /// Fetches a clone of a task's terminate signal for the duration handler
    /// in §4.5.1, which needs to observe it without holding the Dealer lock.
    pub async fn terminate_signal(&self, request: ID) -> Option<Arc<Notify>> {
        self.state
            .read()
            .await
            .active_tasks
            .get(&request)
            .map(|t| t.terminate.clone())
    }

    /// Whether a task was created from a call with `receive_progress` set.
    /// The long-duration demo handler uses this to pick its own tick cadence
    /// since that flag never reaches the `Invocation` it's handed.
    pub async fn is_progressive(&self, request: ID) -> bool {
        self.state
            .read()
            .await
            .active_tasks
            .get(&request)
            .map(|t| t.progressive)
            .unwrap_or(false)
    }

    /// Marks a task's next yield as final regardless of `receive_progress`.
    /// §4.5.1 requires a progressive call that reaches its deadline to "flip
    /// progressive=false and return a terminal Yield"; without this, `yield_`
    /// computes `remove = !task.progressive` against a task that's still
    /// `progressive`, and the terminal Yield would never remove it from
    /// `active_tasks`. Call this before sending that terminal Yield.
    pub async fn finish_progressive(&self, request: ID) {
        if let Some(task) = self.state.write().await.active_tasks.get_mut(&request) {
            task.progressive = false;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::Peer;

    fn dealer() -> Dealer {
        Dealer::new(crate::meta::MetaHandle::noop())
    }

    fn session(id: &str) -> (Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (peer, _recv, _inbound, outbound) = Peer::new_test(id.to_string());
        (Session::new(peer), outbound)
    }

    #[tokio::test]
    async fn duplicate_registration_from_different_sessions_errors() {
        let dealer = dealer();
        let (alice, mut alice_out) = session("alice");
        let (bob, _bob_out) = session("bob");

        dealer
            .register(1, RegisterOptions::new(), URI::new("add"), alice.clone())
            .await
            .unwrap();
        assert!(matches!(alice_out.recv().await, Some(Message::Registered(1, _))));

        let err = dealer
            .register(2, RegisterOptions::new(), URI::new("add"), bob.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ErrorReason(ErrorType::Register, 2, Reason::ProcedureAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn call_to_unknown_procedure_errors() {
        let dealer = dealer();
        let (caller, _out) = session("caller");
        let err = dealer
            .call(10, CallOptions::new(), URI::new("nope"), None, None, caller)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ErrorReason(ErrorType::Call, 10, Reason::NoSuchProcedure)
        ));
    }

    #[tokio::test]
    async fn call_forwards_invocation_and_yield_resolves_to_caller() {
        let dealer = dealer();
        let (callee, mut callee_out) = session("callee");
        let (caller, mut caller_out) = session("caller");

        dealer
            .register(1, RegisterOptions::new(), URI::new("add"), callee.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Registered(1, _))));

        dealer
            .call(
                2,
                CallOptions::new(),
                URI::new("add"),
                Some(vec![Value::Integer(2), Value::Integer(3)]),
                None,
                caller.clone(),
            )
            .await
            .unwrap();
        assert_eq!(dealer.active_task_ids().await, vec![2]);

        let registration = match callee_out.recv().await {
            Some(Message::Invocation(2, registration, _, args, None)) => {
                assert_eq!(args, Some(vec![Value::Integer(2), Value::Integer(3)]));
                registration
            }
            other => panic!("expected INVOCATION, got {:?}", other),
        };
        let _ = registration;

        dealer
            .yield_(2, YieldOptions::new(), Some(vec![Value::Integer(5)]), None)
            .await
            .unwrap();
        match caller_out.recv().await {
            Some(Message::Result(2, _, Some(args), None)) => {
                assert_eq!(args, vec![Value::Integer(5)]);
            }
            other => panic!("expected RESULT, got {:?}", other),
        }
        assert!(dealer.active_task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_leaves_task_parked_until_interrupt_removes_it() {
        let dealer = dealer();
        let (callee, mut callee_out) = session("callee");
        let (caller, mut caller_out) = session("caller");

        dealer
            .register(1, RegisterOptions::new(), URI::new("slow"), callee.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Registered(1, _))));

        dealer
            .call(3, CallOptions::new(), URI::new("slow"), None, None, caller.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Invocation(3, ..))));

        dealer.cancel(3, caller.clone()).await.unwrap();
        // cancel only signals; the task is still parked until interrupt runs.
        assert_eq!(dealer.active_task_ids().await, vec![3]);

        dealer.interrupt(3, crate::messages::InterruptOptions::new()).await.unwrap();
        assert!(dealer.active_task_ids().await.is_empty());
        assert!(matches!(caller_out.recv().await, Some(Message::Interrupt(3, _))));
    }

    #[tokio::test]
    async fn finish_progressive_lets_terminal_yield_remove_the_task() {
        let dealer = dealer();
        let (callee, mut callee_out) = session("callee");
        let (caller, mut caller_out) = session("caller");

        dealer
            .register(1, RegisterOptions::new(), URI::new("slow"), callee.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Registered(1, _))));

        dealer
            .call(4, CallOptions::new_progressive(), URI::new("slow"), None, None, caller.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Invocation(4, ..))));
        assert!(dealer.is_progressive(4).await);

        // a bare terminal yield on a still-progressive task would leak it
        dealer
            .yield_(4, YieldOptions::new(), None, None)
            .await
            .unwrap();
        assert_eq!(dealer.active_task_ids().await, vec![4]);
        let _ = caller_out.recv().await;

        // reusing request 4 would be invalid; simulate the deadline path on
        // a fresh progressive call instead
        dealer
            .register(2, RegisterOptions::new(), URI::new("slow2"), callee.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Registered(2, _))));
        dealer
            .call(5, CallOptions::new_progressive(), URI::new("slow2"), None, None, caller.clone())
            .await
            .unwrap();
        assert!(matches!(callee_out.recv().await, Some(Message::Invocation(5, ..))));
        assert!(dealer.is_progressive(5).await);

        dealer.finish_progressive(5).await;
        assert!(!dealer.is_progressive(5).await);
        dealer
            .yield_(5, YieldOptions::new(), None, None)
            .await
            .unwrap();
        assert!(dealer.active_task_ids().await.is_empty());
        assert!(matches!(caller_out.recv().await, Some(Message::Result(5, ..))));
    }
}
