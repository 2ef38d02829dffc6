//! A small map from request id to a one-shot response slot (§2), used only
//! by in-process callers that need to synchronously await a single reply
//! rather than going through the task/terminate-signal machinery the Dealer
//! uses for calls. Nothing in the router's own bootstrap procedures needs
//! this today, but the wire layer and tests reach for it when they want to
//! wait on a specific request id without building a Task.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::messages::Message;
use crate::{Error, ErrorKind, WampResult, ID};

/// How long `wait` blocks for a reply before giving up.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RequestListener {
    pending: Mutex<HashMap<ID, oneshot::Sender<Message>>>,
}

impl RequestListener {
    pub fn new() -> RequestListener {
        RequestListener {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers interest in a request id and returns a future that resolves
    /// with whatever message is later handed to [`RequestListener::respond`]
    /// for that id, or times out after [`RESPONSE_TIMEOUT`].
    pub async fn wait(&self, request: ID) -> WampResult<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request, tx);
        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(Error::new(ErrorKind::ChannelClosed)),
            Err(_) => {
                self.pending.lock().await.remove(&request);
                Err(Error::new(ErrorKind::Timeout))
            }
        }
    }

    /// Delivers a message to whoever is waiting on this request id, if
    /// anyone still is. Harmless no-op if the wait already timed out or no
    /// one ever registered for this id.
    pub async fn respond(&self, request: ID, message: Message) {
        if let Some(tx) = self.pending.lock().await.remove(&request) {
            let _ = tx.send(message);
        }
    }
}

impl Default for RequestListener {
    fn default() -> RequestListener {
        RequestListener::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::messages::ResultDetails;

    #[tokio::test]
    async fn respond_delivers_to_waiter() {
        let listener = Arc::new(RequestListener::new());
        let waiter = tokio::spawn({
            let listener = listener.clone();
            async move { listener.wait(1).await }
        });
        tokio::task::yield_now().await;
        listener
            .respond(1, Message::Result(1, ResultDetails::new(), None, None))
            .await;
        let message = waiter.await.unwrap().unwrap();
        assert_eq!(message, Message::Result(1, ResultDetails::new(), None, None));
    }

    #[tokio::test]
    async fn wait_times_out_when_nobody_responds() {
        tokio::time::pause();
        let listener = Arc::new(RequestListener::new());
        let wait = tokio::spawn({
            let listener = listener.clone();
            async move { listener.wait(2).await }
        });
        tokio::time::advance(RESPONSE_TIMEOUT + Duration::from_millis(10)).await;
        let result = wait.await.unwrap();
        assert!(matches!(result, Err(e) if matches!(e.kind(), ErrorKind::Timeout)));
    }

    #[tokio::test]
    async fn respond_without_a_waiter_is_a_noop() {
        let listener = RequestListener::new();
        listener
            .respond(99, Message::Result(99, ResultDetails::new(), None, None))
            .await;
    }
}
