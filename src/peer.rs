//! The transport-agnostic endpoint every Session is built on top of.
//!
//! A peer exposes a send sink, a receive stream, a stable [`PeerId`], and a
//! terminate operation. Two flavors exist: a websocket-backed peer for real
//! clients, and an in-process peer whose receive stream is the same channel
//! as its send sink, used for the router's own meta/introspection session.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::ids::{new_peer_id, PeerId, INTERNAL_PEER_ID};
use crate::messages::Message;

/// How long `terminate` waits after closing the send sink for a close frame
/// to drain before it tears down the transport outright.
const CLOSE_LINGER: Duration = Duration::from_millis(100);

/// Server-mode keepalive cadence: a Ping is emitted on this ticker whenever
/// the write pump is otherwise idle.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

enum PeerKind {
    Socket {
        read_pump: JoinHandle<()>,
        write_pump: JoinHandle<()>,
    },
    Internal,
}

/// A connected WAMP peer. Cheap to clone: the send half is an unbounded
/// mpsc sender, so cloning a `Peer` just clones a handle.
#[derive(Clone)]
pub struct Peer {
    id: PeerId,
    send_tx: mpsc::UnboundedSender<Message>,
}

/// The stream of messages a peer has received, handed to whoever drives the
/// session loop for this peer (the Router's `accept`).
pub type ReceiveStream = mpsc::UnboundedReceiver<Message>;

impl Peer {
    #[inline]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Enqueue a message on this peer's send sink. Never blocks: the
    /// underlying channel is unbounded, matching the non-blocking dispatch
    /// every other component in this router relies on.
    pub fn send(&self, message: Message) -> Result<(), crate::Error> {
        self.send_tx
            .send(message)
            .map_err(|_| crate::Error::new(crate::ErrorKind::ConnectionLost))
    }

    /// Build the router's own in-process peer. Its receive stream is wired
    /// directly to its own send sink: whatever is sent on it can be read
    /// back from the returned stream.
    pub fn new_internal() -> (Peer, ReceiveStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Peer {
                id: INTERNAL_PEER_ID.to_string(),
                send_tx: tx,
            },
            rx,
        )
    }

    /// Wrap an accepted websocket stream as a socket peer, spawning its read
    /// and write pumps. Returns the peer handle and the stream of messages
    /// it has received.
    pub fn new_socket(ws: WebSocketStream<TcpStream>) -> (Peer, ReceiveStream, SocketHandle) {
        let id = new_peer_id();
        let (mut ws_write, mut ws_read) = ws.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Message>();
        let (recv_tx, recv_rx) = mpsc::unbounded_channel::<Message>();

        let write_id = id.clone();
        let write_pump = tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.tick().await; // first tick fires immediately, discard it
            loop {
                tokio::select! {
                    message = send_rx.recv() => {
                        let message = match message {
                            Some(message) => message,
                            None => break,
                        };
                        let encoded = match serde_json::to_string(&message) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                warn!("peer {}: failed to encode outbound message: {}", write_id, e);
                                continue;
                            }
                        };
                        trace!("peer {}: sending {:?}", write_id, message);
                        if let Err(e) = ws_write.send(WsMessage::Text(encoded)).await {
                            debug!("peer {}: write pump closing: {}", write_id, e);
                            break;
                        }
                    }
                    _ = keepalive.tick() => {
                        trace!("peer {}: sending keepalive ping", write_id);
                        if let Err(e) = ws_write.send(WsMessage::Ping(Vec::new())).await {
                            debug!("peer {}: write pump closing on keepalive: {}", write_id, e);
                            break;
                        }
                    }
                }
            }
            let _ = ws_write.close().await;
        });

        let read_id = id.clone();
        let read_pump = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("peer {}: read pump closing: {}", read_id, e);
                        break;
                    }
                };
                let text = match frame {
                    WsMessage::Text(text) => text,
                    WsMessage::Binary(_) => {
                        warn!("peer {}: dropping unsupported binary frame", read_id);
                        continue;
                    }
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                };
                match serde_json::from_str::<Message>(&text) {
                    Ok(message) => {
                        trace!("peer {}: received {:?}", read_id, message);
                        if recv_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("peer {}: malformed message dropped: {}", read_id, e);
                    }
                }
            }
        });

        let peer = Peer {
            id: id.clone(),
            send_tx,
        };
        let handle = SocketHandle {
            kind: PeerKind::Socket {
                read_pump,
                write_pump,
            },
        };
        (peer, recv_rx, handle)
    }

    /// Builds a peer with no transport behind it at all: two independent
    /// unbounded channels, one per direction, and a caller-chosen id. Used
    /// by scenario tests to stand in for a remote client without a real
    /// socket — `inbound` plays the part of the client sending messages to
    /// the router, and the returned [`ReceiveStream`] paired with `outbound`
    /// lets the test observe what the router sent back.
    pub fn new_test(
        id: PeerId,
    ) -> (
        Peer,
        ReceiveStream,
        mpsc::UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (send_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (Peer { id, send_tx }, inbound_rx, inbound_tx, outbound_rx)
    }
}

/// Owns the background tasks of a socket peer so `terminate` can join them.
pub struct SocketHandle {
    kind: PeerKind,
}

impl SocketHandle {
    /// A handle for a peer with nothing to tear down: the router's own
    /// internal peer, and test peers built from [`Peer::new_test`].
    pub fn noop() -> SocketHandle {
        SocketHandle {
            kind: PeerKind::Internal,
        }
    }

    /// Closes the send sink, waits briefly for a close frame to drain, then
    /// joins both pumps. After this returns, the peer's receive stream has
    /// closed exactly once.
    pub async fn terminate(self, peer: &Peer) {
        // Dropping the sender half would be enough to stop the write pump,
        // but we don't own it here; closing happens because `peer` itself
        // is dropped by the caller once the session loop exits. We only
        // need to wait out the pumps.
        let _ = peer;
        tokio::time::sleep(CLOSE_LINGER).await;
        match self.kind {
            PeerKind::Socket {
                read_pump,
                write_pump,
            } => {
                read_pump.abort();
                let _ = write_pump.await;
            }
            PeerKind::Internal => {}
        }
    }
}
