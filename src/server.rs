//! TCP listener and websocket upgrade, handing off each accepted connection
//! to the router.
//!
//! Negotiates the `wamp.2.json` subprotocol during the websocket handshake;
//! a client that doesn't offer it is still accepted (the basic profile here
//! only speaks JSON anyway), but the header is echoed back when present so
//! strict clients recognize the router.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::peer::Peer;
use crate::router::Router;
use crate::{Error, WampResult};

const WAMP_JSON_SUBPROTOCOL: &str = "wamp.2.json";

fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, tokio_tungstenite::tungstenite::handshake::server::ErrorResponse> {
    let offered = request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|p| p.trim() == WAMP_JSON_SUBPROTOCOL))
        .unwrap_or(false);
    if offered {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WAMP_JSON_SUBPROTOCOL),
        );
    }
    Ok(response)
}

/// Binds `addr`, accepting connections until the process is told to stop.
/// Each accepted TCP stream is upgraded to a websocket and handed to
/// `router.accept` on its own task; a failed handshake or rejected HELLO
/// just drops that one connection.
pub async fn listen(router: Arc<Router>, addr: &str) -> WampResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::from(tokio_tungstenite::tungstenite::Error::Io(e)))?;
    info!("listening on {}", addr);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_connection(router, stream).await {
                debug!("connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn accept_connection(router: Arc<Router>, stream: TcpStream) -> WampResult<()> {
    let ws = tokio_tungstenite::accept_hdr_async(stream, negotiate_subprotocol).await?;
    let (peer, recv, handle) = Peer::new_socket(ws);
    debug!("peer {}: websocket handshake complete", peer.id());
    router.accept(peer, recv, handle).await
}
