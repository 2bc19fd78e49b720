//! WebSocket transport and frame pump.
//!
//! # Pump
//!
//! Each opened connection spawns a tokio task that handles:
//!
//! - Incoming text frames from the endpoint, forwarded to the [`Link`]
//! - Outgoing intent frames from the [`Link`], written to the socket
//! - Close/error on either side, which ends the task and the link

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::Transport;
use super::link::{Link, Peer};

// ============================================================================
// Types
// ============================================================================

/// Socket type produced by `connect_async`.
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WsTransport
// ============================================================================

/// [`Transport`] over `tokio-tungstenite`.
///
/// The socket is opened with the token already in the URL; the handshake
/// acknowledgement travels as an ordinary frame afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Creates the transport.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &Url) -> Result<Link> {
        let (socket, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(map_connect_error)?;

        debug!(host = endpoint.host_str().unwrap_or_default(), "WebSocket opened");

        let (link, peer) = Link::pair();
        tokio::spawn(run_pump(socket, peer));

        Ok(link)
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Moves frames between the socket and the link until either side closes.
async fn run_pump(socket: Socket, mut peer: Peer) {
    let (mut ws_write, mut ws_read) = socket.split();

    loop {
        tokio::select! {
            // Incoming frames from the endpoint
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "Frame received");
                        if !peer.send(text.to_string()) {
                            debug!("Link dropped, closing socket");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ping/Pong are answered by tungstenite; binary is not part of the protocol
                    _ => {}
                }
            }

            // Outgoing frames from the client
            outbound = peer.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Failed to write frame");
                            break;
                        }
                    }

                    None => {
                        debug!("Link closed, closing socket");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Pump terminated");
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Maps an upgrade failure, treating 401/403 as token rejection.
fn map_connect_error(err: WsError) -> Error {
    match err {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            Error::authentication_failed(format!("upgrade rejected with {}", response.status()))
        }
        other => Error::WebSocket(other),
    }
}

// ============================================================================
// Tests
// ============================================================================
