//! Channel pair standing in for one physical connection.
//!
//! A [`Link`] is the client's view: push outbound text frames, pull inbound
//! text frames. A [`Peer`] is the other end, held by whichever task pumps
//! frames to and from the wire (or by a test double).
//!
//! The inbound side ending (`recv` returning `None`) means the physical
//! connection is gone.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::ClientFrame;

// ============================================================================
// Link
// ============================================================================

/// Client end of a physical connection.
#[derive(Debug)]
pub struct Link {
    /// Outbound text frames.
    outbound: mpsc::UnboundedSender<String>,
    /// Inbound text frames.
    inbound: mpsc::UnboundedReceiver<String>,
}

impl Link {
    /// Creates a connected `(Link, Peer)` pair.
    #[must_use]
    pub fn pair() -> (Self, Peer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let link = Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };
        let peer = Peer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };

        (link, peer)
    }

    /// Receives the next inbound text frame.
    ///
    /// Returns `None` once the connection has dropped.
    #[inline]
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Returns a sink for outbound intent frames.
    #[inline]
    #[must_use]
    pub fn sink(&self) -> FrameSink {
        FrameSink {
            outbound: self.outbound.clone(),
        }
    }
}

// ============================================================================
// Peer
// ============================================================================

/// Remote end of a [`Link`].
#[derive(Debug)]
pub struct Peer {
    /// Frames delivered to the client.
    inbound: mpsc::UnboundedSender<String>,
    /// Frames written by the client.
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    /// Delivers a text frame to the client.
    ///
    /// Returns `false` if the client end is gone.
    #[inline]
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.inbound.send(text.into()).is_ok()
    }

    /// Receives the next frame written by the client.
    ///
    /// Returns `None` once the client has dropped every sender.
    #[inline]
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Receives a frame written by the client without waiting.
    #[inline]
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

// ============================================================================
// FrameSink
// ============================================================================

/// Cloneable writer for outbound intent frames.
///
/// Sending never blocks, so it is safe to use while holding the registry
/// lock.
#[derive(Debug, Clone)]
pub struct FrameSink {
    outbound: mpsc::UnboundedSender<String>,
}

impl FrameSink {
    /// Encodes and queues a frame on the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if encoding fails
    /// - [`Error::ConnectionClosed`] if the connection is gone
    pub fn send(&self, frame: &ClientFrame) -> Result<()> {
        let text = frame.encode()?;
        trace!(channel = %frame.key(), "Queueing intent frame");
        self.outbound
            .send(text)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` if the connection end has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================
