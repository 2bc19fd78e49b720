//! Transport layer.
//!
//! The real-time endpoint is reached through a [`Transport`]: the external
//! collaborator that turns an endpoint URL (token already attached) into a
//! live [`Link`]. Everything above this module speaks only in text frames.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │ ConnectionManager│   Link (mpsc pair)       │  Pump task       │     WebSocket
//! │                  │◄────────────────────────►│  (WsTransport)   │◄──────────────► endpoint
//! │ ChannelRegistry ─┼── FrameSink ────────────►│                  │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | [`Link`], [`Peer`], [`FrameSink`] |
//! | `websocket` | [`WsTransport`] over `tokio-tungstenite` |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Channel pair standing in for a physical connection.
pub mod link;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use link::{FrameSink, Link, Peer};
pub use websocket::WsTransport;

// ============================================================================
// Transport
// ============================================================================

/// Opens physical connections to the real-time endpoint.
///
/// Implementations report a rejected token as
/// [`Error::AuthenticationFailed`](crate::Error::AuthenticationFailed) and
/// anything else as a recoverable connection error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn open(&self, endpoint: &Url) -> Result<Link>;
}
