//! Fleet Realtime - Connection and subscription layer for live tracking data.
//!
//! This library keeps one authenticated duplex connection to a real-time
//! endpoint and multiplexes any number of channel subscriptions over it.
//!
//! # Architecture
//!
//! ```text
//!  application ──► RealtimeClient ──► ChannelRegistry ──(intents)──┐
//!       ▲                │                   ▲                     ▼
//!       │                ▼                   │            ConnectionManager ◄──► endpoint
//!       └──── MessageRouter ◄── ordering ────┘                     │
//!                    ▲                                             │
//!                    └─────────────────(messages)──────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - One physical connection per client, owned by a supervisor task
//! - The registry, not the connection, is the source of truth for what is
//!   subscribed; every reconnect restores it
//! - Identical `(channel, params)` pairs share one wire-level subscription
//! - Per-channel sequence markers drop stale and duplicate messages
//! - Consumer callbacks are isolated from each other and from the router
//!
//! # Quick Start
//!
//! ```no_run
//! use fleet_realtime::{RealtimeClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = RealtimeClient::builder()
//!         .endpoint("wss://api.example.com/realtime")
//!         .build()?;
//!
//!     client.connect("bearer-token").await?;
//!
//!     let positions = client.subscribe(
//!         "fleet.positions",
//!         [("fleetId", "F1")],
//!         |event, payload| println!("{event}: {payload}"),
//!     )?;
//!
//!     let mut status = client.watch_status();
//!     while status.changed().await.is_ok() {
//!         println!("connection: {}", status.borrow().state);
//!     }
//!
//!     positions.unsubscribe();
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`RealtimeClient`], [`ClientBuilder`], [`RealtimeOptions`] |
//! | [`channel`] | [`ChannelRegistry`] and [`MessageRouter`] |
//! | [`connection`] | [`ConnectionManager`], state and backoff |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Channel identity and wire frames |
//! | [`transport`] | [`Transport`] seam and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Channel subscriptions and message routing.
///
/// Internal machinery behind [`RealtimeClient::subscribe`].
pub mod channel;

/// Consumer-facing client.
///
/// Use [`RealtimeClient::builder()`] to create a configured client.
pub mod client;

/// Connection lifecycle: supervisor, state machine, backoff and tokens.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Channel identity and wire frames.
pub mod protocol;

/// Transport seam and WebSocket implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientBuilder, RealtimeClient, RealtimeOptions, Unsubscribe};

// Channel types
pub use channel::{
    ChannelRegistry, MessageCallback, MessageRouter, RouteOutcome, RouterStats,
    SubscriptionHandle, SubscriptionInfo,
};

// Connection types
pub use connection::{
    Backoff, ConnectionManager, ConnectionState, ConnectionStatus, SharedToken, TokenSource,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConsumerId, FrameRef};

// Protocol types
pub use protocol::{ChannelKey, ChannelParams, ClientFrame, InboundMessage, Sequence, ServerFrame};

// Transport types
pub use transport::{FrameSink, Link, Peer, Transport, WsTransport};
