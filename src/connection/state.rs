//! Connection state and the published status snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the single physical connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected ◄──► Reconnecting
///       ▲              │                              │
///       │              └──────────► Failed ◄──────────┘
///       └──── explicit teardown / logout / idle (from any live state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First handshake in progress.
    Connecting,
    /// Handshake acknowledged; subscriptions are live.
    Connected,
    /// Connection lost; retrying under backoff.
    Reconnecting,
    /// Token rejected or retries exhausted. Terminal until a new token.
    Failed,
}

impl ConnectionState {
    /// Returns `true` if frames can flow.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a connection is being established or restored.
    #[inline]
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns the lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Snapshot published on every transition.
///
/// The token itself never leaves the connection manager; views only learn
/// whether one is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Whether a bearer token is currently available.
    pub has_token: bool,
    /// Dial attempts since the last successful connection.
    pub attempt: u32,
    /// Last error, kept while `Failed` or retrying.
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    /// Returns `true` if connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

// ============================================================================
// Tests
// ============================================================================
