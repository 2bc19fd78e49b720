//! Connection lifecycle.
//!
//! One physical connection per client, owned by a supervisor task.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | [`ConnectionManager`] supervisor and [`LinkListener`] |
//! | `state` | [`ConnectionState`] and [`ConnectionStatus`] |
//! | `backoff` | [`Backoff`] reconnect policy |
//! | `token` | [`TokenSource`] and [`SharedToken`] |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff policy.
pub mod backoff;

/// Connection supervisor.
pub mod manager;

/// Connection state machine types.
pub mod state;

/// Bearer token source.
pub mod token;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::Backoff;
pub use manager::{ConnectionManager, LinkListener};
pub use state::{ConnectionState, ConnectionStatus};
pub use token::{SharedToken, TokenSource};
