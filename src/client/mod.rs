//! Consumer-facing client.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RealtimeClient`] | `subscribe`, connection lifecycle, status observable |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`RealtimeOptions`] | Timeouts, grace window and backoff |
//! | [`Unsubscribe`] | Idempotent subscription guard |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Timing and retry options.
pub mod options;

/// Subscription guard.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::RealtimeClient;
pub use options::RealtimeOptions;
pub use subscription::Unsubscribe;
