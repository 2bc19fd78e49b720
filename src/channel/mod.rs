//! Channel subscriptions and message routing.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | [`ChannelRegistry`]: ref-counted table of wanted channels |
//! | `router` | [`MessageRouter`]: ordering check and consumer dispatch |

// ============================================================================
// Submodules
// ============================================================================

/// Subscription table.
pub mod registry;

/// Inbound message router.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use registry::{Admission, ChannelRegistry, SubscriptionHandle, SubscriptionInfo};
pub use router::{MessageCallback, MessageRouter, RouteOutcome, RouterStats};
