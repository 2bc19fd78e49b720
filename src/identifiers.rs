//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing consumer IDs with frame references.
//!
//! | Type | Backing | Source |
//! |------|---------|--------|
//! | [`ConsumerId`] | `u64` | Process-wide counter, one per `subscribe` call |
//! | [`FrameRef`] | UUID v4 | Attached to every outbound intent frame |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ConsumerId
// ============================================================================

/// Counter backing [`ConsumerId::next`]. Starts at 1 so 0 never appears.
static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one consumer registration (one `subscribe` call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Allocates the next unique consumer ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

// ============================================================================
// FrameRef
// ============================================================================

/// Reference attached to outbound subscribe/unsubscribe frames.
///
/// Lets the endpoint (and logs) correlate intents; the client never waits
/// on a reply keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRef(Uuid);

impl FrameRef {
    /// Generates a new random reference.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
