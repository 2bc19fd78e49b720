//! Bearer token source.
//!
//! The connection manager reads the token at every dial, initial or
//! reconnect. No token means "stay disconnected", never an error.
//!
//! Sources that can announce changes (see [`TokenSource::changes`]) also
//! drive the connection directly: a cleared token tears it down, a rotated
//! token cycles it, and a token appearing while subscriptions wait dials.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

// ============================================================================
// TokenSource
// ============================================================================

/// External credential store supplying the opaque bearer token.
pub trait TokenSource: Send + Sync + 'static {
    /// Returns the current token, if any.
    fn token(&self) -> Option<String>;

    /// Returns a receiver notified whenever the token may have changed.
    ///
    /// `None` (the default) means changes are only noticed at the next dial.
    fn changes(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

// ============================================================================
// SharedToken
// ============================================================================

/// In-memory token store shared between the login flow and the client.
///
/// Cloning shares the same slot. Every `set` and `clear` notifies the
/// receivers handed out by [`TokenSource::changes`].
#[derive(Clone)]
pub struct SharedToken {
    slot: Arc<RwLock<Option<String>>>,
    notify: Arc<watch::Sender<()>>,
}

impl Default for SharedToken {
    fn default() -> Self {
        let (notify, _) = watch::channel(());
        Self {
            slot: Arc::new(RwLock::new(None)),
            notify: Arc::new(notify),
        }
    }
}

impl SharedToken {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a token (login / refresh).
    pub fn set(&self, token: impl Into<String>) {
        *self.slot.write() = Some(token.into());
        self.notify.send_replace(());
    }

    /// Removes the token (logout).
    pub fn clear(&self) {
        *self.slot.write() = None;
        self.notify.send_replace(());
    }
}

impl TokenSource for SharedToken {
    fn token(&self) -> Option<String> {
        self.slot.read().clone()
    }

    fn changes(&self) -> Option<watch::Receiver<()>> {
        Some(self.notify.subscribe())
    }
}

impl fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedToken")
            .field("present", &self.slot.read().is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
