//! Subscription guard.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::channel::{ChannelRegistry, MessageRouter, SubscriptionHandle};
use crate::identifiers::ConsumerId;
use crate::protocol::ChannelKey;

// ============================================================================
// Unsubscribe
// ============================================================================

/// Guard returned by [`RealtimeClient::subscribe`](crate::RealtimeClient::subscribe).
///
/// Calling [`unsubscribe`](Self::unsubscribe) (or dropping the guard) removes
/// the callback and releases the channel reference. Repeated calls are no-ops.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct Unsubscribe {
    consumer: ConsumerId,
    key: ChannelKey,
    handle: Mutex<Option<SubscriptionHandle>>,
    registry: Arc<ChannelRegistry>,
    router: Arc<MessageRouter>,
}

impl Unsubscribe {
    pub(crate) fn new(
        consumer: ConsumerId,
        handle: SubscriptionHandle,
        registry: Arc<ChannelRegistry>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            consumer,
            key: handle.key().clone(),
            handle: Mutex::new(Some(handle)),
            registry,
            router,
        }
    }

    /// Removes the callback and releases the channel reference. Idempotent.
    pub fn unsubscribe(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        self.router.unregister(&self.key, self.consumer);
        self.registry.release(handle);
        debug!(channel = %self.key, consumer = %self.consumer, "Unsubscribed");
    }

    /// Returns the consumer registration ID.
    #[inline]
    #[must_use]
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer
    }

    /// Returns the channel identity.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Returns `true` until [`unsubscribe`](Self::unsubscribe) is called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("consumer", &self.consumer)
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
