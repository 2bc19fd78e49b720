//! Inbound message demultiplexing.
//!
//! Routing runs in three steps:
//!
//! 1. Resolve the subscription; messages for channels no longer wanted are dropped.
//! 2. Apply the strict sequence check; stale or duplicate messages are dropped.
//! 3. Invoke every consumer callback, each isolated from the others.
//!
//! Routing is driven from the connection supervisor only, so messages for a
//! channel are delivered in arrival order. Nothing here propagates past the
//! router: problems are counted and logged.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::identifiers::ConsumerId;
use crate::protocol::{ChannelKey, InboundMessage};

use super::registry::{Admission, ChannelRegistry};

// ============================================================================
// Types
// ============================================================================

/// Consumer callback receiving `(event, payload)`.
pub type MessageCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// What happened to one routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Passed to consumers.
    Delivered {
        /// Callbacks invoked.
        consumers: usize,
        /// Callbacks that panicked.
        failures: usize,
    },
    /// Dropped: channel not subscribed.
    UnknownChannel,
    /// Dropped: sequence not newer than the last applied one.
    Stale,
}

/// Router counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    /// Messages passed to consumers.
    pub messages_routed: u64,
    /// Messages dropped by the sequence check.
    pub duplicates_dropped: u64,
    /// Messages dropped for unsubscribed channels.
    pub unknown_channel_dropped: u64,
    /// Unparsable frames dropped before routing.
    pub malformed_dropped: u64,
    /// Consumer callbacks that panicked.
    pub callback_failures: u64,
}

#[derive(Default)]
struct Counters {
    messages_routed: AtomicU64,
    duplicates_dropped: AtomicU64,
    unknown_channel_dropped: AtomicU64,
    malformed_dropped: AtomicU64,
    callback_failures: AtomicU64,
}

// ============================================================================
// MessageRouter
// ============================================================================

/// Delivers inbound messages to the consumers of each channel.
pub struct MessageRouter {
    registry: Arc<ChannelRegistry>,
    consumers: RwLock<FxHashMap<ChannelKey, Vec<(ConsumerId, MessageCallback)>>>,
    counters: Counters,
}

impl MessageRouter {
    /// Creates a router backed by `registry` for ordering state.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            consumers: RwLock::new(FxHashMap::default()),
            counters: Counters::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------------

    /// Adds a consumer callback for `key`.
    pub fn register(&self, key: ChannelKey, consumer: ConsumerId, callback: MessageCallback) {
        trace!(channel = %key, %consumer, "Consumer registered");
        self.consumers
            .write()
            .entry(key)
            .or_default()
            .push((consumer, callback));
    }

    /// Removes a consumer callback. Returns `false` if it was not registered.
    pub fn unregister(&self, key: &ChannelKey, consumer: ConsumerId) -> bool {
        let mut consumers = self.consumers.write();

        let Some(list) = consumers.get_mut(key) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != consumer);
        let removed = list.len() != before;

        if list.is_empty() {
            consumers.remove(key);
        }

        if removed {
            trace!(channel = %key, %consumer, "Consumer unregistered");
        }
        removed
    }

    /// Returns the number of callbacks registered for `key`.
    #[must_use]
    pub fn consumer_count(&self, key: &ChannelKey) -> usize {
        self.consumers.read().get(key).map_or(0, Vec::len)
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.consumers.write().clear();
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Routes one inbound message.
    pub fn route(&self, message: &InboundMessage) -> RouteOutcome {
        match self.registry.admit(message) {
            Admission::Unknown => {
                trace!(channel = %message.key, event = %message.event, "No subscription, dropping");
                self.counters
                    .unknown_channel_dropped
                    .fetch_add(1, Ordering::Relaxed);
                return RouteOutcome::UnknownChannel;
            }

            Admission::Stale { last } => {
                debug!(
                    channel = %message.key,
                    seq = ?message.seq,
                    last = %last,
                    "Stale message dropped"
                );
                self.counters
                    .duplicates_dropped
                    .fetch_add(1, Ordering::Relaxed);
                return RouteOutcome::Stale;
            }

            Admission::Accepted => {}
        }

        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<MessageCallback> = self
            .consumers
            .read()
            .get(&message.key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        let mut failures = 0usize;
        for callback in &callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                callback(&message.event, &message.payload);
            }));

            if outcome.is_err() {
                failures += 1;
                warn!(channel = %message.key, event = %message.event, "Consumer callback panicked");
            }
        }

        self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
        if failures > 0 {
            self.counters
                .callback_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
        }

        RouteOutcome::Delivered {
            consumers: callbacks.len(),
            failures,
        }
    }

    /// Counts a frame that could not be parsed.
    pub fn record_malformed(&self) {
        self.counters
            .malformed_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            messages_routed: self.counters.messages_routed.load(Ordering::Relaxed),
            duplicates_dropped: self.counters.duplicates_dropped.load(Ordering::Relaxed),
            unknown_channel_dropped: self
                .counters
                .unknown_channel_dropped
                .load(Ordering::Relaxed),
            malformed_dropped: self.counters.malformed_dropped.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
