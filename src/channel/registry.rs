//! Subscription table.
//!
//! The registry records which channels should be subscribed, independent of
//! whether a connection currently exists. It is the only place subscribe and
//! unsubscribe intents are written, which keeps at most one subscribe in
//! flight per channel identity.
//!
//! # Lifecycle of an entry
//!
//! ```text
//! acquire ──► ref_count 1, pending ──(connected)──► sent
//!                  ▲                                  │
//!                  │ acquire within grace             │ release to 0
//!                  └──────── releasing ◄──────────────┘
//!                               │ grace elapsed
//!                               ▼
//!                 removed (unsubscribe if it was sent)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{ChannelKey, ClientFrame, InboundMessage, Sequence};
use crate::transport::FrameSink;

// ============================================================================
// Types
// ============================================================================

/// Proof of one reference on a channel subscription.
///
/// Not cloneable: each handle is released exactly once through
/// [`ChannelRegistry::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: ChannelKey,
}

impl SubscriptionHandle {
    /// Returns the channel identity.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

/// Verdict on an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No subscription for the channel.
    Unknown,
    /// Sequence not newer than the last applied one.
    Stale {
        /// Last applied sequence.
        last: Sequence,
    },
    /// Deliver to consumers.
    Accepted,
}

/// Point-in-time view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Channel identity.
    pub key: ChannelKey,
    /// Live references.
    pub ref_count: usize,
    /// Highest sequence delivered.
    pub last_applied_seq: Option<Sequence>,
    /// Subscribe intent not yet written on the current connection.
    pub pending_send: bool,
    /// Removal scheduled after the grace window.
    pub releasing: bool,
}

/// One subscription entry.
struct Subscription {
    ref_count: usize,
    last_applied_seq: Option<Sequence>,
    pending_send: bool,
    removal: Option<JoinHandle<()>>,
    /// Bumped whenever a scheduled removal is superseded.
    generation: u64,
}

impl Subscription {
    fn new() -> Self {
        Self {
            ref_count: 0,
            last_applied_seq: None,
            pending_send: true,
            removal: None,
            generation: 0,
        }
    }

    fn cancel_removal(&mut self) {
        if let Some(removal) = self.removal.take() {
            removal.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

/// State guarded by the registry lock.
struct Table {
    entries: FxHashMap<ChannelKey, Subscription>,
    sink: Option<FrameSink>,
    disposed: bool,
}

// ============================================================================
// ChannelRegistry
// ============================================================================

/// Reference-counted table of wanted channels.
///
/// # Thread Safety
///
/// All mutations run under one short-lived lock; no await or blocking work
/// happens while it is held.
pub struct ChannelRegistry {
    table: Mutex<Table>,
    grace_window: Duration,
    runtime: Handle,
    /// Number of entries, observed by the connection supervisor.
    demand: watch::Sender<usize>,
}

impl ChannelRegistry {
    /// Creates an empty registry whose grace timers run on `runtime`.
    #[must_use]
    pub fn new(grace_window: Duration, runtime: Handle) -> Arc<Self> {
        let (demand, _) = watch::channel(0);

        Arc::new(Self {
            table: Mutex::new(Table {
                entries: FxHashMap::default(),
                sink: None,
                disposed: false,
            }),
            grace_window,
            runtime,
            demand,
        })
    }

    /// Returns a receiver tracking how many channels are wanted.
    #[must_use]
    pub fn demand(&self) -> watch::Receiver<usize> {
        self.demand.subscribe()
    }

    // ------------------------------------------------------------------------
    // Acquire / Release
    // ------------------------------------------------------------------------

    /// Takes a reference on `key`, creating the subscription if needed.
    ///
    /// Never blocks. The subscribe intent is written now if connected,
    /// otherwise on the next connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn acquire(&self, key: ChannelKey) -> Result<SubscriptionHandle> {
        let mut table = self.table.lock();
        if table.disposed {
            return Err(Error::Disposed);
        }

        let Table { entries, sink, .. } = &mut *table;
        let entry = entries.entry(key.clone()).or_insert_with(Subscription::new);

        if entry.removal.is_some() {
            debug!(channel = %key, "Re-acquired within grace window");
            entry.cancel_removal();
        }
        entry.ref_count += 1;
        trace!(channel = %key, ref_count = entry.ref_count, "Subscription acquired");

        if entry.pending_send
            && let Some(sink) = sink
        {
            send_subscribe(sink, &key, entry);
        }

        let len = entries.len();
        drop(table);
        self.publish_demand(len);

        Ok(SubscriptionHandle { key })
    }

    /// Returns a reference taken by [`acquire`](Self::acquire).
    ///
    /// When the last reference goes, removal is scheduled after the grace
    /// window instead of happening immediately.
    pub fn release(self: &Arc<Self>, handle: SubscriptionHandle) {
        let SubscriptionHandle { key } = handle;
        let mut table = self.table.lock();

        let Some(entry) = table.entries.get_mut(&key) else {
            return;
        };

        if entry.ref_count == 0 {
            warn!(channel = %key, "Release without a matching acquire");
            return;
        }
        entry.ref_count -= 1;
        trace!(channel = %key, ref_count = entry.ref_count, "Subscription released");

        if entry.ref_count > 0 {
            return;
        }

        entry.cancel_removal();
        let generation = entry.generation;
        let registry = Arc::downgrade(self);
        let grace = self.grace_window;
        let timer_key = key.clone();

        entry.removal = Some(self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            expire(&registry, &timer_key, generation);
        }));

        debug!(channel = %key, grace_ms = grace.as_millis() as u64, "Removal scheduled");
    }

    /// Removes `key` if its scheduled removal is still current.
    fn expire(&self, key: &ChannelKey, generation: u64) {
        let mut table = self.table.lock();

        let current = table
            .entries
            .get(key)
            .is_some_and(|entry| entry.ref_count == 0 && entry.generation == generation);
        if !current {
            return;
        }

        let Some(entry) = table.entries.remove(key) else {
            return;
        };

        if !entry.pending_send
            && let Some(sink) = &table.sink
            && let Err(e) = sink.send(&ClientFrame::unsubscribe(key.clone()))
        {
            debug!(channel = %key, error = %e, "Unsubscribe not written");
        }
        debug!(channel = %key, "Subscription removed");

        let len = table.entries.len();
        drop(table);
        self.publish_demand(len);
    }

    // ------------------------------------------------------------------------
    // Connection Events
    // ------------------------------------------------------------------------

    /// Writes subscribe intents for every wanted channel on a new connection.
    pub fn on_connected(&self, sink: FrameSink) {
        let mut table = self.table.lock();
        if table.disposed {
            return;
        }

        let mut resent = 0usize;
        for (key, entry) in &mut table.entries {
            if entry.ref_count > 0 && entry.pending_send {
                send_subscribe(&sink, key, entry);
                resent += 1;
            }
        }
        table.sink = Some(sink);

        debug!(channels = resent, "Subscriptions restored");
    }

    /// Marks every subscription as needing a fresh subscribe intent.
    pub fn on_disconnected(&self) {
        let mut table = self.table.lock();
        table.sink = None;
        for entry in table.entries.values_mut() {
            entry.pending_send = true;
        }
    }

    // ------------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------------

    /// Applies the per-channel ordering check to an inbound message.
    ///
    /// Accepting a sequenced message advances the channel's last applied
    /// sequence; unsequenced messages are always accepted.
    pub fn admit(&self, message: &InboundMessage) -> Admission {
        let mut table = self.table.lock();

        let Some(entry) = table.entries.get_mut(&message.key) else {
            return Admission::Unknown;
        };

        match message.seq {
            Some(seq) if !seq.supersedes(entry.last_applied_seq) => Admission::Stale {
                last: entry.last_applied_seq.unwrap_or(seq),
            },
            Some(seq) => {
                entry.last_applied_seq = Some(seq);
                Admission::Accepted
            }
            None => Admission::Accepted,
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Cancels every grace timer and drops all subscriptions.
    ///
    /// No unsubscribe intents are written. Idempotent.
    pub fn dispose(&self) {
        let mut table = self.table.lock();
        if table.disposed {
            return;
        }
        table.disposed = true;
        table.sink = None;

        for (_, mut entry) in table.entries.drain() {
            entry.cancel_removal();
        }
        drop(table);

        self.publish_demand(0);
        debug!("Channel registry disposed");
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Returns a snapshot of the subscription for `key`.
    #[must_use]
    pub fn subscription(&self, key: &ChannelKey) -> Option<SubscriptionInfo> {
        let table = self.table.lock();
        table.entries.get(key).map(|entry| SubscriptionInfo {
            key: key.clone(),
            ref_count: entry.ref_count,
            last_applied_seq: entry.last_applied_seq,
            pending_send: entry.pending_send,
            releasing: entry.removal.is_some(),
        })
    }

    /// Returns `true` if `key` has an entry (live or within grace).
    #[must_use]
    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.table.lock().entries.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish_demand(&self, len: usize) {
        self.demand.send_if_modified(|current| {
            if *current == len {
                false
            } else {
                *current = len;
                true
            }
        });
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn send_subscribe(sink: &FrameSink, key: &ChannelKey, entry: &mut Subscription) {
    match sink.send(&ClientFrame::subscribe(key.clone())) {
        Ok(()) => entry.pending_send = false,
        Err(e) => debug!(channel = %key, error = %e, "Subscribe deferred"),
    }
}

fn expire(registry: &Weak<ChannelRegistry>, key: &ChannelKey, generation: u64) {
    if let Some(registry) = registry.upgrade() {
        registry.expire(key, generation);
    }
}

// ============================================================================
// Tests
// ============================================================================
