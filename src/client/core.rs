//! Real-time client facade.
//!
//! The [`RealtimeClient`] is the only surface the application uses. It wires
//! the connection manager, channel registry and message router together and
//! exposes `subscribe` plus the connection-status observable.
//!
//! # Example
//!
//! ```no_run
//! use fleet_realtime::RealtimeClient;
//!
//! # async fn example() -> fleet_realtime::Result<()> {
//! let client = RealtimeClient::builder()
//!     .endpoint("wss://api.example.com/realtime")
//!     .build()?;
//!
//! client.connect("bearer-token").await?;
//!
//! let subscription = client.subscribe(
//!     "task.tracking",
//!     [("taskId", "T1")],
//!     |event, payload| println!("{event}: {payload}"),
//! )?;
//!
//! // Later, when the view goes away:
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::channel::{ChannelRegistry, MessageCallback, MessageRouter, RouterStats, SubscriptionInfo};
use crate::connection::{ConnectionManager, ConnectionStatus, LinkListener, TokenSource};
use crate::error::{Error, Result};
use crate::identifiers::ConsumerId;
use crate::protocol::{ChannelKey, InboundMessage};
use crate::transport::{FrameSink, Transport};

use super::builder::ClientBuilder;
use super::options::RealtimeOptions;
use super::subscription::Unsubscribe;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Connection supervisor handle.
    pub manager: ConnectionManager,

    /// Source of truth for wanted channels.
    pub registry: Arc<ChannelRegistry>,

    /// Consumer dispatch.
    pub router: Arc<MessageRouter>,

    /// Set once by `dispose`.
    pub disposed: AtomicBool,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.registry.dispose();
    }
}

/// Forwards connection events to the registry and router.
struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    router: Arc<MessageRouter>,
}

impl LinkListener for Dispatcher {
    fn on_connected(&self, sink: FrameSink) {
        self.registry.on_connected(sink);
    }

    fn on_disconnected(&self) {
        self.registry.on_disconnected();
    }

    fn on_message(&self, message: InboundMessage) {
        self.router.route(&message);
    }

    fn on_malformed(&self) {
        self.router.record_malformed();
    }
}

// ============================================================================
// RealtimeClient
// ============================================================================

/// Real-time connection and subscription client.
///
/// Cloning is cheap and shares the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    /// Shared inner state.
    pub(crate) inner: Arc<ClientInner>,
}

// ============================================================================
// RealtimeClient - Display
// ============================================================================

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.inner.manager.state())
            .field("subscriptions", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RealtimeClient - Construction
// ============================================================================

impl RealtimeClient {
    /// Creates a configuration builder for the client.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Wires the components together and starts the supervisor.
    pub(crate) fn new(
        endpoint: Url,
        transport: Arc<dyn Transport>,
        tokens: Option<Arc<dyn TokenSource>>,
        options: &RealtimeOptions,
        runtime: Handle,
    ) -> Self {
        let registry = ChannelRegistry::new(options.grace_window, runtime);
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));

        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::clone(&registry),
            router: Arc::clone(&router),
        });

        let manager = ConnectionManager::spawn(
            endpoint,
            transport,
            tokens,
            options,
            dispatcher,
            registry.demand(),
        );

        info!("Real-time client started");

        Self {
            inner: Arc::new(ClientInner {
                manager,
                registry,
                router,
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// RealtimeClient - Subscriptions
// ============================================================================

impl RealtimeClient {
    /// Subscribes to a channel.
    ///
    /// Returns immediately; delivery starts once connected. Consumers of the
    /// same `(channel_id, params)` share one wire-level subscription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn subscribe<K, V, F>(
        &self,
        channel_id: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
        on_message: F,
    ) -> Result<Unsubscribe>
    where
        K: Into<String>,
        V: Into<String>,
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.subscribe_key(ChannelKey::new(channel_id, params), on_message)
    }

    /// Subscribes to a channel identified by a prepared key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn subscribe_key<F>(&self, key: ChannelKey, on_message: F) -> Result<Unsubscribe>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.ensure_active()?;

        let consumer = ConsumerId::next();
        let callback: MessageCallback = Arc::new(on_message);
        let inner = &self.inner;

        // Registered first so nothing delivered right after acquire is missed.
        inner.router.register(key.clone(), consumer, callback);

        let handle = match inner.registry.acquire(key.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                inner.router.unregister(&key, consumer);
                return Err(e);
            }
        };

        debug!(channel = %key, %consumer, "Subscribed");

        Ok(Unsubscribe::new(
            consumer,
            handle,
            Arc::clone(&inner.registry),
            Arc::clone(&inner.router),
        ))
    }

    /// Returns a snapshot of the subscription for `key`, if any.
    #[must_use]
    pub fn subscription(&self, key: &ChannelKey) -> Option<SubscriptionInfo> {
        self.inner.registry.subscription(key)
    }

    /// Returns the router counters.
    #[must_use]
    pub fn router_stats(&self) -> RouterStats {
        self.inner.router.stats()
    }
}

// ============================================================================
// RealtimeClient - Connection
// ============================================================================

impl RealtimeClient {
    /// Connects with `token`, suspending until the handshake resolves.
    ///
    /// No-op when already connected with the same token; a different token
    /// cycles the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if the token was rejected
    /// - [`Error::Connection`] / [`Error::WebSocket`] / [`Error::ConnectionTimeout`]
    ///   if the attempt failed transiently; retries continue in the background
    /// - [`Error::Disposed`] after [`dispose`](Self::dispose)
    pub async fn connect(&self, token: impl Into<String>) -> Result<()> {
        self.ensure_active()?;
        self.inner.manager.connect(token).await
    }

    /// Closes the connection. Subscriptions are kept and restored on the
    /// next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        self.inner.manager.disconnect().await;
    }

    /// Forgets the connect token (logout) and disconnects.
    pub async fn clear_token(&self) {
        self.inner.manager.clear_token().await;
    }

    /// Returns the current connection status.
    #[inline]
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.manager.status()
    }

    /// Returns a receiver observing every connection status transition.
    #[inline]
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.manager.watch()
    }
}

// ============================================================================
// RealtimeClient - Lifecycle
// ============================================================================

impl RealtimeClient {
    /// Shuts the client down: closes the connection, cancels grace timers and
    /// drops every subscription. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.manager.shutdown().await;
        self.inner.registry.dispose();
        self.inner.router.clear();

        info!("Real-time client disposed");
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(())
    }
}
