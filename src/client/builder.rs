//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`RealtimeClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fleet_realtime::{RealtimeClient, SharedToken};
//!
//! # async fn example() -> fleet_realtime::Result<()> {
//! let session = SharedToken::new();
//!
//! let client = RealtimeClient::builder()
//!     .endpoint("wss://api.example.com/realtime")
//!     .token_source(session.clone())
//!     .grace_window(Duration::from_millis(500))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use url::Url;

use crate::connection::TokenSource;
use crate::error::{Error, Result};
use crate::transport::{Transport, WsTransport};

use super::core::RealtimeClient;
use super::options::RealtimeOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`RealtimeClient`].
///
/// Use [`RealtimeClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Endpoint URL (`ws://` or `wss://`).
    endpoint: Option<String>,
    /// Transport; WebSocket when unset.
    transport: Option<Arc<dyn Transport>>,
    /// Ambient token source.
    tokens: Option<Arc<dyn TokenSource>>,
    /// Timing and retry options.
    options: RealtimeOptions,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("endpoint", &self.endpoint)
            .field("custom_transport", &self.transport.is_some())
            .field("token_source", &self.tokens.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the real-time endpoint URL.
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket URL, e.g. `wss://api.example.com/realtime`
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Replaces the WebSocket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replaces the transport with a shared instance.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the credential store read at every dial.
    ///
    /// A token passed to [`RealtimeClient::connect`] takes precedence until
    /// [`RealtimeClient::clear_token`] is called.
    #[inline]
    #[must_use]
    pub fn token_source(mut self, source: impl TokenSource) -> Self {
        self.tokens = Some(Arc::new(source));
        self
    }

    /// Replaces all timing and retry options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: RealtimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    /// Sets the zero-reference grace window.
    #[inline]
    #[must_use]
    pub fn grace_window(mut self, window: Duration) -> Self {
        self.options.grace_window = window;
        self
    }

    /// Builds the client and starts its supervisor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is missing, not `ws`/`wss`, or the
    ///   options are invalid
    /// - [`Error::Url`] if the endpoint does not parse
    /// - [`Error::Config`] outside a tokio runtime
    pub fn build(self) -> Result<RealtimeClient> {
        let endpoint = self.validate_endpoint()?;
        self.options.validate().map_err(Error::config)?;

        let runtime = Handle::try_current().map_err(|_| {
            Error::config(
                "RealtimeClient must be built inside a tokio runtime.\n\
                 Call build() from an async context.",
            )
        })?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new()));

        Ok(RealtimeClient::new(
            endpoint,
            transport,
            self.tokens,
            &self.options,
            runtime,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Validates the endpoint configuration.
    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self.endpoint.as_deref().ok_or_else(|| {
            Error::config(
                "Endpoint is required. Use .endpoint() to set it.\n\
                 Example: RealtimeClient::builder().endpoint(\"wss://host/realtime\")",
            )
        })?;

        let url = Url::parse(raw)?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Endpoint scheme must be ws or wss, got: {}",
                url.scheme()
            )));
        }

        Ok(url)
    }
}

// ============================================================================
// Tests
// ============================================================================
