//! Client timing and retry options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fleet_realtime::RealtimeOptions;
//!
//! let options = RealtimeOptions::new()
//!     .with_handshake_timeout(Duration::from_secs(5))
//!     .with_grace_window(Duration::from_millis(500))
//!     .with_max_reconnect_attempts(20);
//!
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::time::Duration;

use crate::connection::Backoff;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on dial + acknowledgement.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before a zero-reference subscription is torn down.
const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(2);

/// Default delay before an unused connection is closed.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of dial attempts before giving up.
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default query parameter carrying the bearer token.
const DEFAULT_TOKEN_PARAM: &str = "token";

/// Longest reconnect delay accepted by [`RealtimeOptions::validate`].
const MAX_BACKOFF_CAP: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// RealtimeOptions
// ============================================================================

/// Timing and retry configuration for a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeOptions {
    /// Bound on opening the connection and receiving the acknowledgement.
    pub handshake_timeout: Duration,

    /// Delay before a subscription whose last consumer left is torn down.
    pub grace_window: Duration,

    /// Delay before the connection is closed once no subscriptions remain.
    pub idle_timeout: Duration,

    /// Reconnect delay policy.
    pub backoff: Backoff,

    /// Dial attempts allowed since the last successful connection.
    pub max_reconnect_attempts: u32,

    /// Query parameter name carrying the token on the endpoint URL.
    pub token_param: Cow<'static, str>,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RealtimeOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            grace_window: DEFAULT_GRACE_WINDOW,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            backoff: Backoff::new(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            token_param: Cow::Borrowed(DEFAULT_TOKEN_PARAM),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RealtimeOptions {
    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the zero-reference grace window.
    #[inline]
    #[must_use]
    pub fn with_grace_window(mut self, window: Duration) -> Self {
        self.grace_window = window;
        self
    }

    /// Sets the idle timeout.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the maximum dial attempts between successful connections.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the token query parameter name.
    #[inline]
    #[must_use]
    pub fn with_token_param(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.token_param = name.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RealtimeOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout.is_zero() {
            return Err("Handshake timeout must be greater than zero".to_string());
        }

        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err("Backoff multiplier must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err("Backoff jitter must be within 0..=1".to_string());
        }

        if self.backoff.cap < self.backoff.base {
            return Err("Backoff cap must not be below the base delay".to_string());
        }

        if self.backoff.cap > MAX_BACKOFF_CAP {
            return Err(format!(
                "Backoff cap must not exceed {}s",
                MAX_BACKOFF_CAP.as_secs()
            ));
        }

        if self.max_reconnect_attempts == 0 {
            return Err("At least one connection attempt must be allowed".to_string());
        }

        if self.token_param.is_empty() {
            return Err("Token parameter name must not be empty".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
