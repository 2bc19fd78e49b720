//! Wire frames exchanged with the real-time endpoint.
//!
//! All frames are JSON text tagged by `"type"`.
//!
//! # Client → Server
//!
//! ```json
//! { "type": "subscribe",   "ref": "uuid", "channel": "task.tracking", "params": { "taskId": "T1" } }
//! { "type": "unsubscribe", "ref": "uuid", "channel": "task.tracking", "params": { "taskId": "T1" } }
//! ```
//!
//! # Server → Client
//!
//! ```json
//! { "type": "ack" }
//! { "type": "reject", "reason": "token expired" }
//! { "type": "message", "channel": "task.tracking", "params": { "taskId": "T1" },
//!   "event": "location", "payload": { ... }, "seq": 42 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str, to_string};

use crate::error::{Error, Result};
use crate::identifiers::FrameRef;

use super::channel::{ChannelKey, Sequence};

// ============================================================================
// ClientFrame
// ============================================================================

/// Intent sent from the client to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start delivering messages for a channel.
    Subscribe {
        /// Correlation reference.
        #[serde(rename = "ref")]
        frame_ref: FrameRef,
        /// Channel identity.
        #[serde(flatten)]
        key: ChannelKey,
    },

    /// Stop delivering messages for a channel.
    Unsubscribe {
        /// Correlation reference.
        #[serde(rename = "ref")]
        frame_ref: FrameRef,
        /// Channel identity.
        #[serde(flatten)]
        key: ChannelKey,
    },
}

impl ClientFrame {
    /// Creates a subscribe intent with a fresh reference.
    #[inline]
    #[must_use]
    pub fn subscribe(key: ChannelKey) -> Self {
        Self::Subscribe {
            frame_ref: FrameRef::generate(),
            key,
        }
    }

    /// Creates an unsubscribe intent with a fresh reference.
    #[inline]
    #[must_use]
    pub fn unsubscribe(key: ChannelKey) -> Self {
        Self::Unsubscribe {
            frame_ref: FrameRef::generate(),
            key,
        }
    }

    /// Returns the channel this intent targets.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        match self {
            Self::Subscribe { key, .. } | Self::Unsubscribe { key, .. } => key,
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(to_string(self)?)
    }
}

// ============================================================================
// ServerFrame
// ============================================================================

/// Frame sent from the endpoint to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    Ack,

    /// Token rejected, during handshake or mid-session.
    Reject {
        /// Reason given by the endpoint.
        #[serde(default)]
        reason: String,
    },

    /// Channel message.
    Message {
        /// Channel identity.
        #[serde(flatten)]
        key: ChannelKey,
        /// Event name.
        event: String,
        /// Opaque payload.
        #[serde(default)]
        payload: Value,
        /// Optional sequence marker.
        #[serde(default)]
        seq: Option<Sequence>,
    },
}

impl ServerFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not a known envelope.
    pub fn decode(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::protocol(format!("Malformed frame: {e}")))
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(to_string(self)?)
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// A channel message ready for routing.
///
/// Owned by the router for the duration of dispatch and never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Channel identity.
    pub key: ChannelKey,
    /// Event name.
    pub event: String,
    /// Opaque payload.
    pub payload: Value,
    /// Optional sequence marker.
    pub seq: Option<Sequence>,
}

impl InboundMessage {
    /// Creates a message without a sequence marker.
    #[inline]
    #[must_use]
    pub fn new(key: ChannelKey, event: impl Into<String>, payload: Value) -> Self {
        Self {
            key,
            event: event.into(),
            payload,
            seq: None,
        }
    }

    /// Attaches a sequence marker.
    #[inline]
    #[must_use]
    pub fn with_seq(mut self, seq: Sequence) -> Self {
        self.seq = Some(seq);
        self
    }
}

impl From<InboundMessage> for ServerFrame {
    fn from(message: InboundMessage) -> Self {
        Self::Message {
            key: message.key,
            event: message.event,
            payload: message.payload,
            seq: message.seq,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
