//! Real-time protocol types.
//!
//! This module defines channel identity and the message format exchanged
//! with the real-time endpoint.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `ClientFrame::Subscribe` | Local → Remote | Start a channel |
//! | `ClientFrame::Unsubscribe` | Local → Remote | Stop a channel |
//! | `ServerFrame::Ack` | Remote → Local | Handshake accepted |
//! | `ServerFrame::Reject` | Remote → Local | Token rejected |
//! | `ServerFrame::Message` | Remote → Local | Channel event |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | [`ChannelKey`] and [`Sequence`] |
//! | `frame` | Wire frames and [`InboundMessage`] |

// ============================================================================
// Submodules
// ============================================================================

/// Channel identity and sequence markers.
pub mod channel;

/// Wire frames.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelKey, ChannelParams, Sequence};
pub use frame::{ClientFrame, InboundMessage, ServerFrame};
