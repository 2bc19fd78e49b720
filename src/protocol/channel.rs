//! Channel identity and sequence markers.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Identity-defining channel parameters.
///
/// A `BTreeMap` keeps the ordering canonical, so two requests listing the
/// same pairs in a different order hash to the same channel.
pub type ChannelParams = BTreeMap<String, String>;

// ============================================================================
// ChannelKey
// ============================================================================

/// Identity of a logical real-time channel: name plus parameters.
///
/// Two keys with the same name and the same parameter pairs are the same
/// subscription.
///
/// # Example
///
/// ```
/// use fleet_realtime::ChannelKey;
///
/// let key = ChannelKey::new("task.tracking", [("taskId", "T1")]);
/// assert_eq!(key.to_string(), "task.tracking{taskId=T1}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Channel name, e.g. `fleet.positions`.
    #[serde(rename = "channel")]
    pub channel_id: String,

    /// Identity-defining parameters.
    #[serde(default)]
    pub params: ChannelParams,
}

impl ChannelKey {
    /// Creates a key from a channel name and parameter pairs.
    #[must_use]
    pub fn new<K, V>(
        channel_id: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            channel_id: channel_id.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Creates a key for a channel without parameters.
    #[inline]
    #[must_use]
    pub fn bare(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            params: ChannelParams::new(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_id)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// Sequence
// ============================================================================

/// Monotonically comparable sequence marker.
///
/// Integer sequence numbers and timestamps (epoch milliseconds) share one
/// representation; a channel uses one or the other consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    /// Creates a sequence marker from an integer.
    #[inline]
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Creates a sequence marker from a timestamp in epoch milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Returns `true` if a message carrying `self` should be applied after
    /// `last` was applied. Equal markers are duplicates.
    #[inline]
    #[must_use]
    pub fn supersedes(self, last: Option<Sequence>) -> bool {
        last.is_none_or(|last| self > last)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
