//! Reconnect backoff.
//!
//! Delays grow exponentially, `base * multiplier^attempt`, capped at `cap`,
//! then shortened by a random jitter fraction so many clients dropped at
//! once do not reconnect in lockstep.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

// ============================================================================
// Constants
// ============================================================================

/// Default first delay.
const DEFAULT_BASE: Duration = Duration::from_secs(1);

/// Default growth factor.
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default ceiling.
const DEFAULT_CAP: Duration = Duration::from_secs(30);

/// Default jitter fraction: delays land in `[raw / 2, raw]`.
const DEFAULT_JITTER: f64 = 0.5;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with jitter.
///
/// [`Backoff::delay`] is pure and takes the random sample as an argument;
/// [`Backoff::next_delay`] draws the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor per attempt (>= 1).
    pub multiplier: f64,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Fraction of the delay that may be shaved off at random (0..=1).
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// Creates the default policy: 1s base, x2, 30s cap, 0.5 jitter.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: DEFAULT_BASE,
            multiplier: DEFAULT_MULTIPLIER,
            cap: DEFAULT_CAP,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Sets the first delay.
    #[inline]
    #[must_use]
    pub const fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the ceiling.
    #[inline]
    #[must_use]
    pub const fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Sets the jitter fraction; clamped to `0..=1` when applied.
    #[inline]
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if raw.is_nan() || raw <= 0.0 {
            return Duration::ZERO;
        }

        let capped = raw.min(self.cap.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.cap)
    }

    /// Delay before retry number `attempt` given a uniform sample in `[0, 1)`.
    #[must_use]
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let sample = sample.clamp(0.0, 1.0);
        let ceiling = self.ceiling(attempt);
        let scaled = ceiling.as_secs_f64() * (1.0 - jitter * sample);

        // Rounding near Duration::MAX can overshoot; never exceed the ceiling
        Duration::try_from_secs_f64(scaled).map_or(ceiling, |delay| delay.min(ceiling))
    }

    /// Delay before retry number `attempt` with a random jitter sample.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::rng().random();
        self.delay(attempt, sample)
    }
}

// ============================================================================
// Tests
// ============================================================================
