//! Reconnect backoff policy and retry accounting.
//!
//! Pure computation only; the supervisor runtime owns the actual timers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Exponential backoff with a hard cap and optional jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt; doubles per consecutive failure.
    pub base_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Spread delays by up to half the base delay so simultaneous clients
    /// reconnect staggered.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-indexed):
    /// `base * 2^attempt`, capped at `max_delay`, plus optional jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Shift widths of 32+ and Duration multiplication both saturate to
        // the cap instead of overflowing.
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let uncapped = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        let capped = uncapped.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // The jittered delay may never breach the cap, so the spread is the
        // smaller of base/2 and the headroom left under `max_delay`.
        let spread_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let headroom_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit_ms = spread_ms.min(headroom_ms);
        if limit_ms == 0 {
            return capped;
        }

        let extra_ms = rand::rng().random_range(0..limit_ms);
        (capped + Duration::from_millis(extra_ms)).min(self.max_delay)
    }
}

/// Consecutive-failure accounting for the push channel.
///
/// Reset to zero on any successful connection.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Consecutive failed attempts since the last successful connection.
    pub attempt_count: u32,
    /// When the most recent failure was observed.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl RetryState {
    /// Record a failed attempt, returning the new consecutive count.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> u32 {
        self.attempt_count += 1;
        self.last_error_at = Some(now);
        self.attempt_count
    }

    /// Clear all counters after a successful connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether the attempt budget is spent.
    pub fn budget_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }
}
