//! Supervisor configuration.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::error::{NotifyError, Result};

/// Configuration for the channel supervisor and toast queue.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Window of total push silence (including keep-alives) treated as a
    /// transport failure.
    pub heartbeat_timeout: Duration,
    /// Backoff between push reconnect attempts.
    pub reconnect: ReconnectPolicy,
    /// Consecutive push failures before polling takes over and push is
    /// disabled. This is the single fallback threshold; there is no separate
    /// per-channel counter.
    pub fallback_threshold: u32,
    /// Overall push attempt budget. Only reachable when configured below the
    /// fallback threshold; exhausting it is terminal until a restart.
    pub max_push_attempts: u32,
    /// Upper bound on a single push `open()` attempt. A hanging connect
    /// counts as a failed attempt once this elapses.
    pub connect_timeout: Duration,
    /// Fixed cadence of the pull loop while in fallback.
    pub poll_interval: Duration,
    /// How long to wait between background push recovery probes.
    pub probe_interval: Duration,
    /// Maximum number of simultaneously visible toasts.
    pub toast_capacity: usize,
    /// How long a dismissible toast stays up before auto-hiding.
    pub toast_auto_hide: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(45),
            reconnect: ReconnectPolicy::default(),
            fallback_threshold: 3,
            max_push_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(60),
            toast_capacity: 3,
            toast_auto_hide: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout.is_zero() {
            return Err(NotifyError::invalid_config("heartbeat_timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(NotifyError::invalid_config("connect_timeout must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(NotifyError::invalid_config("poll_interval must be non-zero"));
        }
        if self.probe_interval.is_zero() {
            return Err(NotifyError::invalid_config("probe_interval must be non-zero"));
        }
        if self.fallback_threshold == 0 {
            return Err(NotifyError::invalid_config("fallback_threshold must be at least 1"));
        }
        if self.max_push_attempts == 0 {
            return Err(NotifyError::invalid_config("max_push_attempts must be at least 1"));
        }
        if self.toast_capacity == 0 {
            return Err(NotifyError::invalid_config("toast_capacity must be at least 1"));
        }
        if self.reconnect.base_delay.is_zero() {
            return Err(NotifyError::invalid_config("reconnect base_delay must be non-zero"));
        }
        Ok(())
    }
}
