//! Push channel liveness detection.

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Detects silence on the push channel.
///
/// Every inbound signal (keep-alive or notification) must call [`reset`].
/// When no reset arrives within the window, [`stale`] resolves exactly once
/// and the monitor disarms itself until it is explicitly re-armed; it can
/// never fire after [`disarm`].
///
/// [`reset`]: HeartbeatMonitor::reset
/// [`stale`]: HeartbeatMonitor::stale
/// [`disarm`]: HeartbeatMonitor::disarm
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a disarmed monitor with the given silence window.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Push the stale deadline out by the full window. Also arms a disarmed
    /// monitor.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Stop watching. A pending [`stale`](HeartbeatMonitor::stale) future
    /// will never resolve after this.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the silence window elapses, then disarms.
    ///
    /// Cancel-safe: the deadline lives on the monitor, so dropping the future
    /// (e.g. when another `select!` branch wins) loses nothing.
    pub async fn stale(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
