//! Channel and backend trait seams.
//!
//! The supervisor talks to the outside world only through these traits, so
//! tests can drive it with scripted fakes instead of real sockets.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::Notification;

/// A single signal observed on the push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// The subscription is established and streaming.
    Opened,
    /// A notification payload arrived.
    Notification(Notification),
    /// Any other inbound signal proving the channel is alive.
    KeepAlive,
}

/// Handle for one active push subscription.
///
/// Dropping the handle (or calling [`close`](PushHandle::close), which is
/// safe to call repeatedly) tears the underlying transport down. Once the
/// transport dies on its own, [`recv`](PushHandle::recv) returns `None`.
#[derive(Debug)]
pub struct PushHandle {
    events: mpsc::Receiver<PushEvent>,
    cancel: CancellationToken,
}

impl PushHandle {
    pub fn new(events: mpsc::Receiver<PushEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Receive the next push event. `None` means the transport is gone.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    /// Tear down the transport. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Persistent push channel: a server-initiated event stream.
///
/// A single `open()` call yields at most one active transport.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, tenant_id: &str) -> Result<PushHandle>;
}

/// Periodic pull channel: fetches the server-computed *active* snapshot,
/// never a delta.
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    async fn fetch(&self, tenant_id: &str) -> Result<Vec<Notification>>;
}

/// Backend mutation calls consumed by the optimistic read/dismiss flow.
///
/// The engine only needs success/failure to commit or roll back a local
/// mutation; persistence is owned by the backend.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn mark_read(&self, id: &str) -> Result<()>;
    async fn dismiss(&self, id: &str) -> Result<()>;
    async fn mark_all_read(&self) -> Result<()>;
}
