//! Events emitted by the delivery engine.

use tokio::sync::broadcast;

use crate::model::{ChannelStatus, Notification};
use crate::toast::ToastEntry;

/// Events observable by the application.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A logical notification was surfaced for the first time this session,
    /// regardless of which channel observed it.
    Received(Notification),
    /// The supervisor's channel status changed.
    StatusChanged(ChannelStatus),
    /// A toast became visible.
    ToastShown(ToastEntry),
    /// A toast was dismissed by the user.
    ToastDismissed(String),
    /// A toast auto-hid after its delay.
    ToastExpired(String),
}

/// Broadcaster for engine events.
pub struct EngineEventBroadcaster {
    sender: broadcast::Sender<EngineEvent>,
}

impl EngineEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Lagging or absent receivers are not an error.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EngineEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EngineEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
