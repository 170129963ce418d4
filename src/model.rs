//! Notification wire and domain types.
//!
//! Wire names follow the backend's camelCase JSON convention; severity values
//! travel as upper-case strings (`INFO`, `WARNING`, ...).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity/category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Informational message
    #[default]
    Info,
    /// Warning that may need attention
    Warning,
    /// Error condition
    Error,
    /// Successful operation
    Success,
    /// Platform/system announcement
    System,
}

/// A single notification as delivered by the backend.
///
/// `id` is server-assigned and globally unique within a tenant session; it is
/// the deduplication key across the push and pull channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server-assigned unique ID
    pub id: String,
    /// Severity/category
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Short title
    pub title: String,
    /// Longer body text (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server-side creation time
    pub created_at: DateTime<Utc>,
    /// Whether the user has read the notification
    #[serde(default)]
    pub is_read: bool,
    /// Whether the user has dismissed the notification
    #[serde(default)]
    pub is_dismissed: bool,
    /// Whether the notification may be dismissed / auto-hidden
    #[serde(default = "default_dismissible")]
    pub is_dismissible: bool,
    /// Expiry after which the notification is no longer active (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Target URL for the call-to-action (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Label for the call-to-action (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    /// Backend-specific metadata (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_dismissible() -> bool {
    true
}

impl Notification {
    /// Create a minimal notification. Mostly useful for tests and fakes.
    pub fn new(
        id: impl Into<String>,
        kind: NotificationType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            message: None,
            created_at: Utc::now(),
            is_read: false,
            is_dismissed: false,
            is_dismissible: true,
            expires_at: None,
            action_url: None,
            action_label: None,
            metadata: None,
        }
    }

    /// A notification is active while it is neither dismissed nor expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_dismissed && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// How the engine is currently receiving notifications.
///
/// Exactly one [`ChannelSupervisor`](crate::supervisor::ChannelSupervisor)
/// owns this value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Attempting to establish the push channel
    Connecting,
    /// Receiving notifications (push or poll fallback)
    Connected,
    /// No active session
    Disconnected,
    /// Retry budget exhausted; requires an explicit restart
    Error,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Envelope returned by the snapshot endpoint: `{data, meta}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub data: Vec<Notification>,
    #[serde(default)]
    pub meta: SnapshotMeta,
}

/// Paging metadata accompanying a snapshot response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub per_page: u32,
}
