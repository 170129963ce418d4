//! Bounded ephemeral toast queue.
//!
//! Pure bookkeeping: the supervisor runtime drives auto-hide via
//! [`next_expiry`](ToastQueue::next_expiry) / [`expire`](ToastQueue::expire).
//! The queue is a best-effort surface, not a guaranteed inbox; overflow
//! silently drops the oldest dismissible entry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use tokio::time::Instant;

use crate::model::Notification;

/// One visible toast.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastEntry {
    pub notification_id: String,
    pub shown_at: DateTime<Utc>,
    /// Auto-hide deadline; `None` for non-dismissible entries, which never
    /// auto-remove.
    pub deadline: Option<Instant>,
    pub dismissible: bool,
}

/// Bounded toast queue with a session-lifetime "shown" set.
///
/// Invariants:
/// - at most `capacity` entries are visible;
/// - non-dismissible entries precede dismissible ones and are never evicted;
/// - an id is toasted at most once per session, even if a later poll
///   re-observes it.
#[derive(Debug)]
pub struct ToastQueue {
    capacity: usize,
    auto_hide: Duration,
    /// Non-dismissible block first, then dismissible, each oldest-first.
    entries: Vec<ToastEntry>,
    shown: FxHashSet<String>,
}

impl ToastQueue {
    pub fn new(capacity: usize, auto_hide: Duration) -> Self {
        Self {
            capacity,
            auto_hide,
            entries: Vec::new(),
            shown: FxHashSet::default(),
        }
    }

    /// Offer a newly observed notification for display.
    ///
    /// Returns the created entry, or `None` when nothing became visible:
    /// inactive notification, already shown this session, or dropped by the
    /// capacity rule. Either way the id counts as shown from here on.
    /// When every slot holds a non-dismissible entry the newcomer is the one
    /// dropped; existing non-dismissible entries are never displaced.
    pub fn offer(&mut self, notification: &Notification, now: DateTime<Utc>) -> Option<ToastEntry> {
        if !notification.is_active(now) {
            return None;
        }
        if !self.shown.insert(notification.id.clone()) {
            return None;
        }

        let entry = ToastEntry {
            notification_id: notification.id.clone(),
            shown_at: now,
            deadline: notification
                .is_dismissible
                .then(|| Instant::now() + self.auto_hide),
            dismissible: notification.is_dismissible,
        };

        let insert_at = if entry.dismissible {
            self.entries.len()
        } else {
            // End of the non-dismissible block.
            self.entries
                .iter()
                .position(|e| e.dismissible)
                .unwrap_or(self.entries.len())
        };
        self.entries.insert(insert_at, entry.clone());

        if self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .position(|e| e.dismissible)
                .unwrap_or(insert_at);
            let removed = self.entries.remove(victim);
            if removed.notification_id == notification.id {
                return None;
            }
        }
        Some(entry)
    }

    /// Remove a toast by notification id. Returns whether one was visible.
    pub fn dismiss(&mut self, notification_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.notification_id != notification_id);
        self.entries.len() != before
    }

    /// Remove and return every entry whose auto-hide deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<ToastEntry> {
        let (expired, kept) = self
            .entries
            .drain(..)
            .partition(|e| e.deadline.is_some_and(|deadline| deadline <= now));
        self.entries = kept;
        expired
    }

    /// Earliest pending auto-hide deadline, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|e| e.deadline).min()
    }

    /// Currently visible toasts, non-dismissible first.
    pub fn visible(&self) -> Vec<ToastEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an id has already been toasted this session.
    pub fn has_shown(&self, notification_id: &str) -> bool {
        self.shown.contains(notification_id)
    }

    /// Drop all entries and forget the shown set (tenant teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.shown.clear();
    }
}
