//! Canonical set of known notifications.
//!
//! The store is the single shared mutable resource of the engine. Writes are
//! atomic per notification (map upsert by id), so readers never observe a
//! partially updated entry, and the merge is commutative: push and poll may
//! observe the same notification in either order and converge on the same
//! state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::model::Notification;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change notifications emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted(String),
    Updated(String),
    Cleared,
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Observable, id-keyed notification map.
pub struct DeliveryStore {
    entries: RwLock<HashMap<String, Notification>>,
    changes: broadcast::Sender<StoreChange>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Subscribe to store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Merge a notification into the store by id union.
    ///
    /// Local `is_read`/`is_dismissed` flags are monotonic: once true, an
    /// incoming `false` (e.g. a stale poll racing an optimistic mutation)
    /// never reverts them.
    pub fn upsert(&self, incoming: Notification) -> Upsert {
        let mut entries = self.entries.write();
        let id = incoming.id.clone();

        let outcome = match entries.get_mut(&id) {
            None => {
                entries.insert(id.clone(), incoming);
                Upsert::Inserted
            }
            Some(existing) => {
                let mut merged = incoming;
                merged.is_read |= existing.is_read;
                merged.is_dismissed |= existing.is_dismissed;
                if merged == *existing {
                    Upsert::Unchanged
                } else {
                    *existing = merged;
                    Upsert::Updated
                }
            }
        };
        drop(entries);

        match outcome {
            Upsert::Inserted => {
                let _ = self.changes.send(StoreChange::Inserted(id));
            }
            Upsert::Updated => {
                let _ = self.changes.send(StoreChange::Updated(id));
            }
            Upsert::Unchanged => {}
        }
        outcome
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Active notifications, newest first.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut list: Vec<Notification> = self
            .entries
            .read()
            .values()
            .filter(|n| n.is_active(now))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Count of active, unread notifications.
    pub fn unread_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .read()
            .values()
            .filter(|n| n.is_active(now) && !n.is_read)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Set the read flag, returning the prior value for rollback.
    /// `None` when the id is unknown.
    pub fn set_read(&self, id: &str, read: bool) -> Option<bool> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id)?;
        let prior = entry.is_read;
        entry.is_read = read;
        drop(entries);
        if prior != read {
            let _ = self.changes.send(StoreChange::Updated(id.to_string()));
        }
        Some(prior)
    }

    /// Set the dismissed flag, returning the prior value for rollback.
    /// `None` when the id is unknown.
    pub fn set_dismissed(&self, id: &str, dismissed: bool) -> Option<bool> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id)?;
        let prior = entry.is_dismissed;
        entry.is_dismissed = dismissed;
        drop(entries);
        if prior != dismissed {
            let _ = self.changes.send(StoreChange::Updated(id.to_string()));
        }
        Some(prior)
    }

    /// Flip every unread notification to read, returning the affected ids so
    /// a failed backend call can roll them back.
    pub fn mark_all_read(&self) -> Vec<String> {
        let mut entries = self.entries.write();
        let mut flipped = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if !entry.is_read {
                entry.is_read = true;
                flipped.push(id.clone());
            }
        }
        drop(entries);
        for id in &flipped {
            let _ = self.changes.send(StoreChange::Updated(id.clone()));
        }
        flipped
    }

    /// Drop every entry (tenant teardown).
    pub fn clear(&self) {
        self.entries.write().clear();
        let _ = self.changes.send(StoreChange::Cleared);
    }
}

impl Default for DeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}
