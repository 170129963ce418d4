//! Public facade over the delivery engine.
//!
//! Wires the channel supervisor, delivery store and toast queue together and
//! exposes the read/mutate surface a frontend consumes. Mutations are
//! optimistic: the local flag flips immediately and is rolled back if the
//! backend rejects the call.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::model::{ChannelStatus, Notification};
use crate::store::DeliveryStore;
use crate::supervisor::ChannelSupervisor;
use crate::toast::{ToastEntry, ToastQueue};
use crate::transport::{NotificationApi, PushTransport, SnapshotClient};

pub struct NotificationService {
    store: Arc<DeliveryStore>,
    toasts: Arc<Mutex<ToastQueue>>,
    api: Arc<dyn NotificationApi>,
    supervisor: ChannelSupervisor,
}

impl NotificationService {
    pub fn new(
        push: Arc<dyn PushTransport>,
        snapshots: Arc<dyn SnapshotClient>,
        api: Arc<dyn NotificationApi>,
        config: SupervisorConfig,
    ) -> Result<Self> {
        let store = Arc::new(DeliveryStore::new());
        let toasts = Arc::new(Mutex::new(ToastQueue::new(
            config.toast_capacity,
            config.toast_auto_hide,
        )));
        let supervisor =
            ChannelSupervisor::new(push, snapshots, store.clone(), toasts.clone(), config)?;
        Ok(Self {
            store,
            toasts,
            api,
            supervisor,
        })
    }

    /// Start delivery for a tenant and return the event stream.
    ///
    /// The receiver is created before the session spawns, so no event of the
    /// new session can be missed. Calling this again for the same tenant only
    /// hands out a fresh receiver; a different tenant restarts the session.
    pub fn subscribe(&self, tenant_id: &str) -> broadcast::Receiver<EngineEvent> {
        let events = self.supervisor.subscribe();
        self.supervisor.start(tenant_id);
        events
    }

    /// Tear down the active session. Notifications stay readable; toasts are
    /// cleared with the session.
    pub fn unsubscribe(&self) {
        self.supervisor.stop();
    }

    /// Additional event receiver without touching the session.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.supervisor.subscribe()
    }

    pub fn status(&self) -> ChannelStatus {
        self.supervisor.status()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count(Utc::now())
    }

    /// Active (not dismissed, not expired) notifications, newest first.
    pub fn active_notifications(&self) -> Vec<Notification> {
        self.store.active(Utc::now())
    }

    pub fn visible_toasts(&self) -> Vec<ToastEntry> {
        self.toasts.lock().visible()
    }

    /// Flag a notification as read locally, then confirm with the backend.
    /// Unknown ids are ignored; an already-read notification skips the
    /// backend round trip.
    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let Some(prior) = self.store.set_read(id, true) else {
            debug!(id, "mark_read for unknown notification, ignoring");
            return Ok(());
        };
        if prior {
            return Ok(());
        }
        if let Err(e) = self.api.mark_read(id).await {
            warn!(id, error = %e, "mark_read rejected by backend, rolling back");
            self.store.set_read(id, false);
            return Err(e);
        }
        Ok(())
    }

    /// Dismiss a notification. Any matching toast is hidden immediately and
    /// stays hidden even if the backend call fails; only the store flag is
    /// rolled back.
    pub async fn dismiss(&self, id: &str) -> Result<()> {
        let Some(prior) = self.store.set_dismissed(id, true) else {
            debug!(id, "dismiss for unknown notification, ignoring");
            return Ok(());
        };
        if self.toasts.lock().dismiss(id) {
            self.supervisor
                .broadcaster()
                .publish(EngineEvent::ToastDismissed(id.to_string()));
        }
        if prior {
            return Ok(());
        }
        if let Err(e) = self.api.dismiss(id).await {
            warn!(id, error = %e, "dismiss rejected by backend, rolling back");
            self.store.set_dismissed(id, false);
            return Err(e);
        }
        Ok(())
    }

    /// Mark every unread notification read. On backend failure only the
    /// entries flipped by this call are rolled back.
    pub async fn mark_all_read(&self) -> Result<()> {
        let flipped = self.store.mark_all_read();
        if flipped.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.api.mark_all_read().await {
            warn!(
                count = flipped.len(),
                error = %e,
                "mark_all_read rejected by backend, rolling back"
            );
            for id in &flipped {
                self.store.set_read(id, false);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Hide a toast without touching the notification itself.
    pub fn dismiss_toast(&self, id: &str) -> bool {
        let dismissed = self.toasts.lock().dismiss(id);
        if dismissed {
            self.supervisor
                .broadcaster()
                .publish(EngineEvent::ToastDismissed(id.to_string()));
        }
        dismissed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::model::NotificationType;
    use crate::transport::PushHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;

    struct IdlePush;

    #[async_trait]
    impl PushTransport for IdlePush {
        async fn open(&self, _tenant_id: &str) -> Result<PushHandle> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(PushHandle::new(rx, CancellationToken::new()))
        }
    }

    struct EmptySnapshots;

    #[async_trait]
    impl SnapshotClient for EmptySnapshots {
        async fn fetch(&self, _tenant_id: &str) -> Result<Vec<Notification>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingApi {
        fail: AtomicBool,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingApi {
        fn check(&self, call: String) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotifyError::transport("backend offline"));
            }
            self.calls.lock().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationApi for RecordingApi {
        async fn mark_read(&self, id: &str) -> Result<()> {
            self.check(format!("read:{id}"))
        }

        async fn dismiss(&self, id: &str) -> Result<()> {
            self.check(format!("dismiss:{id}"))
        }

        async fn mark_all_read(&self) -> Result<()> {
            self.check("read-all".into())
        }
    }

    fn service_with_api(api: Arc<RecordingApi>) -> NotificationService {
        NotificationService::new(
            Arc::new(IdlePush),
            Arc::new(EmptySnapshots),
            api,
            SupervisorConfig::default(),
        )
        .unwrap()
    }

    fn seeded(api: Arc<RecordingApi>, ids: &[&str]) -> NotificationService {
        let service = service_with_api(api);
        for id in ids {
            service
                .store
                .upsert(Notification::new(*id, NotificationType::Info, "hello"));
        }
        service
    }

    #[tokio::test]
    async fn mark_read_flips_locally_and_confirms() {
        let api = Arc::new(RecordingApi::default());
        let service = seeded(api.clone(), &["n-1"]);

        service.mark_read("n-1").await.unwrap();

        assert!(service.store.get("n-1").unwrap().is_read);
        assert_eq!(service.unread_count(), 0);
        assert_eq!(*api.calls.lock(), vec!["read:n-1".to_string()]);
    }

    #[tokio::test]
    async fn mark_read_rolls_back_on_backend_error() {
        let api = Arc::new(RecordingApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let service = seeded(api.clone(), &["n-1"]);

        assert!(service.mark_read("n-1").await.is_err());
        assert!(!service.store.get("n-1").unwrap().is_read);
    }

    #[tokio::test]
    async fn mark_read_unknown_id_is_a_noop() {
        let api = Arc::new(RecordingApi::default());
        let service = service_with_api(api.clone());

        service.mark_read("ghost").await.unwrap();
        assert!(api.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn mark_read_already_read_skips_backend() {
        let api = Arc::new(RecordingApi::default());
        let service = seeded(api.clone(), &["n-1"]);
        service.mark_read("n-1").await.unwrap();

        service.mark_read("n-1").await.unwrap();
        assert_eq!(api.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn dismiss_hides_the_notification_and_its_toast() {
        let api = Arc::new(RecordingApi::default());
        let service = seeded(api.clone(), &["n-1"]);
        let notification = service.store.get("n-1").unwrap();
        service.toasts.lock().offer(&notification, Utc::now());
        assert_eq!(service.visible_toasts().len(), 1);

        service.dismiss("n-1").await.unwrap();

        assert!(service.store.get("n-1").unwrap().is_dismissed);
        assert!(service.visible_toasts().is_empty());
        assert!(service.active_notifications().is_empty());
    }

    #[tokio::test]
    async fn mark_all_read_rolls_back_only_flipped_entries() {
        let api = Arc::new(RecordingApi::default());
        let service = seeded(api.clone(), &["n-1", "n-2"]);
        service.mark_read("n-1").await.unwrap();

        api.fail.store(true, Ordering::SeqCst);
        assert!(service.mark_all_read().await.is_err());

        // n-1 was read before the bulk call; it must stay read.
        assert!(service.store.get("n-1").unwrap().is_read);
        assert!(!service.store.get("n-2").unwrap().is_read);
    }

    #[tokio::test]
    async fn mark_all_read_with_nothing_unread_skips_backend() {
        let api = Arc::new(RecordingApi::default());
        let service = service_with_api(api.clone());

        service.mark_all_read().await.unwrap();
        assert!(api.calls.lock().is_empty());
    }
}
