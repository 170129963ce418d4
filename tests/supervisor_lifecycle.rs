//! End-to-end supervisor lifecycle tests against scripted channel fakes.
//!
//! All tests run on tokio's paused clock, so backoff windows, heartbeat
//! timeouts and poll cadences elapse instantly and deterministically.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use notistream::backoff::ReconnectPolicy;
use notistream::error::{NotifyError, Result};
use notistream::store::DeliveryStore;
use notistream::toast::ToastQueue;
use notistream::transport::{PushEvent, PushHandle, PushTransport, SnapshotClient};
use notistream::{
    ChannelStatus, ChannelSupervisor, EngineEvent, Notification, NotificationType,
    SupervisorConfig,
};

/// What the next `open()` call should do.
enum OpenScript {
    Fail,
    Reject,
    Hang,
    Connect(mpsc::Receiver<PushEvent>),
}

/// Push transport driven by a per-call script. Once the script runs out every
/// further open fails.
struct ScriptedPush {
    script: Mutex<VecDeque<OpenScript>>,
    opens: AtomicUsize,
}

impl ScriptedPush {
    fn new(script: Vec<OpenScript>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: AtomicUsize::new(0),
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedPush {
    async fn open(&self, _tenant_id: &str) -> Result<PushHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(OpenScript::Connect(rx)) => Ok(PushHandle::new(rx, CancellationToken::new())),
            Some(OpenScript::Reject) => Err(NotifyError::http_status(
                StatusCode::UNAUTHORIZED,
                "http://api.local/notifications/stream",
                "stream subscribe",
            )),
            Some(OpenScript::Hang) => pending().await,
            Some(OpenScript::Fail) | None => Err(NotifyError::transport("connection refused")),
        }
    }
}

/// Snapshot endpoint returning a swappable fixed page.
struct ScriptedSnapshots {
    page: Mutex<Vec<Notification>>,
    fetches: AtomicUsize,
    tenants: Mutex<Vec<String>>,
    /// When set for a tenant, fetches for that tenant park until notified.
    gate: Mutex<Option<(String, Arc<Notify>)>>,
}

impl ScriptedSnapshots {
    fn new(page: Vec<Notification>) -> Self {
        Self {
            page: Mutex::new(page),
            fetches: AtomicUsize::new(0),
            tenants: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn set_page(&self, page: Vec<Notification>) {
        *self.page.lock() = page;
    }

    fn gate_tenant(&self, tenant_id: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.gate.lock() = Some((tenant_id.to_string(), release.clone()));
        release
    }
}

#[async_trait]
impl SnapshotClient for ScriptedSnapshots {
    async fn fetch(&self, tenant_id: &str) -> Result<Vec<Notification>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.tenants.lock().push(tenant_id.to_string());
        let parked = match &*self.gate.lock() {
            Some((gated, release)) if gated == tenant_id => Some(release.clone()),
            _ => None,
        };
        if let Some(release) = parked {
            release.notified().await;
        }
        Ok(self.page.lock().clone())
    }
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_timeout: Duration::from_secs(45),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        },
        fallback_threshold: 3,
        max_push_attempts: 10,
        connect_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_secs(30),
        probe_interval: Duration::from_secs(60),
        toast_capacity: 3,
        toast_auto_hide: Duration::from_secs(5),
    }
}

struct Harness {
    supervisor: ChannelSupervisor,
    push: Arc<ScriptedPush>,
    snapshots: Arc<ScriptedSnapshots>,
    store: Arc<DeliveryStore>,
    toasts: Arc<Mutex<ToastQueue>>,
}

fn harness(
    script: Vec<OpenScript>,
    page: Vec<Notification>,
    config: SupervisorConfig,
) -> Harness {
    let push = Arc::new(ScriptedPush::new(script));
    let snapshots = Arc::new(ScriptedSnapshots::new(page));
    let store = Arc::new(DeliveryStore::new());
    let toasts = Arc::new(Mutex::new(ToastQueue::new(
        config.toast_capacity,
        config.toast_auto_hide,
    )));
    let supervisor = ChannelSupervisor::new(
        push.clone(),
        snapshots.clone(),
        store.clone(),
        toasts.clone(),
        config,
    )
    .unwrap();
    Harness {
        supervisor,
        push,
        snapshots,
        store,
        toasts,
    }
}

fn notification(id: &str) -> Notification {
    Notification::new(id, NotificationType::Info, format!("title {id}"))
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let the paused clock advance and the session task run.
async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_push_failures_engage_polling_fallback() {
    let h = harness(Vec::new(), vec![notification("n-1")], test_config());
    let mut events = h.supervisor.subscribe();

    h.supervisor.start("acme");

    // Attempts at t=0s, 1s, 3s (backoff 1s then 2s); the third crosses the
    // threshold and polling takes over with an immediate fetch.
    settle(Duration::from_secs(4)).await;

    assert_eq!(h.push.opens(), 3);
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
    assert_eq!(h.snapshots.fetches(), 1);
    assert!(h.store.contains("n-1"));
    assert_eq!(h.toasts.lock().len(), 1);

    let seen = drain(&mut events);
    let statuses: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StatusChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![ChannelStatus::Connecting, ChannelStatus::Connected]
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, EngineEvent::Received(n) if n.id == "n-1"))
    );

    // Polling keeps its fixed cadence; push is not retried on the backoff
    // schedule any more.
    settle(Duration::from_secs(31)).await;
    assert_eq!(h.snapshots.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn notifications_seen_on_both_channels_surface_once() {
    let (tx, rx) = mpsc::channel(8);
    let h = harness(
        vec![
            OpenScript::Fail,
            OpenScript::Fail,
            OpenScript::Fail,
            OpenScript::Connect(rx),
        ],
        vec![notification("n-1")],
        test_config(),
    );
    let mut events = h.supervisor.subscribe();
    h.supervisor.start("acme");

    // Reach fallback; the poll loop delivers n-1 first.
    settle(Duration::from_secs(4)).await;
    assert!(h.store.contains("n-1"));
    h.store.set_read("n-1", true);

    // The recovery probe at t=63s reconnects push, which replays n-1 in its
    // original unread form.
    tx.send(PushEvent::Opened).await.unwrap();
    tx.send(PushEvent::Notification(notification("n-1")))
        .await
        .unwrap();
    settle(Duration::from_secs(61)).await;

    assert_eq!(h.push.opens(), 4);
    assert_eq!(h.store.len(), 1);
    // Monotonic merge: the replay must not un-read the notification.
    assert!(h.store.get("n-1").unwrap().is_read);

    let seen = drain(&mut events);
    let received = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::Received(_)))
        .count();
    let toasts = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::ToastShown(_)))
        .count();
    assert_eq!(received, 1);
    assert_eq!(toasts, 1);

    // fallback -> recovering -> connected is one uninterrupted Connected
    // stretch from the outside.
    let connected = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::StatusChanged(ChannelStatus::Connected)))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_silence_forces_a_reconnect() {
    let (tx1, rx1) = mpsc::channel(8);
    let (tx2, rx2) = mpsc::channel(8);
    let h = harness(
        vec![OpenScript::Connect(rx1), OpenScript::Connect(rx2)],
        Vec::new(),
        test_config(),
    );
    h.supervisor.start("acme");

    tx1.send(PushEvent::Opened).await.unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
    assert_eq!(h.push.opens(), 1);

    // A keep-alive 40s in pushes the staleness deadline out.
    settle(Duration::from_secs(40)).await;
    tx1.send(PushEvent::KeepAlive).await.unwrap();

    // t=70s: inside the refreshed window, still the first connection.
    settle(Duration::from_secs(30)).await;
    assert_eq!(h.push.opens(), 1);

    // t=90s: the window (40s + 45s) elapsed silent; one teardown, one
    // reconnect after the base backoff.
    settle(Duration::from_secs(20)).await;
    assert_eq!(h.push.opens(), 2);

    tx2.send(PushEvent::Opened).await.unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn exhausted_push_budget_is_terminal_until_restart() {
    let config = SupervisorConfig {
        fallback_threshold: 99,
        max_push_attempts: 2,
        ..test_config()
    };
    let h = harness(Vec::new(), vec![notification("n-1")], config);
    h.supervisor.start("acme");

    settle(Duration::from_secs(2)).await;
    assert_eq!(h.push.opens(), 2);
    assert_eq!(h.supervisor.status(), ChannelStatus::Error);

    // Dead means dead: no opens, no fallback polling, however long we wait.
    settle(Duration::from_secs(300)).await;
    assert_eq!(h.push.opens(), 2);
    assert_eq!(h.snapshots.fetches(), 0);
    assert_eq!(h.supervisor.status(), ChannelStatus::Error);

    // An explicit stop/start cycle gets a fresh budget.
    h.supervisor.stop();
    h.supervisor.start("acme");
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.push.opens(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_pending_reconnect() {
    let h = harness(Vec::new(), Vec::new(), test_config());
    h.supervisor.start("acme");

    settle(Duration::from_millis(100)).await;
    assert_eq!(h.push.opens(), 1);

    h.supervisor.stop();
    assert_eq!(h.supervisor.status(), ChannelStatus::Disconnected);

    settle(Duration::from_secs(60)).await;
    assert_eq!(h.push.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn dismissible_toasts_auto_hide_and_sticky_ones_stay() {
    let (tx, rx) = mpsc::channel(8);
    let h = harness(vec![OpenScript::Connect(rx)], Vec::new(), test_config());
    let mut events = h.supervisor.subscribe();
    h.supervisor.start("acme");

    let mut sticky = notification("n-sticky");
    sticky.is_dismissible = false;

    tx.send(PushEvent::Opened).await.unwrap();
    tx.send(PushEvent::Notification(sticky)).await.unwrap();
    tx.send(PushEvent::Notification(notification("n-soft")))
        .await
        .unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.toasts.lock().len(), 2);

    // Past the auto-hide delay only the sticky toast survives.
    settle(Duration::from_secs(6)).await;
    let visible = h.toasts.lock().visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].notification_id, "n-sticky");

    let seen = drain(&mut events);
    assert!(
        seen.iter()
            .any(|e| matches!(e, EngineEvent::ToastExpired(id) if id == "n-soft"))
    );
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, EngineEvent::ToastExpired(id) if id == "n-sticky"))
    );
}

#[tokio::test(start_paused = true)]
async fn tenant_switch_clears_per_tenant_state() {
    let config = SupervisorConfig {
        fallback_threshold: 1,
        ..test_config()
    };
    let h = harness(Vec::new(), vec![notification("n-acme")], config);
    h.supervisor.start("acme");

    // With threshold 1 the first failed open drops straight into polling.
    settle(Duration::from_millis(100)).await;
    assert!(h.store.contains("n-acme"));
    assert_eq!(h.toasts.lock().len(), 1);

    h.snapshots.set_page(vec![notification("n-umbrella")]);
    h.supervisor.start("umbrella");
    settle(Duration::from_millis(100)).await;

    assert!(!h.store.contains("n-acme"));
    assert!(h.store.contains("n-umbrella"));
    // The shown set resets with the tenant, so the new tenant's toast shows.
    assert_eq!(h.toasts.lock().visible().len(), 1);
    assert_eq!(
        h.toasts.lock().visible()[0].notification_id,
        "n-umbrella"
    );
    assert_eq!(
        *h.snapshots.tenants.lock().last().unwrap(),
        "umbrella".to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn same_tenant_start_is_idempotent() {
    let (tx, rx) = mpsc::channel(8);
    let h = harness(vec![OpenScript::Connect(rx)], Vec::new(), test_config());
    h.supervisor.start("acme");
    tx.send(PushEvent::Opened).await.unwrap();
    settle(Duration::from_millis(10)).await;

    h.supervisor.start("acme");
    settle(Duration::from_millis(10)).await;

    assert_eq!(h.push.opens(), 1);
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_counts_as_a_push_failure() {
    let (tx, rx) = mpsc::channel(8);
    let (tx2, rx2) = mpsc::channel(8);
    let h = harness(
        vec![OpenScript::Connect(rx), OpenScript::Connect(rx2)],
        Vec::new(),
        test_config(),
    );
    h.supervisor.start("acme");
    tx.send(PushEvent::Opened).await.unwrap();
    settle(Duration::from_millis(10)).await;

    // Server closes the stream: reconnect after the base backoff.
    drop(tx);
    settle(Duration::from_secs(2)).await;
    assert_eq!(h.push.opens(), 2);

    tx2.send(PushEvent::Opened).await.unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn polling_continues_while_a_probe_hangs() {
    let config = SupervisorConfig {
        connect_timeout: Duration::from_secs(120),
        ..test_config()
    };
    let h = harness(
        vec![
            OpenScript::Fail,
            OpenScript::Fail,
            OpenScript::Fail,
            OpenScript::Hang,
            OpenScript::Hang,
        ],
        vec![notification("n-1")],
        config,
    );
    h.supervisor.start("acme");

    // Reach fallback at t=3s with the immediate first fetch.
    settle(Duration::from_secs(4)).await;
    assert_eq!(h.push.opens(), 3);
    assert_eq!(h.snapshots.fetches(), 1);
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);

    // t=65s: poll ticks at 33s and 63s landed, and the 60s probe has opened a
    // connection that never answers.
    settle(Duration::from_secs(61)).await;
    assert_eq!(h.push.opens(), 4);
    assert_eq!(h.snapshots.fetches(), 3);

    // t=125s: the probe is still stuck, yet the poll loop kept its cadence
    // (ticks at 93s and 123s).
    settle(Duration::from_secs(60)).await;
    assert_eq!(h.push.opens(), 4);
    assert_eq!(h.snapshots.fetches(), 5);
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);

    // t=245s: the connect deadline expired at 183s, the probe timer was
    // rearmed, and the next probe fired at 243s. Polling never paused.
    settle(Duration::from_secs(120)).await;
    assert_eq!(h.push.opens(), 5);
    assert_eq!(h.snapshots.fetches(), 9);
    assert_eq!(h.supervisor.status(), ChannelStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn rejected_subscription_is_not_retried() {
    let h = harness(
        vec![OpenScript::Reject],
        vec![notification("n-1")],
        test_config(),
    );
    h.supervisor.start("acme");

    settle(Duration::from_millis(10)).await;
    assert_eq!(h.push.opens(), 1);
    assert_eq!(h.supervisor.status(), ChannelStatus::Error);

    // A 401 is not a transient fault: no backoff retries, no fallback.
    settle(Duration::from_secs(300)).await;
    assert_eq!(h.push.opens(), 1);
    assert_eq!(h.snapshots.fetches(), 0);
    assert_eq!(h.supervisor.status(), ChannelStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn tenant_switch_waits_out_an_inflight_fetch() {
    let config = SupervisorConfig {
        fallback_threshold: 1,
        ..test_config()
    };
    let h = harness(Vec::new(), vec![notification("n-acme")], config);
    let release = h.snapshots.gate_tenant("acme");

    h.supervisor.start("acme");
    settle(Duration::from_millis(100)).await;

    // The first fetch is parked inside the snapshot client.
    assert_eq!(h.snapshots.fetches(), 1);
    assert!(!h.store.contains("n-acme"));

    h.snapshots.set_page(vec![notification("n-umbrella")]);
    h.supervisor.start("umbrella");
    settle(Duration::from_millis(100)).await;

    // The switch must not deadlock on the parked fetch, and the old tenant's
    // page must never land in the cleared store.
    assert_eq!(h.snapshots.fetches(), 2);
    assert!(h.store.contains("n-umbrella"));
    assert!(!h.store.contains("n-acme"));

    // Even once the gate lifts, the retired session stays gone.
    release.notify_one();
    settle(Duration::from_millis(10)).await;
    assert!(!h.store.contains("n-acme"));
    assert_eq!(
        *h.snapshots.tenants.lock().last().unwrap(),
        "umbrella".to_string()
    );
}
