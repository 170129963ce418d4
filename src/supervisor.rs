//! Channel supervision: push primary, polling fallback, push recovery.
//!
//! The supervisor is split into a pure transition function
//! ([`ChannelMachine::step`]) producing declarative [`Effect`]s, and a thin
//! tokio runtime shell that executes them. All channel callbacks, timers and
//! transitions are serviced by one `select!` loop per session, so the state
//! needs no locking and no timer can outlive its session task.

use std::collections::VecDeque;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{NotifyError, Result};
use crate::events::{EngineEvent, EngineEventBroadcaster};
use crate::heartbeat::HeartbeatMonitor;
use crate::model::{ChannelStatus, Notification};
use crate::store::DeliveryStore;
use crate::toast::ToastQueue;
use crate::transport::{PushEvent, PushHandle, PushTransport, SnapshotClient};

/// Internal supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No active session.
    Idle,
    /// Opening the push channel.
    Connecting,
    /// Push is the primary delivery channel.
    PushConnected,
    /// Push failed; waiting out the backoff before the next attempt.
    PushRetrying,
    /// Push is disabled; the pull loop delivers notifications.
    PollingFallback,
    /// Still polling, with a background push probe in flight.
    PollingRecovering,
    /// Retry budget exhausted. Terminal until an explicit restart.
    Failed,
}

impl SupervisorState {
    /// Public projection of the internal state.
    pub fn status(self) -> ChannelStatus {
        match self {
            Self::Idle => ChannelStatus::Disconnected,
            Self::Connecting | Self::PushRetrying => ChannelStatus::Connecting,
            Self::PushConnected | Self::PollingFallback | Self::PollingRecovering => {
                ChannelStatus::Connected
            }
            Self::Failed => ChannelStatus::Error,
        }
    }
}

/// Inputs to the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Start,
    PushOpened,
    PushFailed,
    /// The subscription was refused for a non-retryable reason (bad config,
    /// auth). Retrying cannot help.
    PushRejected,
    HeartbeatStale,
    RetryTimerFired,
    ProbeTimerFired,
    Stop,
}

/// Declarative side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenPush,
    ClosePush,
    StartRetryTimer(Duration),
    StartPollLoop,
    StopPollLoop,
    StartProbeTimer,
    OpenProbe,
    StatusChanged(ChannelStatus),
    /// Push delivery halted for good; carries the spent attempt count.
    Fail { attempts: u32 },
}

/// Pure channel-selection state machine.
#[derive(Debug)]
pub struct ChannelMachine {
    state: SupervisorState,
    retry: crate::backoff::RetryState,
}

impl ChannelMachine {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Idle,
            retry: crate::backoff::RetryState::default(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn status(&self) -> ChannelStatus {
        self.state.status()
    }

    pub fn attempt_count(&self) -> u32 {
        self.retry.attempt_count
    }

    /// Advance the machine, returning the effects the runtime must execute.
    ///
    /// Heartbeat staleness and transport failure take the same path: full
    /// teardown and reconnect, never a soft warning. Events that make no
    /// sense in the current state (late timer fires, events from an already
    /// closed transport) are ignored.
    pub fn step(&mut self, event: SupervisorEvent, config: &SupervisorConfig) -> Vec<Effect> {
        let prior_status = self.state.status();
        let mut effects = Vec::new();

        match (self.state, event) {
            (SupervisorState::Idle | SupervisorState::Failed, SupervisorEvent::Start) => {
                self.retry.reset();
                self.state = SupervisorState::Connecting;
                effects.push(Effect::OpenPush);
            }
            // Already active: `start` must not create a duplicate transport.
            (_, SupervisorEvent::Start) => {}

            (SupervisorState::Idle, SupervisorEvent::Stop) => {}
            (_, SupervisorEvent::Stop) => {
                self.state = SupervisorState::Idle;
                effects.push(Effect::ClosePush);
                effects.push(Effect::StopPollLoop);
            }

            (SupervisorState::Connecting, SupervisorEvent::PushOpened) => {
                self.retry.reset();
                self.state = SupervisorState::PushConnected;
            }
            (SupervisorState::PollingRecovering, SupervisorEvent::PushOpened) => {
                info!("push recovery probe succeeded, resuming push as primary");
                self.retry.reset();
                self.state = SupervisorState::PushConnected;
                effects.push(Effect::StopPollLoop);
            }

            (
                SupervisorState::Connecting | SupervisorState::PushConnected,
                SupervisorEvent::PushFailed | SupervisorEvent::HeartbeatStale,
            ) => {
                let attempts = self.retry.record_failure(Utc::now());
                effects.push(Effect::ClosePush);
                if attempts >= config.fallback_threshold {
                    warn!(
                        attempts,
                        threshold = config.fallback_threshold,
                        "push failure threshold reached, disabling push"
                    );
                    self.state = SupervisorState::PollingFallback;
                    effects.push(Effect::StartPollLoop);
                    effects.push(Effect::StartProbeTimer);
                } else if self.retry.budget_exhausted(config.max_push_attempts) {
                    self.state = SupervisorState::Failed;
                    effects.push(Effect::Fail { attempts });
                } else {
                    self.state = SupervisorState::PushRetrying;
                    effects.push(Effect::StartRetryTimer(
                        config.reconnect.delay_for_attempt(attempts - 1),
                    ));
                }
            }

            // A rejected subscription skips the retry ladder entirely.
            (SupervisorState::Connecting, SupervisorEvent::PushRejected) => {
                self.state = SupervisorState::Failed;
                effects.push(Effect::ClosePush);
            }

            (SupervisorState::PushRetrying, SupervisorEvent::RetryTimerFired) => {
                self.state = SupervisorState::Connecting;
                effects.push(Effect::OpenPush);
            }

            (SupervisorState::PollingFallback, SupervisorEvent::ProbeTimerFired) => {
                self.state = SupervisorState::PollingRecovering;
                effects.push(Effect::OpenProbe);
            }
            (
                SupervisorState::PollingRecovering,
                SupervisorEvent::PushFailed
                | SupervisorEvent::PushRejected
                | SupervisorEvent::HeartbeatStale,
            ) => {
                // Probe lost; polling never stopped, just rearm the probe.
                self.state = SupervisorState::PollingFallback;
                effects.push(Effect::ClosePush);
                effects.push(Effect::StartProbeTimer);
            }

            _ => {}
        }

        let status = self.state.status();
        if status != prior_status {
            effects.push(Effect::StatusChanged(status));
        }
        effects
    }
}

impl Default for ChannelMachine {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionSlot {
    tenant_id: Option<String>,
    active: Option<ActiveSession>,
    /// Teardown of a stopped session that has not finished yet. A successor
    /// session awaits this before touching shared state.
    retiring: Option<JoinHandle<()>>,
}

/// Owns channel selection for one tenant session and emits a deduplicated
/// notification stream into the [`DeliveryStore`] and [`ToastQueue`].
pub struct ChannelSupervisor {
    push: Arc<dyn PushTransport>,
    snapshots: Arc<dyn SnapshotClient>,
    store: Arc<DeliveryStore>,
    toasts: Arc<Mutex<ToastQueue>>,
    config: SupervisorConfig,
    broadcaster: EngineEventBroadcaster,
    status: Arc<RwLock<ChannelStatus>>,
    session: Mutex<SessionSlot>,
}

impl ChannelSupervisor {
    pub fn new(
        push: Arc<dyn PushTransport>,
        snapshots: Arc<dyn SnapshotClient>,
        store: Arc<DeliveryStore>,
        toasts: Arc<Mutex<ToastQueue>>,
        config: SupervisorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            push,
            snapshots,
            store,
            toasts,
            config,
            broadcaster: EngineEventBroadcaster::new(),
            status: Arc::new(RwLock::new(ChannelStatus::Disconnected)),
            session: Mutex::new(SessionSlot::default()),
        })
    }

    /// Begin delivery for a tenant. Idempotent for the active tenant; a
    /// different tenant tears the old session down first (stop-before-start)
    /// and clears all per-tenant state. The new session only touches shared
    /// state once its predecessor has fully terminated, so an old session
    /// mid-delivery can never write into the new tenant's view.
    pub fn start(&self, tenant_id: &str) {
        let mut slot = self.session.lock();

        if slot.active.is_some() && slot.tenant_id.as_deref() == Some(tenant_id) {
            debug!(tenant_id, "supervisor already active for tenant");
            return;
        }

        let predecessor = slot.active.take();
        if predecessor.is_some() {
            info!(tenant_id, "tenant switch, tearing down previous session");
        }
        let retiring = slot.retiring.take();
        let clear_state = slot.tenant_id.as_deref() != Some(tenant_id);

        slot.tenant_id = Some(tenant_id.to_string());
        slot.active = Some(self.spawn_session(tenant_id, predecessor, retiring, clear_state));
    }

    /// Tear down the session: close both channels and cancel every timer.
    /// The toast queue (and its shown set) is cleared once the session task
    /// has terminated.
    pub fn stop(&self) {
        let mut slot = self.session.lock();
        if let Some(active) = slot.active.take() {
            info!("stopping channel supervisor");
            active.cancel.cancel();
            active.task.abort();
            let toasts = self.toasts.clone();
            slot.retiring = Some(tokio::spawn(async move {
                let _ = active.task.await;
                toasts.lock().clear();
            }));
            *self.status.write() = ChannelStatus::Disconnected;
            self.broadcaster
                .publish(EngineEvent::StatusChanged(ChannelStatus::Disconnected));
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.read()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &EngineEventBroadcaster {
        &self.broadcaster
    }

    fn spawn_session(
        &self,
        tenant_id: &str,
        predecessor: Option<ActiveSession>,
        retiring: Option<JoinHandle<()>>,
        clear_state: bool,
    ) -> ActiveSession {
        let cancel = CancellationToken::new();
        let mut session = SessionLoop {
            tenant_id: tenant_id.to_string(),
            config: self.config.clone(),
            push: self.push.clone(),
            snapshots: self.snapshots.clone(),
            store: self.store.clone(),
            toasts: self.toasts.clone(),
            broadcaster: self.broadcaster.clone(),
            status: self.status.clone(),
            machine: ChannelMachine::new(),
            delivered: FxHashSet::default(),
        };
        let store = self.store.clone();
        let toasts = self.toasts.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            // Predecessors terminate before any shared state is touched.
            if let Some(teardown) = retiring {
                let _ = teardown.await;
            }
            if let Some(old) = predecessor {
                old.cancel.cancel();
                old.task.abort();
                let _ = old.task.await;
            }
            if clear_state {
                store.clear();
                toasts.lock().clear();
            }
            session.run(token).await;
        });
        ActiveSession { cancel, task }
    }
}

/// Mutable per-session runtime resources. Timers live here so that dropping
/// the session drops them; nothing can fire for a dead session.
struct LoopState {
    handle: Option<PushHandle>,
    heartbeat: HeartbeatMonitor,
    /// In-flight `open()` attempt, raced against the other `select!` arms so
    /// a slow or hanging connect never stalls polling, toast expiry or
    /// cancellation. Bounded by `connect_timeout`.
    connect: Option<Pin<Box<dyn Future<Output = Result<PushHandle>> + Send>>>,
    retry_sleep: Option<Pin<Box<Sleep>>>,
    probe_sleep: Option<Pin<Box<Sleep>>>,
    poll_timer: Option<Interval>,
}

/// One session's event loop.
struct SessionLoop {
    tenant_id: String,
    config: SupervisorConfig,
    push: Arc<dyn PushTransport>,
    snapshots: Arc<dyn SnapshotClient>,
    store: Arc<DeliveryStore>,
    toasts: Arc<Mutex<ToastQueue>>,
    broadcaster: EngineEventBroadcaster,
    status: Arc<RwLock<ChannelStatus>>,
    machine: ChannelMachine,
    /// Ids already forwarded downstream this session. Checked before any
    /// forwarding, so either arrival order across channels is equivalent.
    delivered: FxHashSet<String>,
}

impl SessionLoop {
    async fn run(&mut self, cancel: CancellationToken) {
        let mut state = LoopState {
            handle: None,
            heartbeat: HeartbeatMonitor::new(self.config.heartbeat_timeout),
            connect: None,
            retry_sleep: None,
            probe_sleep: None,
            poll_timer: None,
        };
        let mut queue = VecDeque::from([SupervisorEvent::Start]);

        loop {
            self.drain(&mut queue, &mut state);

            if cancel.is_cancelled() {
                break;
            }

            let toast_deadline = self.toasts.lock().next_expiry();
            let toast_armed = toast_deadline.is_some();
            let push_active = state.handle.is_some();
            let heartbeat_armed = state.heartbeat.is_armed();
            let connect_pending = state.connect.is_some();
            let retry_armed = state.retry_sleep.is_some();
            let probe_armed = state.probe_sleep.is_some();
            let poll_armed = state.poll_timer.is_some();

            let LoopState {
                handle,
                heartbeat,
                connect,
                retry_sleep,
                probe_sleep,
                poll_timer,
            } = &mut state;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                opened = async {
                    match connect {
                        Some(attempt) => attempt.as_mut().await,
                        None => pending().await,
                    }
                }, if connect_pending => {
                    *connect = None;
                    match opened {
                        Ok(new_handle) => *handle = Some(new_handle),
                        Err(e) if e.is_retryable() => {
                            warn!(error = %e, "push open failed");
                            queue.push_back(SupervisorEvent::PushFailed);
                        }
                        Err(e) => {
                            error!(error = %e, "push subscription rejected, not retrying");
                            queue.push_back(SupervisorEvent::PushRejected);
                        }
                    }
                }

                _ = async {
                    match retry_sleep {
                        Some(timer) => timer.as_mut().await,
                        None => pending().await,
                    }
                }, if retry_armed => {
                    *retry_sleep = None;
                    queue.push_back(SupervisorEvent::RetryTimerFired);
                }

                _ = async {
                    match probe_sleep {
                        Some(timer) => timer.as_mut().await,
                        None => pending().await,
                    }
                }, if probe_armed => {
                    *probe_sleep = None;
                    queue.push_back(SupervisorEvent::ProbeTimerFired);
                }

                _ = heartbeat.stale(), if heartbeat_armed => {
                    warn!(
                        timeout_secs = self.config.heartbeat_timeout.as_secs(),
                        "push channel silent past heartbeat window, tearing down"
                    );
                    queue.push_back(SupervisorEvent::HeartbeatStale);
                }

                event = async {
                    match handle {
                        Some(push) => push.recv().await,
                        None => pending().await,
                    }
                }, if push_active => {
                    match event {
                        Some(PushEvent::Opened) => {
                            heartbeat.reset();
                            queue.push_back(SupervisorEvent::PushOpened);
                        }
                        Some(PushEvent::KeepAlive) => heartbeat.reset(),
                        Some(PushEvent::Notification(notification)) => {
                            heartbeat.reset();
                            self.deliver(notification);
                        }
                        None => {
                            heartbeat.disarm();
                            *handle = None;
                            queue.push_back(SupervisorEvent::PushFailed);
                        }
                    }
                }

                _ = async {
                    match poll_timer {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => pending().await,
                    }
                }, if poll_armed => {
                    self.poll_once().await;
                }

                _ = async {
                    match toast_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => pending().await,
                    }
                }, if toast_armed => {
                    let expired = self.toasts.lock().expire(Instant::now());
                    for toast in expired {
                        debug!(id = %toast.notification_id, "toast auto-hidden");
                        self.broadcaster
                            .publish(EngineEvent::ToastExpired(toast.notification_id));
                    }
                }
            }
        }

        if let Some(handle) = state.handle.take() {
            handle.close();
        }
        debug!(tenant_id = %self.tenant_id, "supervisor session loop stopped");
    }

    /// Process queued machine events until quiescent, executing effects as
    /// they are produced. Effects only arm or disarm loop resources; the
    /// armed futures themselves resolve through `select!`, so a slow connect
    /// cannot stall the loop here.
    fn drain(&mut self, queue: &mut VecDeque<SupervisorEvent>, state: &mut LoopState) {
        while let Some(event) = queue.pop_front() {
            let effects = self.machine.step(event, &self.config);
            for effect in effects {
                self.apply(effect, state);
            }
        }
    }

    fn apply(&mut self, effect: Effect, state: &mut LoopState) {
        match effect {
            Effect::OpenPush | Effect::OpenProbe => {
                let push = self.push.clone();
                let tenant_id = self.tenant_id.clone();
                let connect_timeout = self.config.connect_timeout;
                state.connect = Some(Box::pin(async move {
                    match tokio::time::timeout(connect_timeout, push.open(&tenant_id)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(NotifyError::timeout(format!(
                            "push connect incomplete after {}s",
                            connect_timeout.as_secs()
                        ))),
                    }
                }));
            }
            Effect::ClosePush => {
                if let Some(handle) = state.handle.take() {
                    handle.close();
                }
                state.connect = None;
                state.heartbeat.disarm();
            }
            Effect::StartRetryTimer(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "scheduling push reconnect");
                state.retry_sleep = Some(Box::pin(sleep(delay)));
            }
            Effect::StartPollLoop => {
                info!(
                    interval_secs = self.config.poll_interval.as_secs(),
                    "polling fallback engaged"
                );
                let mut interval = tokio::time::interval(self.config.poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                state.poll_timer = Some(interval);
            }
            Effect::StopPollLoop => {
                state.poll_timer = None;
                state.probe_sleep = None;
            }
            Effect::StartProbeTimer => {
                debug!(
                    interval_secs = self.config.probe_interval.as_secs(),
                    "scheduling push recovery probe"
                );
                state.probe_sleep = Some(Box::pin(sleep(self.config.probe_interval)));
            }
            Effect::StatusChanged(status) => {
                info!(%status, "channel status changed");
                *self.status.write() = status;
                self.broadcaster.publish(EngineEvent::StatusChanged(status));
            }
            Effect::Fail { attempts } => {
                let err = NotifyError::BudgetExhausted { attempts };
                error!(error = %err, "push delivery halted until restart");
            }
        }
    }

    /// Forward a notification downstream exactly once per id, whichever
    /// channel observed it first. Re-observations still refresh the store
    /// (monotonic merge) but never re-emit or re-toast.
    fn deliver(&mut self, notification: Notification) {
        let first = self.delivered.insert(notification.id.clone());
        self.store.upsert(notification.clone());
        if !first {
            return;
        }

        debug!(id = %notification.id, kind = ?notification.kind, "notification surfaced");
        self.broadcaster
            .publish(EngineEvent::Received(notification.clone()));

        let entry = self.toasts.lock().offer(&notification, Utc::now());
        if let Some(entry) = entry {
            self.broadcaster.publish(EngineEvent::ToastShown(entry));
        }
    }

    async fn poll_once(&mut self) {
        match self.snapshots.fetch(&self.tenant_id).await {
            Ok(snapshot) => {
                debug!(count = snapshot.len(), "merging active snapshot");
                for notification in snapshot {
                    self.deliver(notification);
                }
            }
            Err(e) => {
                // Keep the fixed cadence; the next tick gets another chance.
                warn!(error = %e, "snapshot fetch failed");
            }
        }
    }
}
