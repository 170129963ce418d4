//! Realtime notification delivery and deduplication engine.
//!
//! Delivers tenant-scoped notifications over a server-sent-events push
//! channel with a polling fallback, deduplicates across both channels, and
//! drives a bounded transient toast queue. The crate is transport-agnostic at
//! its seams: [`PushTransport`], [`SnapshotClient`] and [`NotificationApi`]
//! are traits, with HTTP implementations built on `reqwest`.
//!
//! # Architecture
//!
//! - [`supervisor`] owns channel selection: push primary, exponential-backoff
//!   reconnects, polling fallback past a failure threshold, periodic push
//!   recovery probes. The decision logic is a pure state machine
//!   ([`supervisor::ChannelMachine`]); a tokio task executes its effects.
//! - [`store`] merges notifications from either channel into one
//!   deduplicated, monotonic view.
//! - [`toast`] keeps the bounded queue of transient popups.
//! - [`service`] is the facade a frontend consumes: subscription lifecycle,
//!   read accessors and optimistic mutations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use notistream::{
//!     HttpSnapshotClient, NotificationService, SsePushChannel, SupervisorConfig,
//! };
//!
//! # async fn run() -> notistream::Result<()> {
//! let base = "https://api.example.com";
//! let http = reqwest::Client::new();
//! let service = NotificationService::new(
//!     Arc::new(SsePushChannel::new(http.clone(), base)),
//!     Arc::new(HttpSnapshotClient::new(http.clone(), base)),
//!     Arc::new(notistream::HttpNotificationApi::new(http, base)),
//!     SupervisorConfig::default(),
//! )?;
//!
//! let mut events = service.subscribe("tenant-42");
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod model;
pub mod pull;
pub mod push;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod toast;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use config::SupervisorConfig;
pub use error::{NotifyError, Result};
pub use events::{EngineEvent, EngineEventBroadcaster};
pub use model::{ChannelStatus, Notification, NotificationType};
pub use pull::{HttpNotificationApi, HttpSnapshotClient};
pub use push::SsePushChannel;
pub use service::NotificationService;
pub use store::{DeliveryStore, StoreChange};
pub use supervisor::ChannelSupervisor;
pub use toast::{ToastEntry, ToastQueue};
pub use transport::{
    NotificationApi, PushEvent, PushHandle, PushTransport, SnapshotClient,
};
