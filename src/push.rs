//! SSE push channel adapter.
//!
//! Subscribes to `GET /notifications/stream?tenantId=<id>` and turns the
//! event-stream into [`PushEvent`]s. The named `notification` event carries a
//! JSON [`Notification`]; every other complete frame (including the generic
//! `message` keep-alives) only proves liveness.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{NotifyError, Result};
use crate::model::Notification;
use crate::transport::{PushEvent, PushHandle, PushTransport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Incremental server-sent-event frame parser.
///
/// Feed arbitrary byte chunks; complete frames come out. Frames are
/// terminated by a blank line, `:` comment lines are skipped, multi-line
/// `data` fields are joined with `\n`.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=pos).collect();
            let line = raw.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(msg) = self.flush_frame() {
                    out.push(msg);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id/retry are irrelevant to this engine
                _ => {}
            }
        }
        out
    }

    fn flush_frame(&mut self) -> Option<SseMessage> {
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let data = std::mem::take(&mut self.data);
        if data.is_empty() && event == "message" {
            // Comment-only or empty frame.
            return None;
        }
        Some(SseMessage {
            event,
            data: data.join("\n"),
        })
    }
}

/// Map a complete SSE frame to a push event.
///
/// A malformed `notification` payload is dropped and logged, never surfaced
/// as a connection-level error: reconnect storms from bad payloads are worse
/// than a lost event the next poll can recover.
fn decode_frame(msg: SseMessage) -> Option<PushEvent> {
    if msg.event == "notification" {
        match decode_notification(&msg.data) {
            Ok(notification) => Some(PushEvent::Notification(notification)),
            Err(e) => {
                warn!(error = %e, "dropping malformed notification payload");
                None
            }
        }
    } else {
        Some(PushEvent::KeepAlive)
    }
}

fn decode_notification(data: &str) -> Result<Notification> {
    serde_json::from_str(data).map_err(|e| NotifyError::parse(format!("notification payload: {e}")))
}

/// [`PushTransport`] over an HTTP server-sent-event stream.
pub struct SsePushChannel {
    client: reqwest::Client,
    base_url: String,
}

impl SsePushChannel {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn stream_url(&self, tenant_id: &str) -> String {
        format!("{}/notifications/stream?tenantId={}", self.base_url, tenant_id)
    }
}

#[async_trait]
impl PushTransport for SsePushChannel {
    async fn open(&self, tenant_id: &str) -> Result<PushHandle> {
        let url = self.stream_url(tenant_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::http_status(status, url, "stream subscribe"));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();

        tokio::spawn(async move {
            // Headers arrived, the subscription is live.
            if tx.send(PushEvent::Opened).await.is_err() {
                return;
            }

            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();

            loop {
                tokio::select! {
                    biased;

                    _ = reader_cancel.cancelled() => {
                        debug!("push reader cancelled");
                        break;
                    }
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for msg in parser.feed(&bytes) {
                                let Some(event) = decode_frame(msg) else {
                                    continue;
                                };
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "event stream read failed");
                            break;
                        }
                        None => {
                            debug!("event stream closed by server");
                            break;
                        }
                    }
                }
            }
            // Dropping `tx` signals the supervisor that the transport is gone.
        });

        Ok(PushHandle::new(rx, cancel))
    }
}
