//! HTTP pull channel adapter.
//!
//! Fetches the server-computed active-notification snapshot. Used by the
//! supervisor as the fallback delivery path and indirectly as a recovery
//! probe cadence while push is down.

use async_trait::async_trait;

use crate::error::{NotifyError, Result};
use crate::model::{Notification, SnapshotPage};
use crate::transport::{NotificationApi, SnapshotClient};

const DEFAULT_PER_PAGE: u32 = 50;

/// [`SnapshotClient`] over `GET /notifications?tenantId=<id>&activeOnly=true&perPage=<n>`.
pub struct HttpSnapshotClient {
    client: reqwest::Client,
    base_url: String,
    per_page: u32,
}

impl HttpSnapshotClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    fn snapshot_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/notifications?tenantId={}&activeOnly=true&perPage={}",
            self.base_url, tenant_id, self.per_page
        )
    }
}

#[async_trait]
impl SnapshotClient for HttpSnapshotClient {
    async fn fetch(&self, tenant_id: &str) -> Result<Vec<Notification>> {
        let url = self.snapshot_url(tenant_id);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::http_status(status, url, "snapshot fetch"));
        }

        let page: SnapshotPage = response.json().await?;
        Ok(page.data)
    }
}

/// [`NotificationApi`] over the backend's mutation endpoints. Notification
/// ids are globally unique, so no tenant scoping is needed here.
pub struct HttpNotificationApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    async fn post(&self, url: String, operation: &'static str) -> Result<()> {
        let response = self.client.post(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::http_status(status, url, operation));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn mark_read(&self, id: &str) -> Result<()> {
        self.post(
            format!("{}/notifications/{}/read", self.base_url, id),
            "mark read",
        )
        .await
    }

    async fn dismiss(&self, id: &str) -> Result<()> {
        self.post(
            format!("{}/notifications/{}/dismiss", self.base_url, id),
            "dismiss",
        )
        .await
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.post(
            format!("{}/notifications/read-all", self.base_url),
            "mark all read",
        )
        .await
    }
}
