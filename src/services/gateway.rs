use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::auth::AuthSession;
use crate::config::Config;
use crate::error::{NotifyError, Result};
use crate::models::notification::{
    NotificationId, NotificationPage, NotificationPreferences, PreferencesEnvelope, UnreadCount,
};

/// REST surface of the notification backend. Calls are stateless and never
/// retried here; the caller decides what a failure means.
#[async_trait]
pub trait NotificationGateway: Send + Sync + 'static {
    async fn list(&self, page: u32, per_page: u32) -> Result<NotificationPage>;
    async fn unread_count(&self) -> Result<u64>;
    async fn mark_read(&self, id: NotificationId) -> Result<()>;
    async fn mark_all_read(&self) -> Result<()>;
    async fn delete(&self, id: NotificationId) -> Result<()>;
    async fn preferences(&self) -> Result<NotificationPreferences>;
    async fn save_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences>;
}

#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    session: AuthSession,
}

impl HttpGateway {
    pub fn new(config: &Config, session: AuthSession) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.sync.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/notifications{}", self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .session
            .bearer_token()
            .await
            .ok_or(NotifyError::Unauthenticated)?;

        Ok(request
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json"))
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).await?.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(endpoint, request).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl NotificationGateway for HttpGateway {
    async fn list(&self, page: u32, per_page: u32) -> Result<NotificationPage> {
        log::debug!("Fetching notifications page {} ({} per page)", page, per_page);

        let request = self
            .client
            .get(self.url("/get"))
            .query(&[("page", page), ("per_page", per_page)]);

        self.send_json("GET /notifications/get", request).await
    }

    async fn unread_count(&self) -> Result<u64> {
        let request = self.client.get(self.url("/unread-count"));
        let count: UnreadCount = self.send_json("GET /notifications/unread-count", request).await?;
        Ok(count.count)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<()> {
        let request = self.client.post(self.url(&format!("/read/{}", id)));
        self.send("POST /notifications/read", request).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let request = self.client.post(self.url("/read-all"));
        self.send("POST /notifications/read-all", request).await?;
        Ok(())
    }

    async fn delete(&self, id: NotificationId) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/{}", id)));
        self.send("DELETE /notifications", request).await?;
        Ok(())
    }

    async fn preferences(&self) -> Result<NotificationPreferences> {
        let request = self.client.get(self.url("/preferences"));
        let envelope: PreferencesEnvelope =
            self.send_json("GET /notifications/preferences", request).await?;
        Ok(envelope.preferences)
    }

    async fn save_preferences(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        let request = self.client.put(self.url("/preferences")).json(prefs);
        let envelope: PreferencesEnvelope =
            self.send_json("PUT /notifications/preferences", request).await?;
        Ok(envelope.preferences)
    }
}
