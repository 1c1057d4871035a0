//! `reqwest`-backed implementation of [`NotificationApi`].

use std::sync::Arc;

use async_trait::async_trait;
use notify_common::NotificationRecord;
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::auth::SessionGate;
use crate::config::Config;
use crate::error::ClientError;

use super::NotificationApi;

#[derive(Clone)]
pub struct HttpNotificationApi {
    config: Arc<Config>,
    session: Arc<dyn SessionGate>,
    http: reqwest::Client,
}

impl HttpNotificationApi {
    pub fn new(config: Arc<Config>, session: Arc<dyn SessionGate>) -> Self {
        Self {
            config,
            session,
            http: reqwest::Client::new(),
        }
    }

    /// Attach the bearer credential read from the session at call time.
    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let credential = self
            .session
            .credential()
            .ok_or_else(|| ClientError::unauthorized("No credential available"))?;
        Ok(builder.bearer_auth(credential))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let resp = self.authorized(builder)?.send().await?;
        check_status(resp).await
    }

    async fn fetch_list(&self, url: String) -> Result<Vec<NotificationRecord>, ClientError> {
        let body = self.send(self.http.get(&url)).await?.text().await?;
        let records: Vec<NotificationRecord> = serde_json::from_str(&body).inspect_err(|e| {
            tracing::warn!(error = %e, %url, "notification list parse failed");
        })?;

        for record in &records {
            record.validate()?;
        }
        Ok(records)
    }
}

async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::unauthorized(body));
    }
    Err(ClientError::http(Some(status.as_u16()), body))
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_new(&self) -> Result<Vec<NotificationRecord>, ClientError> {
        self.fetch_list(self.config.api_url("/notifications/new")).await
    }

    async fn fetch_history(&self, limit: u32) -> Result<Vec<NotificationRecord>, ClientError> {
        let url = self
            .config
            .api_url(&format!("/notifications/history?limit={limit}"));
        self.fetch_list(url).await
    }

    async fn mark_read(&self, id: i64) -> Result<(), ClientError> {
        let url = self.config.api_url(&format!("/notifications/{id}/read"));
        self.send(self.http.put(&url)).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ClientError> {
        let url = self.config.api_url("/notifications/read-all");
        self.send(self.http.put(&url)).await?;
        Ok(())
    }
}
