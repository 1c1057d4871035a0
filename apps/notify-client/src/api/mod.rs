//! REST collaborator used to fetch and mutate notification records.

pub mod http;

use async_trait::async_trait;
use notify_common::NotificationRecord;

use crate::error::ClientError;

pub use http::HttpNotificationApi;

/// Abstraction over the notification REST endpoints.
///
/// Backed by [`HttpNotificationApi`] in production and by in-memory doubles in
/// tests.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Latest notifications, most recent first.
    async fn fetch_new(&self) -> Result<Vec<NotificationRecord>, ClientError>;
    /// Up to `limit` notifications from history, most recent first.
    async fn fetch_history(&self, limit: u32) -> Result<Vec<NotificationRecord>, ClientError>;
    async fn mark_read(&self, id: i64) -> Result<(), ClientError>;
    async fn mark_all_read(&self) -> Result<(), ClientError>;
}
