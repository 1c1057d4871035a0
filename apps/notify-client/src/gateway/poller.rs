//! Fallback poller: bounds staleness while the live channel is down.
//!
//! One poller exists per [`ConnectionManager`], however many bindings are
//! mounted. Each binding holds a [`PollerLease`]; the first lease arms the
//! poller and dropping the last one disarms it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::ClientError;

use super::manager::ConnectionManager;

/// REST refresh invoked on each tick while the channel is not open.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ClientError>> + Send + Sync>;

/// A running poll loop. Dropping it stops the loop.
pub struct FallbackPoller {
    handle: JoinHandle<()>,
}

impl FallbackPoller {
    /// Arm a poller for `manager`. Must be called inside a Tokio runtime.
    pub fn spawn(manager: Weak<ConnectionManager>, interval: Duration, refresh: RefreshFn) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // First tick fires immediately; skip it.

            loop {
                ticker.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.should_poll() {
                    continue;
                }
                drop(manager);

                tracing::debug!("live channel not open, polling for notifications");
                // A failed refresh just waits for the next tick.
                if let Err(e) = refresh().await {
                    tracing::warn!(error = %e, "fallback refresh failed");
                }
            }
        });
        Self { handle }
    }

    pub fn is_armed(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Keeps the manager's poller armed for as long as it is held.
pub struct PollerLease {
    pub(super) manager: Weak<ConnectionManager>,
}

impl Drop for PollerLease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release_poller();
        }
    }
}
