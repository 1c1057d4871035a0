//! Lifecycle binding between a UI consumer and the connection manager.
//!
//! A binding keeps one consumer callback subscribed for exactly as long as the
//! binding lives, holds a lease on the shared fallback poller, and turns
//! session transitions into `connect()`/`disconnect()` calls after a debounce.
//! Dropping a binding never disconnects: the channel is shared and outlives
//! any single consumer.

use std::sync::Arc;
use std::time::Duration;

use notify_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::auth::{SessionGate, SessionSnapshot};

use super::manager::{ConnectionManager, MessageCallback, Subscription};
use super::poller::{PollerLease, RefreshFn};

/// Per-binding view of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPhase {
    Unbound,
    BoundUnauthenticated,
    BoundAuthenticated,
}

pub struct NotificationBinding {
    id: String,
    phase: Arc<Mutex<BindingPhase>>,
    task: JoinHandle<()>,
    _subscription: Subscription,
    _poller: Option<PollerLease>,
}

impl NotificationBinding {
    /// Mount a binding. Must be called inside a Tokio runtime.
    ///
    /// `refresh`, when given, backs the shared fallback poller.
    pub fn mount(
        manager: &Arc<ConnectionManager>,
        session: Arc<dyn SessionGate>,
        on_message: MessageCallback,
        refresh: Option<RefreshFn>,
    ) -> Self {
        let id = prefixed_ulid(prefix::BINDING);
        let config = manager.config().clone();

        let subscription = manager.subscribe(on_message);
        let poller = refresh.map(|refresh| manager.acquire_poller(config.poll_interval, refresh));
        let phase = Arc::new(Mutex::new(BindingPhase::BoundUnauthenticated));

        let task = tokio::spawn(watch_session(
            id.clone(),
            manager.clone(),
            session.clone(),
            session.watch(),
            config.debounce,
            phase.clone(),
        ));

        tracing::info!(binding = %id, subscription = %subscription.id(), "binding mounted");

        Self {
            id,
            phase,
            task,
            _subscription: subscription,
            _poller: poller,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> BindingPhase {
        *self.phase.lock()
    }

    /// Unmount the binding. Equivalent to dropping it.
    pub fn unmount(self) {}
}

impl Drop for NotificationBinding {
    fn drop(&mut self) {
        self.task.abort();
        *self.phase.lock() = BindingPhase::Unbound;
        tracing::info!(binding = %self.id, "binding unmounted");
    }
}

/// Debounce session changes, then act on the values current at that moment.
async fn watch_session(
    id: String,
    manager: Arc<ConnectionManager>,
    session: Arc<dyn SessionGate>,
    mut changes: watch::Receiver<SessionSnapshot>,
    debounce: Duration,
    phase: Arc<Mutex<BindingPhase>>,
) {
    // The state at mount time counts as the first change.
    changes.borrow_and_update();

    loop {
        // Every change within the window restarts it.
        loop {
            tokio::select! {
                _ = time::sleep(debounce) => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        tracing::debug!(binding = %id, "session gate dropped");
                        return;
                    }
                }
            }
        }

        changes.borrow_and_update();
        apply(&id, &manager, session.snapshot(), &phase);

        if changes.changed().await.is_err() {
            tracing::debug!(binding = %id, "session gate dropped");
            return;
        }
    }
}

fn apply(
    id: &str,
    manager: &ConnectionManager,
    snapshot: SessionSnapshot,
    phase: &Mutex<BindingPhase>,
) {
    if snapshot.is_usable() {
        *phase.lock() = BindingPhase::BoundAuthenticated;
        if !manager.is_connected() {
            tracing::debug!(binding = %id, "session usable, connecting");
            manager.connect();
        }
    } else {
        *phase.lock() = BindingPhase::BoundUnauthenticated;
        tracing::debug!(
            binding = %id,
            initialized = snapshot.initialized,
            authenticated = snapshot.authenticated,
            "session not usable, disconnecting"
        );
        manager.disconnect();
    }
}
