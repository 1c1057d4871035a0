//! Connection manager: owns the single live channel for a client.
//!
//! Guarantees:
//!
//! - At most one channel is ever Connecting or Open.
//! - Every channel is tagged with a `generation`. Events from a channel that
//!   is no longer the owned one are dropped, so a superseded attempt can never
//!   change state or deliver frames.
//! - Abnormal closes are retried after a fixed delay, up to a ceiling. A close
//!   with [`CLOSE_NORMAL`] is never retried.
//! - Frames fan out to every subscriber in subscription order; a panicking
//!   subscriber does not affect the others.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify_common::id::{prefix, prefixed_ulid};
use notify_common::{decode_frame, NotificationRecord};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::SessionGate;
use crate::config::{redact_token, Config};

use super::events::{ReadyState, TransportEvent, CLOSE_NORMAL};
use super::poller::{FallbackPoller, PollerLease, RefreshFn};
use super::transport::{ChannelCloser, Connector};

/// Callback invoked once per decoded frame.
pub type MessageCallback = Arc<dyn Fn(&NotificationRecord) + Send + Sync>;

/// The channel currently owned by the manager.
struct OwnedChannel {
    generation: u64,
    conn_id: String,
    ready: ReadyState,
    closer: ChannelCloser,
}

struct PendingRetry {
    generation: u64,
    handle: JoinHandle<()>,
}

struct PollerSlot {
    leases: usize,
    poller: FallbackPoller,
}

/// Mutable connection bookkeeping. Only the manager's own handlers touch
/// `generation`, `reconnect_attempts` and the channel's readiness.
struct Inner {
    channel: Option<OwnedChannel>,
    /// Set once the first channel is created; distinguishes Idle from Closed.
    had_channel: bool,
    reconnect_attempts: u32,
    desired_connected: bool,
    generation: u64,
    retry: Option<PendingRetry>,
    poller: Option<PollerSlot>,
}

impl Inner {
    fn ready_state(&self) -> ReadyState {
        match &self.channel {
            Some(channel) => channel.ready,
            None if self.had_channel => ReadyState::Closed,
            None => ReadyState::Idle,
        }
    }

    /// Whether events tagged `generation` still belong to the owned channel.
    fn owns(&self, generation: u64) -> bool {
        self.generation == generation
            && self
                .channel
                .as_ref()
                .is_some_and(|c| c.generation == generation)
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.handle.abort();
            tracing::debug!(generation = retry.generation, "pending reconnect cancelled");
        }
    }
}

struct SubscriberEntry {
    id: String,
    callback: MessageCallback,
}

pub struct ConnectionManager {
    config: Arc<Config>,
    session: Arc<dyn SessionGate>,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<SubscriberEntry>>,
    state_tx: watch::Sender<ReadyState>,
    me: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<Config>,
        session: Arc<dyn SessionGate>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ReadyState::Idle);
        Arc::new_cyclic(|me| Self {
            config,
            session,
            connector,
            inner: Mutex::new(Inner {
                channel: None,
                had_channel: false,
                reconnect_attempts: 0,
                desired_connected: false,
                generation: 0,
                retry: None,
                poller: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            state_tx,
            me: me.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Connect / disconnect
    // -----------------------------------------------------------------------

    /// Make sure a channel exists. Idempotent; never blocks.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect(&self) {
        let mut inner = self.inner.lock();

        match inner.ready_state() {
            ReadyState::Open => {
                inner.desired_connected = true;
                return;
            }
            ReadyState::Connecting => {
                tracing::debug!(generation = inner.generation, "connect skipped, attempt in flight");
                return;
            }
            ReadyState::Idle | ReadyState::Closing | ReadyState::Closed => {}
        }

        let Some(credential) = self.session.credential() else {
            tracing::debug!("connect skipped, no credential available");
            return;
        };

        let url = match self.config.live_url(&credential) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "connect skipped, cannot build live channel url");
                return;
            }
        };

        // A Closing channel is superseded; make sure it really goes away.
        if let Some(stale) = inner.channel.take() {
            stale.closer.close(CLOSE_NORMAL);
        }
        inner.cancel_retry();

        inner.generation += 1;
        let generation = inner.generation;
        inner.desired_connected = true;

        let conn_id = prefixed_ulid(prefix::CONNECTION);
        tracing::info!(
            %conn_id,
            generation,
            attempt = inner.reconnect_attempts,
            url = %redact_token(&url),
            "opening live channel"
        );

        let channel = self.connector.open(url);
        inner.had_channel = true;
        inner.channel = Some(OwnedChannel {
            generation,
            conn_id,
            ready: ReadyState::Connecting,
            closer: channel.closer,
        });
        drop(inner);

        self.publish_state();
        tokio::spawn(pump_events(self.me.clone(), generation, channel.events));
    }

    /// Tear the channel down and stop reconnecting until the next `connect()`.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.desired_connected = false;
        inner.cancel_retry();
        inner.reconnect_attempts = 0;

        // The channel stays owned, as Closing, until its close event arrives.
        if let Some(channel) = inner.channel.as_mut() {
            if channel.ready != ReadyState::Closing {
                tracing::info!(
                    conn_id = %channel.conn_id,
                    generation = channel.generation,
                    "closing live channel"
                );
                channel.ready = ReadyState::Closing;
                channel.closer.close(CLOSE_NORMAL);
            }
        }
        drop(inner);

        self.publish_state();
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        let mut inner = self.inner.lock();
        if !inner.owns(generation) {
            tracing::debug!(
                generation,
                current = inner.generation,
                ?event,
                "stale channel event ignored"
            );
            return;
        }

        let closing = inner
            .channel
            .as_ref()
            .is_some_and(|c| c.ready == ReadyState::Closing);

        match event {
            TransportEvent::Open | TransportEvent::Message(_) if closing => {
                tracing::debug!(generation, "channel is closing, event ignored");
            }
            TransportEvent::Open => {
                inner.reconnect_attempts = 0;
                inner.desired_connected = true;
                if let Some(channel) = inner.channel.as_mut() {
                    channel.ready = ReadyState::Open;
                    tracing::info!(conn_id = %channel.conn_id, generation, "live channel open");
                }
                drop(inner);
                self.publish_state();
            }
            TransportEvent::Message(text) => {
                drop(inner);
                match decode_frame(&text) {
                    Ok(record) => self.fan_out(&record),
                    Err(e) => {
                        tracing::warn!(error = %e, generation, "dropping malformed frame");
                    }
                }
            }
            TransportEvent::Error(message) => {
                tracing::warn!(%message, generation, "live channel error");
            }
            TransportEvent::Closed(code) => {
                let channel = inner.channel.take();
                let conn_id = channel.map(|c| c.conn_id).unwrap_or_default();

                if code == CLOSE_NORMAL {
                    tracing::info!(%conn_id, generation, code, "live channel closed");
                } else if !inner.desired_connected {
                    tracing::debug!(%conn_id, generation, code, "live channel closed, not wanted");
                } else if inner.reconnect_attempts >= self.config.reconnect_ceiling {
                    tracing::warn!(
                        %conn_id,
                        generation,
                        code,
                        attempts = inner.reconnect_attempts,
                        "reconnect attempts exhausted, relying on polling"
                    );
                } else {
                    inner.reconnect_attempts += 1;
                    tracing::info!(
                        %conn_id,
                        generation,
                        code,
                        attempt = inner.reconnect_attempts,
                        delay_ms = self.config.reconnect_delay.as_millis() as u64,
                        "live channel dropped, scheduling reconnect"
                    );
                    self.schedule_retry(&mut inner, generation);
                }
                drop(inner);
                self.publish_state();
            }
        }
    }

    fn schedule_retry(&self, inner: &mut Inner, generation: u64) {
        let me = self.me.clone();
        let delay = self.config.reconnect_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = me.upgrade() {
                manager.fire_retry(generation);
            }
        });
        inner.cancel_retry();
        inner.retry = Some(PendingRetry { generation, handle });
    }

    /// Re-validate intent when a scheduled reconnect comes due.
    fn fire_retry(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.retry.as_ref().is_some_and(|r| r.generation == generation) {
            inner.retry = None;
        }

        if inner.generation != generation || !inner.desired_connected || inner.channel.is_some() {
            tracing::debug!(
                generation,
                current = inner.generation,
                desired = inner.desired_connected,
                "scheduled reconnect no longer needed"
            );
            return;
        }
        drop(inner);

        self.connect();
    }

    fn fan_out(&self, record: &NotificationRecord) {
        // Snapshot so subscribers may (un)subscribe from inside a callback.
        let targets: Vec<(String, MessageCallback)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id.clone(), s.callback.clone()))
            .collect();

        for (id, callback) in targets {
            if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
                tracing::warn!(subscription = %id, notification_id = record.id, "subscriber panicked");
            }
        }
    }

    fn publish_state(&self) {
        // Send under the lock so concurrent publishes cannot land out of order.
        let inner = self.inner.lock();
        let state = inner.ready_state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    /// Register `callback` for every decoded frame. Dropping the returned
    /// [`Subscription`] removes it.
    pub fn subscribe(&self, callback: MessageCallback) -> Subscription {
        let id = prefixed_ulid(prefix::SUBSCRIPTION);
        self.subscribers.lock().push(SubscriberEntry {
            id: id.clone(),
            callback,
        });
        tracing::debug!(subscription = %id, "subscriber added");
        Subscription {
            id,
            manager: self.me.clone(),
        }
    }

    fn unsubscribe(&self, id: &str) {
        self.subscribers.lock().retain(|s| s.id != id);
        tracing::debug!(subscription = %id, "subscriber removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    // -----------------------------------------------------------------------
    // Fallback poller
    // -----------------------------------------------------------------------

    /// Take a lease on the shared fallback poller, arming it if this is the
    /// first lease. Later leases share the poller armed by the first.
    pub fn acquire_poller(&self, interval: Duration, refresh: RefreshFn) -> PollerLease {
        let mut inner = self.inner.lock();
        match inner.poller.as_mut() {
            Some(slot) => slot.leases += 1,
            None => {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "fallback poller armed");
                inner.poller = Some(PollerSlot {
                    leases: 1,
                    poller: FallbackPoller::spawn(self.me.clone(), interval, refresh),
                });
            }
        }
        PollerLease {
            manager: self.me.clone(),
        }
    }

    pub(super) fn release_poller(&self) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.poller.as_mut() else {
            return;
        };
        slot.leases = slot.leases.saturating_sub(1);
        if slot.leases == 0 {
            inner.poller = None;
            tracing::debug!("fallback poller disarmed");
        }
    }

    pub fn poller_armed(&self) -> bool {
        self.inner
            .lock()
            .poller
            .as_ref()
            .is_some_and(|slot| slot.poller.is_armed())
    }

    /// The poller only refreshes while a channel is wanted but not open.
    pub(crate) fn should_poll(&self) -> bool {
        let inner = self.inner.lock();
        inner.desired_connected && inner.ready_state() != ReadyState::Open
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready_state()
    }

    /// Receiver notified on every readiness change.
    pub fn state_changes(&self) -> watch::Receiver<ReadyState> {
        self.state_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    pub fn desired_connected(&self) -> bool {
        self.inner.lock().desired_connected
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .lock()
            .retry
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.cancel_retry();
        if let Some(channel) = inner.channel.take() {
            channel.closer.close(CLOSE_NORMAL);
        }
    }
}

/// Forward one channel's events to the manager, tagged with its generation.
async fn pump_events(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let closed = matches!(event, TransportEvent::Closed(_));
        manager.handle_event(generation, event);
        if closed {
            break;
        }
    }
}

/// Registration handle returned by [`ConnectionManager::subscribe`].
pub struct Subscription {
    id: String,
    manager: Weak<ConnectionManager>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the callback now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(&self.id);
        }
    }
}
