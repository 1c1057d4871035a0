//! Scripted transport and fixtures for gateway unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use notify_common::NotificationRecord;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::mpsc;

use crate::auth::MemorySession;
use crate::config::Config;
use crate::error::ClientError;

use super::events::{TransportEvent, CLOSE_ABNORMAL};
use super::manager::{ConnectionManager, MessageCallback};
use super::poller::RefreshFn;
use super::transport::{Channel, ChannelCloser, Connector};

pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// Events are emitted by the test through [`ScriptedConnector::emit`].
    Manual,
    /// Every channel fails its handshake straight away.
    FailImmediately,
}

struct Opened {
    url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    close_requests: Arc<Mutex<Vec<u16>>>,
    closed: Arc<AtomicBool>,
}

/// A [`Connector`] whose channels are driven by the test.
///
/// Close requests are answered with `Closed(code)` the way a real transport
/// would, and recorded for assertions.
pub struct ScriptedConnector {
    mode: ScriptMode,
    opened: Mutex<Vec<Opened>>,
}

impl ScriptedConnector {
    pub fn new(mode: ScriptMode) -> Self {
        Self {
            mode,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn url(&self, index: usize) -> Url {
        self.opened.lock()[index].url.clone()
    }

    /// Push an event into the `index`-th opened channel.
    pub fn emit(&self, index: usize, event: TransportEvent) {
        let opened = self.opened.lock();
        if matches!(event, TransportEvent::Closed(_)) {
            opened[index].closed.store(true, Ordering::SeqCst);
        }
        // The manager may have stopped listening already.
        let _ = opened[index].events.send(event);
    }

    /// Channels that have not reported `Closed` yet.
    pub fn live_channels(&self) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|o| !o.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn close_requests(&self, index: usize) -> Vec<u16> {
        self.opened.lock()[index].close_requests.lock().clone()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, url: Url) -> Channel {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (closer, mut close_rx) = ChannelCloser::new();
        let close_requests = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        if self.mode == ScriptMode::FailImmediately {
            let _ = event_tx.send(TransportEvent::Error("connection refused".to_string()));
            let _ = event_tx.send(TransportEvent::Closed(CLOSE_ABNORMAL));
            closed.store(true, Ordering::SeqCst);
        }

        let requests = close_requests.clone();
        let close_tx = event_tx.clone();
        let close_flag = closed.clone();
        tokio::spawn(async move {
            if let Some(code) = close_rx.recv().await {
                requests.lock().push(code);
                close_flag.store(true, Ordering::SeqCst);
                let _ = close_tx.send(TransportEvent::Closed(code));
            }
        });

        self.opened.lock().push(Opened {
            url,
            events: event_tx,
            close_requests,
            closed,
        });
        Channel { events, closer }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::new("http://notify.test");
    config.reconnect_delay = RETRY_DELAY;
    config.debounce = DEBOUNCE;
    config
}

/// A manager over a scripted connector and a logged-in session.
pub fn manager_with(
    mode: ScriptMode,
) -> (Arc<ConnectionManager>, Arc<ScriptedConnector>, Arc<MemorySession>) {
    let connector = Arc::new(ScriptedConnector::new(mode));
    let session = Arc::new(MemorySession::logged_in("test-token"));
    let manager = ConnectionManager::new(
        Arc::new(test_config()),
        session.clone(),
        connector.clone(),
    );
    (manager, connector, session)
}

/// A subscriber that records every record it sees.
pub fn collector() -> (Arc<Mutex<Vec<NotificationRecord>>>, MessageCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: MessageCallback = Arc::new(move |record: &NotificationRecord| {
        sink.lock().push(record.clone());
    });
    (seen, callback)
}

/// A refresh that only counts its invocations.
pub fn refresh_counter() -> (Arc<AtomicUsize>, RefreshFn) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let refresh: RefreshFn = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<(), ClientError>(()) }.boxed()
    });
    (calls, refresh)
}

pub fn frame(id: i64, is_read: bool) -> String {
    serde_json::json!({
        "id": id,
        "title": format!("Notification {id}"),
        "contents": "body",
        "type": "system",
        "warnLevel": 1,
        "isRead": is_read,
        "createdAt": "2024-05-01T10:00:00Z",
    })
    .to_string()
}
