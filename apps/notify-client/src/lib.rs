pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod store;

use std::sync::Arc;

use futures_util::FutureExt;
use notify_common::NotificationRecord;

use api::{HttpNotificationApi, NotificationApi};
use auth::SessionGate;
use config::Config;
use gateway::{
    ConnectionManager, Connector, MessageCallback, NotificationBinding, RefreshFn, Subscription,
    TungsteniteConnector,
};
use store::NotificationStore;

/// Root composition of the notification client.
///
/// Owns the one shared connection manager and the record store. Construct it
/// once per session and hand out bindings to consumers.
pub struct NotifyClient {
    pub config: Arc<Config>,
    pub session: Arc<dyn SessionGate>,
    pub api: Arc<dyn NotificationApi>,
    pub manager: Arc<ConnectionManager>,
    pub store: Arc<NotificationStore>,
    _store_subscription: Subscription,
}

impl NotifyClient {
    /// Production wiring: REST over `reqwest`, live channel over
    /// `tokio-tungstenite`.
    pub fn new(config: Config, session: Arc<dyn SessionGate>) -> Self {
        let config = Arc::new(config);
        let api: Arc<dyn NotificationApi> =
            Arc::new(HttpNotificationApi::new(config.clone(), session.clone()));
        Self::with_parts(config, session, api, Arc::new(TungsteniteConnector))
    }

    pub fn with_parts(
        config: Arc<Config>,
        session: Arc<dyn SessionGate>,
        api: Arc<dyn NotificationApi>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let manager = ConnectionManager::new(config.clone(), session.clone(), connector);
        let store = Arc::new(NotificationStore::new(api.clone()));

        // Frames are reconciled here exactly once, however many bindings exist.
        let sink = store.clone();
        let store_subscription = manager.subscribe(Arc::new(move |record: &NotificationRecord| {
            sink.apply_pushed(record.clone());
        }));

        Self {
            config,
            session,
            api,
            manager,
            store,
            _store_subscription: store_subscription,
        }
    }

    /// Mount a binding for one consumer. `on_message` sees every frame after
    /// the store has reconciled it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn bind(&self, on_message: MessageCallback) -> NotificationBinding {
        let store = self.store.clone();
        let refresh: RefreshFn = Arc::new(move || {
            let store = store.clone();
            async move { store.load_latest().await.map(|_| ()) }.boxed()
        });
        NotificationBinding::mount(&self.manager, self.session.clone(), on_message, Some(refresh))
    }

    /// Load one page of history using the configured page size.
    pub async fn load_history(&self) -> Result<usize, error::ClientError> {
        self.store.load_history(self.config.history_limit).await
    }

    pub fn connect(&self) {
        self.manager.connect();
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }
}
