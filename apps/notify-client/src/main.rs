use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_client::auth::{MemorySession, SessionGate};
use notify_client::config::Config;
use notify_client::NotifyClient;
use notify_common::NotificationRecord;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        base_url = %config.base_url,
        live_path = %config.live_path,
        reconnect_ceiling = config.reconnect_ceiling,
        "notify-client configured"
    );

    let session = Arc::new(MemorySession::new());
    session.set_initialized(true);
    match std::env::var("NOTIFY_TOKEN").ok().filter(|t| !t.is_empty()) {
        Some(token) => session.login(token),
        None => tracing::warn!("NOTIFY_TOKEN not set, staying logged out"),
    }

    let client = NotifyClient::new(config, session.clone() as Arc<dyn SessionGate>);

    let store = client.store.clone();
    let binding = client.bind(Arc::new(move |record: &NotificationRecord| {
        tracing::info!(
            notification_id = record.id,
            kind = %record.kind,
            title = %record.title,
            unread = store.unread_count(),
            "notification received"
        );
    }));

    if session.authenticated() {
        match client.store.load_latest().await {
            Ok(unread) => tracing::info!(
                count = client.store.records().len(),
                unread,
                "initial notifications loaded"
            ),
            Err(e) => tracing::warn!(error = %e, "initial load failed, waiting for live channel"),
        }
    }

    let mut state = client.manager.state_changes();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let ready = *state.borrow_and_update();
                tracing::info!(state = %ready, "live channel state");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    drop(binding);
    client.disconnect();
}
