use std::time::Duration;

use reqwest::Url;

use crate::error::ClientError;

/// Notification client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server origin (e.g. `http://localhost:4002`). The live channel uses the
    /// matching `ws`/`wss` scheme.
    pub base_url: String,
    /// Path of the live notification channel.
    pub live_path: String,
    /// Consecutive abnormal closes tolerated before automatic reconnection stops.
    pub reconnect_ceiling: u32,
    /// Fixed delay between a close and the reconnect attempt it schedules.
    pub reconnect_delay: Duration,
    /// How long session-state changes must settle before the binding acts.
    pub debounce: Duration,
    /// Fallback poll interval used while the live channel is not open.
    pub poll_interval: Duration,
    /// Page size for history loads.
    pub history_limit: u32,
}

pub const DEFAULT_LIVE_PATH: &str = "/ws/notifications";
pub const DEFAULT_RECONNECT_CEILING: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

impl Config {
    /// Build a configuration with defaults for everything but the origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            live_path: DEFAULT_LIVE_PATH.to_string(),
            reconnect_ceiling: DEFAULT_RECONNECT_CEILING,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let mut config = Self::new(required_var("NOTIFY_BASE_URL"));
        if let Some(path) = std::env::var("NOTIFY_LIVE_PATH").ok().filter(|s| !s.is_empty()) {
            config.live_path = path;
        }
        config.reconnect_ceiling = parsed_var("NOTIFY_RECONNECT_CEILING", DEFAULT_RECONNECT_CEILING);
        config.reconnect_delay =
            Duration::from_millis(parsed_var("NOTIFY_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS));
        config.debounce = Duration::from_millis(parsed_var("NOTIFY_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS));
        config.poll_interval =
            Duration::from_millis(parsed_var("NOTIFY_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS));
        config.history_limit = parsed_var("NOTIFY_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT);
        config
    }

    /// URL of a REST endpoint under `/api/v1`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Live-channel URL carrying `credential` as the `token` query parameter.
    pub fn live_url(&self, credential: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::config(format!("invalid base url '{}': {e}", self.base_url)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ClientError::config(format!("unsupported url scheme '{other}'")));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::config(format!("cannot use scheme '{scheme}'")))?;

        let path = if self.live_path.starts_with('/') {
            self.live_path.clone()
        } else {
            format!("/{}", self.live_path)
        };
        url.set_path(&path);
        url.set_query(None);
        url.query_pairs_mut().append_pair("token", credential);
        Ok(url)
    }
}

/// Render a live-channel URL for logs with the credential masked.
pub fn redact_token(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.set_query(None);
    if !pairs.is_empty() {
        let mut query = masked.query_pairs_mut();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
    }
    masked.to_string()
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
