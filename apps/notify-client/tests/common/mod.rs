#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time;

use notify_client::auth::MemorySession;
use notify_client::config::Config;
use notify_common::NotificationRecord;

pub const TOKEN: &str = "integration-token";

/// What a test asks an open server-side socket to do.
pub enum Push {
    Frame(String),
    Close(u16),
}

/// In-memory state behind the test notification server.
pub struct ServerState {
    pub records: Mutex<Vec<NotificationRecord>>,
    pub sockets: Mutex<Vec<mpsc::UnboundedSender<Push>>>,
    pub ws_accepted: AtomicUsize,
    pub ws_rejected: AtomicUsize,
    pub fail_mutations: AtomicBool,
    pub garbled_lists: AtomicBool,
    pub close_replies: AtomicUsize,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl ServerState {
    fn new(records: Vec<NotificationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            sockets: Mutex::new(Vec::new()),
            ws_accepted: AtomicUsize::new(0),
            ws_rejected: AtomicUsize::new(0),
            fail_mutations: AtomicBool::new(false),
            garbled_lists: AtomicBool::new(false),
            close_replies: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Push to the most recently accepted socket.
    pub fn push(&self, push: Push) {
        if let Some(tx) = self.sockets.lock().last() {
            let _ = tx.send(push);
        }
    }

    pub fn accepted(&self) -> usize {
        self.ws_accepted.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.ws_rejected.load(Ordering::SeqCst)
    }

    /// Server-initiated closes the client answered with its own close frame.
    pub fn close_replies(&self) -> usize {
        self.close_replies.load(Ordering::SeqCst)
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Start an actual TCP server with the live channel and REST endpoints.
pub async fn start_server(records: Vec<NotificationRecord>) -> TestServer {
    let state = Arc::new(ServerState::new(records));
    let app = Router::new()
        .route("/ws/notifications", get(live_channel))
        .route("/api/v1/notifications/new", get(fetch_new))
        .route("/api/v1/notifications/history", get(fetch_history))
        .route("/api/v1/notifications/read-all", put(mark_all_read))
        .route("/api/v1/notifications/{id}/read", put(mark_read))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state }
}

/// Client config pointed at `server` with short timers.
pub fn test_config(server: &TestServer) -> Config {
    let mut config = Config::new(server.base_url());
    config.reconnect_delay = Duration::from_millis(50);
    config.reconnect_ceiling = 3;
    config.debounce = Duration::from_millis(20);
    config.poll_interval = Duration::from_millis(200);
    config
}

pub fn logged_in_session() -> Arc<MemorySession> {
    Arc::new(MemorySession::logged_in(TOKEN))
}

pub fn record(id: i64, is_read: bool) -> NotificationRecord {
    NotificationRecord {
        id,
        title: format!("Notification {id}"),
        contents: "body".to_string(),
        kind: "system".to_string(),
        warn_level: 1,
        is_read,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

pub fn frame(record: &NotificationRecord) -> String {
    serde_json::to_string(record).unwrap()
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(time::Instant::now() < deadline, "condition not met in time");
        time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn live_channel(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let token = query.token.unwrap_or_default();
    state.seen_tokens.lock().push(token.clone());
    if token != TOKEN {
        state.ws_rejected.fetch_add(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    state.ws_accepted.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::unbounded_channel();
    state.sockets.lock().push(tx);
    ws.on_upgrade(move |socket| serve_socket(socket, rx, state))
}

async fn serve_socket(
    mut socket: WebSocket,
    mut rx: mpsc::UnboundedReceiver<Push>,
    state: Arc<ServerState>,
) {
    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Some(Push::Frame(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(Push::Close(code)) => {
                    let frame = CloseFrame { code, reason: "".into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    // Wait for the client's reply to finish the close handshake.
                    let reply = time::timeout(Duration::from_secs(2), socket.recv()).await;
                    if matches!(reply, Ok(Some(Ok(Message::Close(_))))) {
                        state.close_replies.fetch_add(1, Ordering::SeqCst);
                    }
                    return;
                }
                None => return,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn fetch_new(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.garbled_lists.load(Ordering::SeqCst) {
        return (StatusCode::OK, "[{\"id\": \"not-a-number\"}]").into_response();
    }
    Json(state.records.lock().clone()).into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: usize,
}

async fn fetch_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<NotificationRecord>>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let records = state.records.lock();
    Ok(Json(records.iter().take(query.limit).cloned().collect()))
}

async fn mark_read(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if state.fail_mutations.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match state.records.lock().iter_mut().find(|r| r.id == id) {
        Some(record) => {
            record.is_read = true;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn mark_all_read(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if state.fail_mutations.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    for record in state.records.lock().iter_mut() {
        record.is_read = true;
    }
    StatusCode::NO_CONTENT
}
