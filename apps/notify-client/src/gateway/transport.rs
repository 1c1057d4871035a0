//! Live-channel transport.
//!
//! Opening a channel never blocks: [`Connector::open`] returns immediately and
//! the handshake, frames, and close are reported as [`TransportEvent`]s on the
//! channel's receiver. This mirrors how the manager consumes them: one event
//! at a time, each tagged with the attempt it belongs to.

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::config::redact_token;
use crate::error::ClientError;

use super::events::{TransportEvent, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS};

/// One opened channel: its event stream and a handle to close it.
pub struct Channel {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub closer: ChannelCloser,
}

/// Requests a close of the channel it was created with.
///
/// Dropping the last closer closes the channel with [`CLOSE_NORMAL`].
#[derive(Clone)]
pub struct ChannelCloser {
    tx: mpsc::UnboundedSender<u16>,
}

impl ChannelCloser {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<u16>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn close(&self, code: u16) {
        // The transport task may already be gone.
        let _ = self.tx.send(code);
    }
}

/// Opens live channels.
pub trait Connector: Send + Sync {
    /// Start opening a channel to `url`. Must be called inside a Tokio runtime.
    fn open(&self, url: Url) -> Channel;
}

// ---------------------------------------------------------------------------
// tokio-tungstenite implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, url: Url) -> Channel {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (closer, close_rx) = ChannelCloser::new();
        tokio::spawn(run_socket(url, event_tx, close_rx));
        Channel { events, closer }
    }
}

async fn run_socket(
    url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut close_rx: mpsc::UnboundedReceiver<u16>,
) {
    let shown = redact_token(&url);

    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(url.as_str()) => res,
        code = close_rx.recv() => {
            // Closed before the handshake finished.
            let _ = events.send(TransportEvent::Closed(code.unwrap_or(CLOSE_NORMAL)));
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let err = ClientError::from(e);
            tracing::debug!(error = %err, url = %shown, "live channel handshake failed");
            let _ = events.send(TransportEvent::Error(err.to_string()));
            let _ = events.send(TransportEvent::Closed(CLOSE_ABNORMAL));
            return;
        }
    };

    if events.send(TransportEvent::Open).is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let event = match String::from_utf8(data.to_vec()) {
                            Ok(text) => TransportEvent::Message(text),
                            Err(_) => TransportEvent::Error("binary frame is not UTF-8".to_string()),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS);
                        // Write the queued close reply so the handshake completes.
                        if let Err(e) = ws_tx.flush().await {
                            tracing::debug!(error = %e, url = %shown, "close reply not delivered");
                        }
                        let _ = events.send(TransportEvent::Closed(code));
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let err = ClientError::from(e);
                        tracing::debug!(error = %err, url = %shown, "live channel read error");
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        let _ = events.send(TransportEvent::Closed(CLOSE_ABNORMAL));
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed(CLOSE_ABNORMAL));
                        return;
                    }
                }
            }

            code = close_rx.recv() => {
                let code = code.unwrap_or(CLOSE_NORMAL);
                let close_msg = Message::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: String::new().into(),
                }));
                let _ = ws_tx.send(close_msg).await;
                let _ = events.send(TransportEvent::Closed(code));
                return;
            }
        }
    }

    // Event receiver dropped: nobody owns this channel any more.
    let _ = ws_tx.send(Message::Close(None)).await;
}
