//! Close codes, transport events, and channel readiness.

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Clean, intentional shutdown. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame (handshake failure, reset, EOF).
pub const CLOSE_ABNORMAL: u16 = 1006;

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

/// Something that happened on one live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; frames may follow.
    Open,
    /// A text frame from the server.
    Message(String),
    /// A transport-level error. The close handler does the bookkeeping.
    Error(String),
    /// The channel is gone. Carries the close code.
    Closed(u16),
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Readiness of the owned channel, derived from the events it has produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No channel has ever been opened.
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Whether a channel in this state counts as live.
    pub fn is_live(&self) -> bool {
        matches!(self, ReadyState::Connecting | ReadyState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Idle => "idle",
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
