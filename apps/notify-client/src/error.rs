use std::fmt;

use notify_common::FrameError;

/// Broad category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Live channel could not be opened or broke mid-stream.
    Transport,
    /// A payload could not be decoded.
    Decode,
    /// REST call failed or returned a non-success status.
    Http,
    /// The server rejected the credential.
    Unauthorized,
    /// Invalid client configuration.
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Decode => "DECODE_ERROR",
            ErrorKind::Http => "HTTP_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }
}

/// Client-level error type shared by the REST layer and the live channel.
#[derive(Debug)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the error came from a REST response.
    pub status: Option<u16>,
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
            status: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Decode,
            message: message.into(),
            status: None,
        }
    }

    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Http,
            message: message.into(),
            status,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            message: message.into(),
            status: Some(401),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Config,
            message: message.into(),
            status: None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        tracing::debug!(?err, "http client error");
        let status = err.status().map(|s| s.as_u16());
        if err.is_decode() {
            return Self::decode(err.to_string());
        }
        Self::http(status, err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        Self::decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(err.to_string())
    }
}
