//! Error taxonomy reported to subscribers, plus the crate's error types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification attached to every error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The underlying connection could not be established.
    OpenFailure,
    /// No ready signal within the connect timeout.
    Timeout,
    /// An established stream was closed by the server or the network.
    StreamClosed,
    /// Retry budget exhausted. Terminal, never retried automatically.
    MaxRetriesExceeded,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenFailure => "OPEN_FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a [`Connector`](crate::Connector) or its frame stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server answered HTTP {status}")]
    Status { status: u16, retryable: bool },

    #[error("expected text/event-stream, got {0:?}")]
    ContentType(String),

    #[error("stream body failed: {0}")]
    Body(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Body(_) | Self::Closed(_) => true,
            Self::Status { retryable, .. } => *retryable,
            Self::ContentType(_) => false,
        }
    }

    /// Classify an HTTP status the server answered the stream request with.
    pub fn from_status(status: u16) -> Self {
        let retryable = matches!(status, 408 | 429) || (500..600).contains(&status);
        Self::Status { status, retryable }
    }
}

/// Errors returned by [`StreamClient`](crate::StreamClient) construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("stream client must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("last-event-id store failed: {0}")]
    Store(#[from] anyhow::Error),
}
