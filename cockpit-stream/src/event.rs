//! Events emitted by the stream client for the UI layer to consume.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::state::ConnectionState;

/// One message delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Server-assigned id, if the message (or an earlier one) carried one.
    pub id: Option<String>,
    /// SSE event type; `"message"` when the server named none.
    pub event: String,
    /// Opaque payload (the SSE `data` lines joined by `\n`).
    pub payload: String,
}

impl EventRecord {
    pub fn new(id: Option<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            event: "message".to_string(),
            payload: payload.into(),
        }
    }

    /// The id, unless it is absent or empty.
    pub fn resume_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Details of one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// The client will retry on its own.
    pub retryable: bool,
    pub message: String,
}

/// Events that the client emits to its subscribers.
///
/// Serialized with `#[serde(tag = "type", content = "data")]` so consumers
/// can switch on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Emitted on every transition, never with `old == new`.
    StateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },

    /// A message from the server, in arrival order.
    Message(EventRecord),

    /// A failed attempt (or the terminal give-up). Always precedes the
    /// transition it causes.
    Error(ErrorInfo),
}
