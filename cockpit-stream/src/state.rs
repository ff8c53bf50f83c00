//! Connection states reported to subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the logical stream. Exactly one state holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying to be. Initial state.
    #[default]
    Idle,
    /// An open request is outstanding.
    Connecting,
    /// The stream is open and delivering events.
    Connected,
    /// The last attempt failed; a retry timer is pending.
    Reconnecting,
    /// The server refused the stream in a way retrying will not fix.
    Error,
    /// Retry budget exhausted. Left only by an explicit call.
    Failed,
}

impl ConnectionState {
    /// A connection attempt is open or outstanding.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// No automatic transition will leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Error | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
