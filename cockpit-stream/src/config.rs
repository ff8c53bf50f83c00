//! Client configuration, fixed at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
/// Default cap on the exponential term.
pub const DEFAULT_MAX_DELAY_MS: u64 = 32_000;
/// Default upper bound (exclusive) of the additive jitter.
pub const DEFAULT_MAX_JITTER_MS: u64 = 1_000;
/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Default time allowed for an attempt to open.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Retry and timeout policy for a [`StreamClient`](crate::StreamClient).
///
/// Every field has a default, so a partial TOML table such as
/// `max_retries = 3` deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay for the first retry; doubled per failed attempt.
    pub base_delay_ms: u64,
    /// Cap on the exponential term (jitter is added on top).
    pub max_delay_ms: u64,
    /// Jitter is drawn uniformly from `[0, max_jitter_ms)`. Zero disables it.
    pub max_jitter_ms: u64,
    /// Consecutive failed attempts allowed before the client enters `failed`.
    pub max_retries: u32,
    /// An attempt with no open signal and no message after this long fails with `TIMEOUT`.
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl StreamConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
