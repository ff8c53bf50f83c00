//! Persistent configuration for cockpit-tail.
//!
//! Config file lives at `~/.config/cockpit/tail.toml`:
//!
//! ```toml
//! endpoint = "https://cockpit.example.com/api/v1/events"
//! tenant = "acme"
//!
//! [stream]
//! max_retries = 5
//! base_delay_ms = 1000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cockpit_stream::StreamConfig;
use serde::{Deserialize, Serialize};

/// Tenant used when neither the CLI nor the config file names one.
pub const DEFAULT_TENANT: &str = "default";

/// User configuration (persisted in tail.toml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Stream endpoint URL.
    pub endpoint: Option<String>,
    /// Tenant whose resume point is stored.
    pub tenant: Option<String>,
    /// SQLite file for the last event id.
    pub store: Option<PathBuf>,
    /// Retry and timeout policy. Missing keys keep their defaults.
    #[serde(default)]
    pub stream: StreamConfig,
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cockpit")
        .join("tail.toml")
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cockpit")
        .join("stream.db")
}

impl Config {
    /// Load `explicit`, or the default file if present.
    ///
    /// An explicit file must exist and parse. A broken default file is
    /// reported and skipped.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("can't read {}", path.display()))?;
            return toml::from_str(&text).with_context(|| format!("bad config file {}", path.display()));
        }

        let path = config_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return Ok(c),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "bad config file"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "can't read config file"),
            }
        }
        Ok(Self::default())
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug)]
pub struct Resolved {
    pub endpoint: String,
    pub tenant: String,
    pub store: PathBuf,
    pub last_event_id: Option<String>,
    pub json: bool,
    pub stream: StreamConfig,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Result<Self> {
        let endpoint = cli
            .endpoint
            .clone()
            .or_else(|| config.endpoint.clone())
            .context("no endpoint: pass --endpoint or set `endpoint` in the config file")?;

        let tenant = cli
            .tenant
            .clone()
            .or_else(|| config.tenant.clone())
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());

        let store = cli
            .store
            .clone()
            .or_else(|| config.store.clone())
            .unwrap_or_else(default_store_path);

        let mut stream = config.stream.clone();
        if let Some(n) = cli.max_retries {
            stream.max_retries = n;
        }
        if let Some(ms) = cli.base_delay_ms {
            stream.base_delay_ms = ms;
        }
        if let Some(ms) = cli.max_delay_ms {
            stream.max_delay_ms = ms;
        }
        if let Some(ms) = cli.connect_timeout_ms {
            stream.connect_timeout_ms = ms;
        }

        Ok(Self {
            endpoint,
            tenant,
            store,
            last_event_id: cli.last_event_id.clone().filter(|id| !id.is_empty()),
            json: cli.json,
            stream,
        })
    }
}
