//! cockpit-tail: follow a cockpit event stream from the terminal.
//!
//! Connects to an SSE endpoint, prints every event (plain text or JSON
//! lines), and resumes from the last delivered id across restarts. Ctrl-C
//! disconnects cleanly. Exits non-zero once the client gives up.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cockpit_stream::{ConnectionState, Event, StreamClient};

mod config;
mod output;

use config::{Config, Resolved};
use output::Printer;

#[derive(Parser, Debug)]
#[command(name = "cockpit-tail", about = "Follow a cockpit event stream")]
struct Cli {
    /// Stream endpoint URL
    #[arg(long, env = "COCKPIT_ENDPOINT")]
    endpoint: Option<String>,

    /// Tenant whose resume point is stored
    #[arg(long, env = "COCKPIT_TENANT")]
    tenant: Option<String>,

    /// Config file (default: ~/.config/cockpit/tail.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite file holding the last event id (default: <data dir>/cockpit/stream.db)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Resume after this id instead of the stored one
    #[arg(long)]
    last_event_id: Option<String>,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Failed attempts before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// First retry delay in milliseconds
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Cap on the retry delay in milliseconds
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Per-attempt connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cockpit_tail=info,cockpit_stream=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = Config::load(cli.config.as_deref())?;
    let resolved = Resolved::merge(&cli, &file)?;

    if let Some(parent) = resolved.store.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let client = StreamClient::builder(resolved.tenant.clone())
        .config(resolved.stream.clone())
        .store_path(&resolved.store)
        .build()?;
    let mut events = client.subscribe();

    tracing::info!(
        endpoint = %resolved.endpoint,
        tenant = %resolved.tenant,
        store = %resolved.store.display(),
        "Starting cockpit-tail"
    );
    client.connect(resolved.endpoint.clone(), resolved.last_event_id.clone());

    let mut printer = Printer::new(resolved.json);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let code = loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("Interrupted, disconnecting");
                client.disconnect();
                while let Ok(event) = events.try_recv() {
                    printer.print(&event)?;
                }
                break ExitCode::SUCCESS;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break ExitCode::SUCCESS;
                };
                printer.print(&event)?;
                if let Event::StateChanged { new, .. } = event
                    && matches!(new, ConnectionState::Failed | ConnectionState::Error)
                {
                    tracing::error!(state = %new, "Stream stopped");
                    break ExitCode::FAILURE;
                }
            }
        }
    };

    Ok(code)
}
