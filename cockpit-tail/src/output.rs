//! Terminal output for stream events.
//!
//! Text mode prints one human-readable line per event. JSON mode prints one
//! [`EventEnvelope`] per line for piping into other tools.

use std::io::Write;

use cockpit_stream::Event;
use serde::Serialize;

/// Versioned wrapper around every event printed in JSON mode.
///
/// Fields:
/// - `version`: Schema version (always 1 for now).
/// - `seq`: Monotonically increasing sequence number per run.
/// - `timestamp_ms`: UTC milliseconds when the envelope was created.
/// - `event`: The client event.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub version: u32,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(seq: u64, event: Event) -> Self {
        Self {
            version: 1,
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }
}

/// One line of text for `event`, without a timestamp.
pub fn describe(event: &Event) -> String {
    match event {
        Event::StateChanged { old, new } => format!("[state] {old} -> {new}"),
        Event::Message(record) => match record.resume_id() {
            Some(id) => format!("[{} #{id}] {}", record.event, record.payload),
            None => format!("[{}] {}", record.event, record.payload),
        },
        Event::Error(info) => {
            let tag = if info.retryable { "retrying" } else { "fatal" };
            format!("[error] {} ({tag}): {}", info.kind, info.message)
        }
    }
}

pub struct Printer {
    json: bool,
    seq: u64,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json, seq: 0 }
    }

    /// Format the next line and advance the sequence number.
    pub fn render(&mut self, event: &Event) -> anyhow::Result<String> {
        self.seq += 1;
        if self.json {
            let envelope = EventEnvelope::new(self.seq, event.clone());
            Ok(serde_json::to_string(&envelope)?)
        } else {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            Ok(format!("{now} {}", describe(event)))
        }
    }

    pub fn print(&mut self, event: &Event) -> anyhow::Result<()> {
        let line = self.render(event)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}
