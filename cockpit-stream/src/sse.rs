//! Incremental decoder for the `text/event-stream` wire format.
//!
//! Feed it body chunks as they arrive; it returns every event completed by
//! that chunk. Lines end in LF or CRLF. Multi-byte characters may straddle
//! chunk boundaries.

use crate::event::EventRecord;

const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: String,
    has_data: bool,
    event_type: String,
    /// Sticky across events until the server sends an empty `id`.
    last_id: Option<String>,
    started: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of the response body.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        self.pending.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let mut line = String::from_utf8_lossy(&line).into_owned();
            if !self.started {
                self.started = true;
                if let Some(stripped) = line.strip_prefix('\u{feff}') {
                    line = stripped.to_string();
                }
            }
            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        records
    }

    fn process_line(&mut self, line: &str) -> Option<EventRecord> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event_type = value.to_string(),
            "id" if !value.contains('\0') => {
                self.last_id = (!value.is_empty()).then(|| value.to_string());
            }
            // `retry` is ignored: reconnect timing is owned by the client's backoff.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<EventRecord> {
        let event_type = std::mem::take(&mut self.event_type);
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(EventRecord {
            id: self.last_id.clone(),
            event: if event_type.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event_type
            },
            payload: std::mem::take(&mut self.data),
        })
    }
}
