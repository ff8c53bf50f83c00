//! Shared helpers: a scripted connector and event-wait utilities.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use cockpit_stream::transport::FrameStream;
use cockpit_stream::{
    ConnectionState, Connector, Event, EventRecord, OpenRequest, StreamConfig, TransportError,
};
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, StreamExt};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const ENDPOINT: &str = "http://cockpit.test/api/v1/events";

/// What the next `open` call does.
pub enum Outcome {
    /// Fails with a retryable error.
    Refuse,
    /// Fails with a non-retryable error (HTTP 204).
    Reject,
    /// Never resolves; only the connect timeout ends it.
    Hang,
    /// Opens; frames come from the paired [`Feed`].
    Open(fmpsc::UnboundedReceiver<Result<EventRecord, TransportError>>),
}

#[derive(Clone, Copy)]
pub enum Fallback {
    Refuse,
    Hang,
}

struct Inner {
    requests: Vec<OpenRequest>,
    script: VecDeque<Outcome>,
    fallback: Fallback,
}

/// Connector whose outcomes are queued by the test. Records every request.
#[derive(Clone)]
pub struct ScriptedConnector {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedConnector {
    pub fn new(fallback: Fallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                requests: Vec::new(),
                script: VecDeque::new(),
                fallback,
            })),
        }
    }

    pub fn refusing() -> Self {
        Self::new(Fallback::Refuse)
    }

    pub fn hanging() -> Self {
        Self::new(Fallback::Hang)
    }

    pub fn push(&self, outcome: Outcome) {
        self.inner.lock().script.push_back(outcome);
    }

    /// Queue a successful open and return the handle feeding it.
    pub fn push_open(&self) -> Feed {
        let (tx, rx) = fmpsc::unbounded();
        self.push(Outcome::Open(rx));
        Feed { tx }
    }

    pub fn requests(&self) -> Vec<OpenRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().requests.len()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        let outcome = {
            let mut inner = self.inner.lock();
            inner.requests.push(request);
            let fallback = inner.fallback;
            inner.script.pop_front().unwrap_or(match fallback {
                Fallback::Refuse => Outcome::Refuse,
                Fallback::Hang => Outcome::Hang,
            })
        };
        match outcome {
            Outcome::Refuse => {
                async { Err(TransportError::Closed("connection refused".to_string())) }.boxed()
            }
            Outcome::Reject => async { Err(TransportError::from_status(204)) }.boxed(),
            Outcome::Hang => futures::future::pending::<Result<FrameStream, TransportError>>().boxed(),
            Outcome::Open(rx) => async move { Ok(rx.boxed()) }.boxed(),
        }
    }
}

/// Server side of an opened scripted connection. Drop it to close the stream.
/// Sends after the client has dropped the connection are discarded.
pub struct Feed {
    tx: fmpsc::UnboundedSender<Result<EventRecord, TransportError>>,
}

impl Feed {
    pub fn send(&self, id: Option<&str>, payload: &str) {
        let record = EventRecord::new(id.map(str::to_string), payload);
        let _ = self.tx.unbounded_send(Ok(record));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(TransportError::Body(reason.to_string())));
    }
}

/// Default delays and timeout with a custom retry budget.
pub fn config(max_retries: u32) -> StreamConfig {
    StreamConfig {
        max_retries,
        ..Default::default()
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(3600), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collect events up to and including the transition into `state`.
pub async fn until_state(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    state: ConnectionState,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, Event::StateChanged { new, .. } if new == state);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Let spawned tasks run without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
