//! Stream client: the tokio driver around [`StreamMachine`].
//!
//! This is the main entry point for SDK consumers. It owns the connection
//! task and the two timers (connect timeout, retry backoff), persists the
//! last event id, and fans events out to subscribers.
//!
//! ## Ordering
//!
//! All state lives behind one lock. Public calls and task completions apply
//! their input to the machine and carry out the resulting actions while
//! holding it, so transitions never interleave and every subscriber sees
//! events in the same order. Callbacks registered with `on_*` run on their
//! own task, never under the lock, so they may call back into the client.
//!
//! ## Lifetime
//!
//! Dropping a client does not stop it; call [`StreamClient::disconnect`] to
//! release the connection and pending timers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backoff::RetryState;
use crate::config::StreamConfig;
use crate::error::ClientError;
use crate::event::{ErrorInfo, Event, EventRecord};
use crate::machine::{Action, StreamMachine};
use crate::state::ConnectionState;
use crate::store::{LastEventIdStore, MemoryStore, SqliteStore};
use crate::transport::{Connector, OpenRequest, SseConnector};

/// Builder for [`StreamClient`].
pub struct StreamClientBuilder {
    tenant: String,
    config: StreamConfig,
    connector: Option<Arc<dyn Connector>>,
    store: Option<Arc<dyn LastEventIdStore>>,
    store_path: Option<PathBuf>,
    jitter_seed: Option<u64>,
}

impl StreamClientBuilder {
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Connection primitive. Defaults to [`SseConnector`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Durable last-event-id store. Defaults to a [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn LastEventIdStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist the last event id in a SQLite file at `path`, opened by
    /// [`build`](Self::build). Ignored when [`store`](Self::store) is set.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Seed the jitter source for reproducible delays.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<StreamClient, ClientError> {
        let runtime = Handle::try_current()?;
        let connector = match self.connector {
            Some(c) => c,
            None => Arc::new(SseConnector::new()?),
        };
        let store: Arc<dyn LastEventIdStore> = match (self.store, &self.store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(SqliteStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let retry = match self.jitter_seed {
            Some(seed) => RetryState::with_seed(&self.config, seed),
            None => RetryState::new(&self.config),
        };

        Ok(StreamClient {
            shared: Arc::new(Shared {
                tenant: self.tenant,
                config: self.config.clone(),
                connector,
                store,
                runtime,
                core: Mutex::new(Core {
                    machine: StreamMachine::with_retry(&self.config, retry),
                    subscribers: Vec::new(),
                    connection: None,
                    connect_timer: None,
                    retry_timer: None,
                }),
            }),
        })
    }
}

/// A handle to one logical event stream for one tenant.
///
/// Cheap to clone; clones share the same stream.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

struct Shared {
    tenant: String,
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn LastEventIdStore>,
    runtime: Handle,
    core: Mutex<Core>,
}

struct Core {
    machine: StreamMachine,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
    connection: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl StreamClient {
    pub fn builder(tenant: impl Into<String>) -> StreamClientBuilder {
        StreamClientBuilder {
            tenant: tenant.into(),
            config: StreamConfig::default(),
            connector: None,
            store: None,
            store_path: None,
            jitter_seed: None,
        }
    }

    // ── Control ──

    /// Start streaming from `endpoint`.
    ///
    /// No-op while connecting, connected or waiting to retry. The resume hint
    /// is `last_event_id` if given, else the id stored for this tenant.
    pub fn connect(&self, endpoint: impl Into<String>, last_event_id: Option<String>) {
        let hint = last_event_id.or_else(|| self.shared.stored_last_event_id());
        let endpoint = endpoint.into();
        self.shared.apply(|m| m.connect(endpoint, hint));
    }

    /// Close the connection, cancel pending timers, return to `idle`.
    pub fn disconnect(&self) {
        self.shared.apply(StreamMachine::disconnect);
    }

    /// Cancel any pending retry and attempt a connection right now, from any
    /// state including `failed`. The retry counter is left untouched.
    pub fn reconnect(&self) {
        self.shared.apply(StreamMachine::reconnect);
    }

    // ── Inspection ──

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.core.lock().machine.state()
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared
            .core
            .lock()
            .machine
            .last_event_id()
            .map(str::to_string)
    }

    pub fn retry_attempt(&self) -> u32 {
        self.shared.core.lock().machine.retry_attempt()
    }

    pub fn max_retries(&self) -> u32 {
        self.shared.config.max_retries
    }

    /// Delay (jitter included) of the most recently scheduled retry.
    pub fn last_delay(&self) -> Option<Duration> {
        self.shared.core.lock().machine.last_delay()
    }

    pub fn tenant(&self) -> &str {
        &self.shared.tenant
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    // ── Subscriptions ──

    /// Receive every event emitted from now on, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.core.lock().subscribers.push(tx);
        rx
    }

    /// Call `f(old, new)` on every state change. Abort the handle to unsubscribe.
    pub fn on_state_change<F>(&self, f: F) -> JoinHandle<()>
    where
        F: Fn(ConnectionState, ConnectionState) + Send + 'static,
    {
        self.listen(move |event| {
            if let Event::StateChanged { old, new } = event {
                f(*old, *new);
            }
        })
    }

    /// Call `f` for every received message.
    pub fn on_message<F>(&self, f: F) -> JoinHandle<()>
    where
        F: Fn(&EventRecord) + Send + 'static,
    {
        self.listen(move |event| {
            if let Event::Message(record) = event {
                f(record);
            }
        })
    }

    /// Call `f` for every error notification.
    pub fn on_error<F>(&self, f: F) -> JoinHandle<()>
    where
        F: Fn(&ErrorInfo) + Send + 'static,
    {
        self.listen(move |event| {
            if let Event::Error(info) = event {
                f(info);
            }
        })
    }

    fn listen<F>(&self, f: F) -> JoinHandle<()>
    where
        F: Fn(&Event) + Send + 'static,
    {
        let mut rx = self.subscribe();
        self.shared.runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                f(&event);
            }
        })
    }
}

impl Shared {
    /// Feed one input to the machine and carry out what it asks for.
    fn apply<F>(self: &Arc<Self>, input: F)
    where
        F: FnOnce(&mut StreamMachine) -> Vec<Action>,
    {
        let mut core = self.core.lock();
        let actions = input(&mut core.machine);
        for action in actions {
            self.execute(&mut core, action);
        }
    }

    fn execute(self: &Arc<Self>, core: &mut Core, action: Action) {
        match action {
            Action::Open {
                generation,
                endpoint,
                last_event_id,
            } => {
                if let Some(stale) = core.connection.take() {
                    stale.abort();
                }
                let shared = Arc::clone(self);
                let request = OpenRequest {
                    endpoint,
                    last_event_id,
                };
                core.connection = Some(
                    self.runtime
                        .spawn(async move { shared.run_connection(generation, request).await }),
                );
            }
            Action::Close => {
                if let Some(task) = core.connection.take() {
                    task.abort();
                }
            }
            Action::ArmConnectTimeout { generation, after } => {
                let shared = Arc::clone(self);
                replace_task(
                    &mut core.connect_timer,
                    self.runtime.spawn(async move {
                        tokio::time::sleep(after).await;
                        shared.apply(|m| m.connect_timed_out(generation));
                    }),
                );
            }
            Action::DisarmConnectTimeout => {
                if let Some(task) = core.connect_timer.take() {
                    task.abort();
                }
            }
            Action::ScheduleRetry { generation, after } => {
                let shared = Arc::clone(self);
                replace_task(
                    &mut core.retry_timer,
                    self.runtime.spawn(async move {
                        tokio::time::sleep(after).await;
                        shared.apply(|m| m.retry_due(generation));
                    }),
                );
            }
            Action::CancelRetry => {
                if let Some(task) = core.retry_timer.take() {
                    task.abort();
                }
            }
            Action::Persist(id) => {
                if let Err(e) = self.store.set(&self.tenant, &id) {
                    tracing::warn!(tenant = %self.tenant, error = %e, "failed to persist last event id");
                }
            }
            Action::Emit(event) => {
                core.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
    }

    async fn run_connection(self: Arc<Self>, generation: u64, request: OpenRequest) {
        let mut frames = match self.connector.open(request).await {
            Ok(frames) => frames,
            Err(e) => {
                let retryable = e.is_retryable();
                self.apply(|m| m.open_failed(generation, retryable, e.to_string()));
                return;
            }
        };
        self.apply(|m| m.opened(generation));

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(record) => self.apply(|m| m.record(generation, record)),
                Err(e) => {
                    self.apply(|m| m.stream_failed(generation, e.to_string()));
                    return;
                }
            }
        }
        self.apply(|m| m.stream_failed(generation, "stream ended by server".to_string()));
    }

    fn stored_last_event_id(&self) -> Option<String> {
        match self.store.get(&self.tenant) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(tenant = %self.tenant, error = %e, "failed to read last event id");
                None
            }
        }
    }
}

fn replace_task(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
    if let Some(old) = slot.replace(task) {
        old.abort();
    }
}
