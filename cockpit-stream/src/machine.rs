//! Connection state machine, free of I/O.
//!
//! [`StreamMachine`] takes inputs (caller commands and connection outcomes)
//! and answers with a list of [`Action`]s for a driver to carry out, in order.
//! [`StreamClient`](crate::StreamClient) is the tokio driver; tests drive the
//! machine by hand and play the clock themselves.
//!
//! Every connection attempt gets a fresh generation number. Outcomes and
//! timers carry the generation they were started under, and anything stale is
//! dropped. That is what keeps a late timer or a cancelled attempt from
//! racing a `reconnect()` or `disconnect()`.

use std::time::Duration;

use crate::backoff::RetryState;
use crate::config::StreamConfig;
use crate::error::ErrorKind;
use crate::event::{ErrorInfo, Event, EventRecord};
use crate::state::ConnectionState;

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the underlying connection, passing the resume hint.
    Open {
        generation: u64,
        endpoint: String,
        last_event_id: Option<String>,
    },
    /// Fail the attempt with `TIMEOUT` unless it opens within `after`.
    ArmConnectTimeout { generation: u64, after: Duration },
    DisarmConnectTimeout,
    /// Drop the underlying connection.
    Close,
    /// Call [`StreamMachine::retry_due`] after `after`.
    ScheduleRetry { generation: u64, after: Duration },
    CancelRetry,
    /// Write the new last event id to durable storage.
    Persist(String),
    /// Deliver to subscribers.
    Emit(Event),
}

#[derive(Debug)]
pub struct StreamMachine {
    state: ConnectionState,
    retry: RetryState,
    max_retries: u32,
    connect_timeout: Duration,
    endpoint: Option<String>,
    last_event_id: Option<String>,
    generation: u64,
    connection_open: bool,
    timeout_armed: bool,
    retry_pending: bool,
}

impl StreamMachine {
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_retry(config, RetryState::new(config))
    }

    /// Use a caller-built retry state (e.g. seeded jitter).
    pub fn with_retry(config: &StreamConfig, retry: RetryState) -> Self {
        Self {
            state: ConnectionState::Idle,
            retry,
            max_retries: config.max_retries,
            connect_timeout: config.connect_timeout(),
            endpoint: None,
            last_event_id: None,
            generation: 0,
            connection_open: false,
            timeout_armed: false,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry.attempt()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.retry.last_delay()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Generation of the current (or most recent) attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ── Commands ──

    /// Start streaming from `endpoint`. No-op while an attempt is open,
    /// outstanding or scheduled.
    pub fn connect(&mut self, endpoint: String, last_event_id: Option<String>) -> Vec<Action> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        ) {
            tracing::debug!(state = %self.state, "connect ignored, stream already active");
            return Vec::new();
        }
        self.endpoint = Some(endpoint);
        if let Some(id) = last_event_id.filter(|id| !id.is_empty()) {
            self.last_event_id = Some(id);
        }
        let mut actions = Vec::new();
        self.begin_attempt(&mut actions);
        actions
    }

    /// Drop everything and return to `idle`.
    pub fn disconnect(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.generation += 1;
        self.release(&mut actions);
        self.transition(ConnectionState::Idle, &mut actions);
        actions
    }

    /// Start a fresh attempt now, from any state. The attempt counter is
    /// left as is.
    pub fn reconnect(&mut self) -> Vec<Action> {
        if self.endpoint.is_none() {
            tracing::warn!("reconnect ignored, connect() was never called");
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.release(&mut actions);
        self.begin_attempt(&mut actions);
        actions
    }

    // ── Connection outcomes ──

    /// The connector reported the stream open.
    pub fn opened(&mut self, generation: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_current(generation, ConnectionState::Connecting) {
            self.mark_connected(&mut actions);
        }
        actions
    }

    /// A message arrived on the stream. A message during `connecting` counts
    /// as the open signal.
    pub fn record(&mut self, generation: u64, record: EventRecord) -> Vec<Action> {
        let mut actions = Vec::new();
        if generation != self.generation || !self.state.is_active() {
            return actions;
        }
        if self.state == ConnectionState::Connecting {
            self.mark_connected(&mut actions);
        }
        if let Some(id) = record.resume_id()
            && self.last_event_id.as_deref() != Some(id)
        {
            self.last_event_id = Some(id.to_string());
            actions.push(Action::Persist(id.to_string()));
        }
        actions.push(Action::Emit(Event::Message(record)));
        actions
    }

    /// The connector could not open the stream.
    pub fn open_failed(&mut self, generation: u64, retryable: bool, message: String) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.is_current(generation, ConnectionState::Connecting) {
            return actions;
        }
        if retryable {
            self.fail(ErrorKind::OpenFailure, message, &mut actions);
        } else {
            self.release(&mut actions);
            self.retry.record_failure();
            tracing::error!(error = %message, "stream refused, not retrying");
            actions.push(Action::Emit(Event::Error(ErrorInfo {
                kind: ErrorKind::OpenFailure,
                retryable: false,
                message,
            })));
            self.transition(ConnectionState::Error, &mut actions);
        }
        actions
    }

    /// The stream errored or ended.
    pub fn stream_failed(&mut self, generation: u64, message: String) -> Vec<Action> {
        let mut actions = Vec::new();
        if generation != self.generation || !self.state.is_active() {
            return actions;
        }
        let kind = if self.state == ConnectionState::Connected {
            ErrorKind::StreamClosed
        } else {
            ErrorKind::OpenFailure
        };
        self.fail(kind, message, &mut actions);
        actions
    }

    // ── Timers ──

    /// The backoff delay scheduled under `generation` elapsed.
    pub fn retry_due(&mut self, generation: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_current(generation, ConnectionState::Reconnecting) {
            self.retry_pending = false;
            self.begin_attempt(&mut actions);
        }
        actions
    }

    /// The connect timeout armed under `generation` elapsed.
    pub fn connect_timed_out(&mut self, generation: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_current(generation, ConnectionState::Connecting) {
            self.timeout_armed = false;
            let message = format!(
                "no ready signal within {}ms",
                self.connect_timeout.as_millis()
            );
            self.fail(ErrorKind::Timeout, message, &mut actions);
        }
        actions
    }

    // ── Internals ──

    fn is_current(&self, generation: u64, state: ConnectionState) -> bool {
        generation == self.generation && self.state == state
    }

    fn begin_attempt(&mut self, actions: &mut Vec<Action>) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        self.generation += 1;
        self.connection_open = true;
        self.timeout_armed = true;
        self.transition(ConnectionState::Connecting, actions);
        tracing::info!(
            endpoint = %endpoint,
            attempt = self.retry.attempt(),
            generation = self.generation,
            last_event_id = ?self.last_event_id,
            "opening stream"
        );
        actions.push(Action::Open {
            generation: self.generation,
            endpoint,
            last_event_id: self.last_event_id.clone(),
        });
        actions.push(Action::ArmConnectTimeout {
            generation: self.generation,
            after: self.connect_timeout,
        });
    }

    fn mark_connected(&mut self, actions: &mut Vec<Action>) {
        if self.timeout_armed {
            self.timeout_armed = false;
            actions.push(Action::DisarmConnectTimeout);
        }
        self.retry.reset();
        self.transition(ConnectionState::Connected, actions);
    }

    /// Count a retryable failure, then schedule a retry or give up.
    fn fail(&mut self, kind: ErrorKind, message: String, actions: &mut Vec<Action>) {
        self.release(actions);
        let attempt = self.retry.record_failure();
        tracing::warn!(kind = %kind, attempt, error = %message, "stream attempt failed");
        actions.push(Action::Emit(Event::Error(ErrorInfo {
            kind,
            retryable: true,
            message,
        })));

        if attempt >= self.max_retries {
            tracing::error!(attempts = attempt, "retry budget exhausted, giving up");
            actions.push(Action::Emit(Event::Error(ErrorInfo {
                kind: ErrorKind::MaxRetriesExceeded,
                retryable: false,
                message: format!("gave up after {attempt} failed attempts"),
            })));
            self.transition(ConnectionState::Failed, actions);
            return;
        }

        let delay = self.retry.next_delay(attempt - 1);
        self.retry_pending = true;
        self.transition(ConnectionState::Reconnecting, actions);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        actions.push(Action::ScheduleRetry {
            generation: self.generation,
            after: delay,
        });
    }

    /// Tear down whatever the current attempt holds.
    fn release(&mut self, actions: &mut Vec<Action>) {
        if self.timeout_armed {
            self.timeout_armed = false;
            actions.push(Action::DisarmConnectTimeout);
        }
        if self.connection_open {
            self.connection_open = false;
            actions.push(Action::Close);
        }
        if self.retry_pending {
            self.retry_pending = false;
            actions.push(Action::CancelRetry);
        }
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<Action>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(%from, %to, "state change");
        actions.push(Action::Emit(Event::StateChanged { old: from, new: to }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "http://cockpit.test/v1/events";

    fn config(max_retries: u32) -> StreamConfig {
        StreamConfig {
            max_retries,
            max_jitter_ms: 0,
            ..Default::default()
        }
    }

    fn machine(max_retries: u32) -> StreamMachine {
        StreamMachine::new(&config(max_retries))
    }

    fn emitted(actions: &[Action]) -> Vec<Event> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn states(actions: &[Action]) -> Vec<(ConnectionState, ConnectionState)> {
        emitted(actions)
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { old, new } => Some((old, new)),
                _ => None,
            })
            .collect()
    }

    fn scheduled(actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleRetry { after, .. } => Some(*after),
            _ => None,
        })
    }

    #[test]
    fn test_connect_opens_with_resume_hint() {
        let mut m = machine(10);
        let actions = m.connect(ENDPOINT.into(), Some("41".into()));
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(
            states(&actions),
            vec![(ConnectionState::Idle, ConnectionState::Connecting)]
        );
        assert!(actions.contains(&Action::Open {
            generation: 1,
            endpoint: ENDPOINT.into(),
            last_event_id: Some("41".into()),
        }));
        assert!(actions.contains(&Action::ArmConnectTimeout {
            generation: 1,
            after: Duration::from_secs(5),
        }));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        assert!(m.connect(ENDPOINT.into(), None).is_empty());
        m.opened(1);
        assert!(m.connect(ENDPOINT.into(), None).is_empty());
        assert_eq!(m.generation(), 1);
    }

    #[test]
    fn test_open_resets_attempt() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        m.open_failed(1, true, "refused".into());
        m.retry_due(1);
        assert_eq!(m.retry_attempt(), 1);
        let actions = m.opened(2);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(m.retry_attempt(), 0);
        assert!(actions.contains(&Action::DisarmConnectTimeout));

        // A later failure starts the schedule over.
        let actions = m.stream_failed(2, "eof".into());
        assert_eq!(scheduled(&actions), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_three_failures_exhaust_budget() {
        let mut m = machine(3);
        m.connect(ENDPOINT.into(), None);
        let mut errors = Vec::new();
        let mut delays = Vec::new();
        for generation in 1..=3 {
            let actions = m.open_failed(generation, true, "refused".into());
            errors.extend(emitted(&actions).into_iter().filter_map(|e| match e {
                Event::Error(info) => Some(info),
                _ => None,
            }));
            if let Some(delay) = scheduled(&actions) {
                delays.push(delay);
                m.retry_due(generation);
            }
        }
        assert_eq!(m.state(), ConnectionState::Failed);
        assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
        let retryable: Vec<_> = errors.iter().filter(|e| e.retryable).collect();
        assert_eq!(retryable.len(), 3);
        assert!(retryable.iter().all(|e| e.kind == ErrorKind::OpenFailure));
        assert_eq!(errors.last().map(|e| e.kind), Some(ErrorKind::MaxRetriesExceeded));

        // Nothing is scheduled from failed.
        assert!(m.retry_due(3).is_empty());
    }

    #[test]
    fn test_error_precedes_transition() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        m.opened(1);
        let events = emitted(&m.stream_failed(1, "reset".into()));
        assert!(matches!(
            &events[0],
            Event::Error(ErrorInfo { kind: ErrorKind::StreamClosed, retryable: true, .. })
        ));
        assert_eq!(
            events[1],
            Event::StateChanged {
                old: ConnectionState::Connected,
                new: ConnectionState::Reconnecting,
            }
        );
    }

    #[test]
    fn test_stream_closed_then_retry_enters_connecting_with_attempt_one() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        m.opened(1);
        m.stream_failed(1, "eof".into());
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        let actions = m.retry_due(1);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.retry_attempt(), 1);
        assert!(actions.iter().any(|a| matches!(a, Action::Open { generation: 2, .. })));
    }

    #[test]
    fn test_timeout_is_retryable_failure() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        let actions = m.connect_timed_out(1);
        let events = emitted(&actions);
        assert!(matches!(
            &events[0],
            Event::Error(ErrorInfo { kind: ErrorKind::Timeout, retryable: true, .. })
        ));
        assert!(actions.contains(&Action::Close));
        assert_eq!(m.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_message_counts_as_ready_and_tracks_id() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        let actions = m.record(1, EventRecord::new(Some("a1".into()), "{}"));
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(actions.contains(&Action::Persist("a1".into())));
        assert_eq!(m.last_event_id(), Some("a1"));

        // Id-less messages keep the previous resume point.
        let actions = m.record(1, EventRecord::new(None, "{}"));
        assert!(!actions.iter().any(|a| matches!(a, Action::Persist(_))));
        assert_eq!(m.last_event_id(), Some("a1"));

        m.stream_failed(1, "eof".into());
        let actions = m.retry_due(1);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Open { last_event_id: Some(id), .. } if id == "a1"
        )));
    }

    #[test]
    fn test_disconnect_cancels_and_ignores_stale_outcomes() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        m.open_failed(1, true, "refused".into());
        let actions = m.disconnect();
        assert!(actions.contains(&Action::CancelRetry));
        assert_eq!(m.state(), ConnectionState::Idle);

        assert!(m.retry_due(1).is_empty());
        assert!(m.opened(1).is_empty());
        assert!(m.record(1, EventRecord::new(Some("x".into()), "")).is_empty());
        assert!(m.disconnect().is_empty());
    }

    #[test]
    fn test_disconnect_from_every_state() {
        let drive: [fn(&mut StreamMachine); 5] = [
            |_| {},
            |m| {
                m.connect(ENDPOINT.into(), None);
            },
            |m| {
                m.connect(ENDPOINT.into(), None);
                m.opened(1);
            },
            |m| {
                m.connect(ENDPOINT.into(), None);
                m.open_failed(1, true, "x".into());
            },
            |m| {
                m.connect(ENDPOINT.into(), None);
                m.open_failed(1, false, "x".into());
            },
        ];
        for setup in drive {
            let mut m = machine(10);
            setup(&mut m);
            m.disconnect();
            assert_eq!(m.state(), ConnectionState::Idle);
        }
    }

    #[test]
    fn test_reconnect_from_failed_is_immediate_and_keeps_attempt() {
        let mut m = machine(1);
        m.connect(ENDPOINT.into(), None);
        m.open_failed(1, true, "refused".into());
        assert_eq!(m.state(), ConnectionState::Failed);
        let actions = m.reconnect();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.retry_attempt(), 1);
        assert!(actions.iter().any(|a| matches!(a, Action::Open { .. })));
        assert!(scheduled(&actions).is_none());
    }

    #[test]
    fn test_reconnect_beats_pending_timer() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        m.open_failed(1, true, "refused".into());
        let actions = m.reconnect();
        assert!(actions.contains(&Action::CancelRetry));
        assert_eq!(m.generation(), 2);
        // The old timer fires late and is ignored.
        assert!(m.retry_due(1).is_empty());
        assert_eq!(m.retry_attempt(), 1);
    }

    #[test]
    fn test_reconnect_without_endpoint_is_noop() {
        let mut m = machine(10);
        assert!(m.reconnect().is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_non_retryable_open_failure_enters_error() {
        let mut m = machine(10);
        m.connect(ENDPOINT.into(), None);
        let actions = m.open_failed(1, false, "HTTP 204".into());
        assert_eq!(m.state(), ConnectionState::Error);
        assert!(scheduled(&actions).is_none());
        let events = emitted(&actions);
        assert!(matches!(
            &events[0],
            Event::Error(ErrorInfo { kind: ErrorKind::OpenFailure, retryable: false, .. })
        ));
        // connect() is allowed out of error.
        assert!(!m.connect(ENDPOINT.into(), None).is_empty());
    }
}
