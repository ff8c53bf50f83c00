//! Resilient Server-Sent-Events client for the cockpit dashboard feed.
//!
//! [`client::StreamClient`] owns one logical stream per tenant. It reconnects
//! with capped exponential backoff, resumes from the last delivered event id
//! (persisted through a [`store::LastEventIdStore`]) and reports every state
//! change, message and failure to its subscribers.
//!
//! The state machine itself lives in [`machine`] and does no I/O, so it can be
//! driven and inspected without a runtime. The client is the tokio driver
//! around it; the wire side is pluggable through [`transport::Connector`].

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod machine;
pub mod sse;
pub mod state;
pub mod store;
pub mod transport;

pub use client::{StreamClient, StreamClientBuilder};
pub use config::StreamConfig;
pub use error::{ClientError, ErrorKind, TransportError};
pub use event::{ErrorInfo, Event, EventRecord};
pub use state::ConnectionState;
pub use store::{LastEventIdStore, MemoryStore, SqliteStore};
pub use transport::{Connector, OpenRequest, SseConnector};
