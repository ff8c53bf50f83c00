//! Connection-opening primitive and its HTTP implementation.
//!
//! A [`Connector`] turns an [`OpenRequest`] into a stream of
//! [`EventRecord`]s. The returned future resolving `Ok` is the open signal;
//! the stream ending is a close; an `Err` item is a stream failure. The client
//! never looks below this seam, so tests substitute a scripted connector.

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::error::TransportError;
use crate::event::EventRecord;
use crate::sse::SseDecoder;

/// Header carrying the resume hint.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Messages from an open connection.
pub type FrameStream = BoxStream<'static, Result<EventRecord, TransportError>>;

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub endpoint: String,
    /// Last id delivered before this attempt, for the server to replay from.
    pub last_event_id: Option<String>,
}

pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<FrameStream, TransportError>>;
}

/// Server-Sent-Events over HTTP via `reqwest`.
#[derive(Debug, Clone)]
pub struct SseConnector {
    http: reqwest::Client,
    headers: HeaderMap,
}

impl SseConnector {
    pub fn new() -> Result<Self, reqwest::Error> {
        // No overall request timeout: the body is meant to stay open. The
        // client's connect timeout bounds the wait for headers.
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            headers: HeaderMap::new(),
        }
    }

    /// Send an extra header on every attempt (e.g. a tenant or auth header).
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Connector for SseConnector {
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        let http = self.http.clone();
        let headers = self.headers.clone();
        Box::pin(async move {
            let mut req = http
                .get(&request.endpoint)
                .headers(headers)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache");
            if let Some(id) = &request.last_event_id {
                req = req.header(LAST_EVENT_ID_HEADER, id);
            }

            tracing::debug!(endpoint = %request.endpoint, "sending stream request");
            let response = req.send().await.map_err(|source| TransportError::Request {
                endpoint: request.endpoint.clone(),
                source,
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::NO_CONTENT || !status.is_success() {
                return Err(TransportError::from_status(status.as_u16()));
            }
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if !content_type.starts_with("text/event-stream") {
                return Err(TransportError::ContentType(content_type));
            }

            let mut decoder = SseDecoder::new();
            let frames = response
                .bytes_stream()
                .map(move |chunk| match chunk {
                    Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(TransportError::Body(e.to_string()))],
                })
                .flat_map(stream::iter)
                .boxed();
            Ok(frames)
        })
    }
}
