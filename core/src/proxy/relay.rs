//! Response relay: buffered passthrough or incrementally flushed event stream

use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use pin_project::{pin_project, pinned_drop};

use crate::error::ProxyError;
use crate::proxy::classify::ForwardDecision;

pub const EVENT_STREAM: &str = "text/event-stream";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Exactly one shape per request, chosen once in [`relay`].
pub enum OutboundResponse {
    Buffered(BufferedBody),
    Streamed(EventStream),
}

/// Whole upstream payload, bytes unchanged.
#[derive(Debug, Clone)]
pub struct BufferedBody {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub content_encoding: Option<HeaderValue>,
    pub body: Bytes,
}

/// An open relay of upstream chunks.
///
/// Status and headers are fixed when this value is built; the only thing left to do
/// with it is turn it into a response, so nothing can touch headers once bytes flow.
pub struct EventStream {
    status: StatusCode,
    content_encoding: Option<HeaderValue>,
    chunks: RelayStream<BoxStream<'static, Result<Bytes, reqwest::Error>>>,
}

/// Pick the outbound shape for an upstream response.
///
/// Error statuses are always buffered so the caller gets the complete error payload.
pub async fn relay(
    upstream: reqwest::Response,
    decision: ForwardDecision,
) -> Result<OutboundResponse, ProxyError> {
    let status = upstream.status();
    let content_encoding = upstream.headers().get(header::CONTENT_ENCODING).cloned();

    if decision.is_streaming && status.as_u16() < 400 {
        return Ok(OutboundResponse::Streamed(EventStream {
            status,
            content_encoding,
            chunks: RelayStream::new(upstream.bytes_stream().boxed()),
        }));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let body = upstream.bytes().await?;

    Ok(OutboundResponse::Buffered(BufferedBody {
        status,
        content_type,
        content_encoding,
        body,
    }))
}

impl OutboundResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Buffered(b) => b.status,
            Self::Streamed(s) => s.status,
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, Self::Streamed(_))
    }
}

impl IntoResponse for OutboundResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Buffered(buffered) => buffered.into_response(),
            Self::Streamed(stream) => stream.into_response(),
        }
    }
}

impl IntoResponse for BufferedBody {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, self.content_type);
        if let Some(encoding) = self.content_encoding {
            headers.insert(header::CONTENT_ENCODING, encoding);
        }
        response
    }
}

impl IntoResponse for EventStream {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self.chunks));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
        if let Some(encoding) = self.content_encoding {
            headers.insert(header::CONTENT_ENCODING, encoding);
        }
        response
    }
}

/// Forwards upstream chunks in arrival order, skipping empty ones.
///
/// Ends exactly once. Dropping it early (caller went away) drops the upstream body,
/// which releases the connection.
#[pin_project(PinnedDrop)]
pub struct RelayStream<S> {
    #[pin]
    inner: S,
    chunks: u64,
    bytes: u64,
    finished: bool,
}

impl<S> RelayStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            chunks: 0,
            bytes: 0,
            finished: false,
        }
    }
}

impl<S, E> Stream for RelayStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    *this.chunks += 1;
                    *this.bytes += chunk.len() as u64;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Some(Err(e)) => {
                    *this.finished = true;
                    tracing::warn!(
                        "Upstream stream failed after {} chunk(s): {}",
                        this.chunks,
                        e
                    );
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    *this.finished = true;
                    tracing::debug!(
                        "Upstream stream finished: {} chunk(s), {} byte(s)",
                        this.chunks,
                        this.bytes
                    );
                    return Poll::Ready(None);
                }
            }
        }
    }
}

#[pinned_drop]
impl<S> PinnedDrop for RelayStream<S> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.finished {
            tracing::info!(
                "Client disconnected mid-stream after {} chunk(s); releasing upstream response",
                this.chunks
            );
        }
    }
}
