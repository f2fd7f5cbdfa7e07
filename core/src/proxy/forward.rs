//! Request forwarding engine
//! Inbound request -> header filter + streaming classifier -> upstream -> relay

use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use bytes::Bytes;

use crate::error::ProxyError;
use crate::proxy::classify::ForwardDecision;
use crate::proxy::headers::filter_request_headers;
use crate::proxy::relay::{relay, OutboundResponse};
use crate::proxy::upstream::{CallShape, UpstreamClient};

/// One inbound request, body fully buffered. Lives for the request only.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
        }
    }

    pub fn origin(&self) -> Option<&HeaderValue> {
        self.headers.get(axum::http::header::ORIGIN)
    }
}

/// Deadline policy for the buffered path of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Simple passthroughs such as model listing.
    Bounded,
    /// Generation endpoints; long latency is expected.
    Unbounded,
}

/// Forward `inbound` to `{base}/{sub_path}` and pick the response shape.
///
/// The streaming decision is made here, once, before the upstream call.
pub async fn forward(
    upstream: &UpstreamClient,
    inbound: InboundRequest,
    sub_path: &str,
    deadline: Deadline,
) -> Result<OutboundResponse, ProxyError> {
    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let decision = ForwardDecision::classify(&inbound.method, &inbound.body);
    let headers = filter_request_headers(&inbound.headers);
    let target = upstream.target(sub_path, inbound.query.as_deref()).map_err(|e| {
        tracing::warn!("[{}] {} {} rejected: {}", request_id, inbound.method, inbound.path, e);
        e
    })?;

    let shape = if decision.is_streaming {
        CallShape::Streaming
    } else {
        CallShape::Buffered {
            timeout: match deadline {
                Deadline::Bounded => Some(upstream.buffered_timeout()),
                Deadline::Unbounded => None,
            },
        }
    };

    tracing::debug!(
        "[{}] {} {} -> {} (streaming: {}, origin: {})",
        request_id,
        inbound.method,
        inbound.path,
        target,
        decision.is_streaming,
        inbound.origin().is_some()
    );

    let response = match upstream
        .send(inbound.method.clone(), &target, headers, inbound.body, shape)
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("[{}] {} {} failed: {}", request_id, inbound.method, target, e);
            return Err(e);
        }
    };

    let status = response.status();
    if status.as_u16() >= 400 {
        tracing::warn!("[{}] Upstream returned {} for {} {}", request_id, status, inbound.method, target);
    }

    let outbound = relay(response, decision).await.map_err(|e| {
        tracing::error!("[{}] Reading upstream body from {} failed: {}", request_id, target, e);
        e
    })?;

    tracing::info!(
        "[{}] {} {} -> {} ({})",
        request_id,
        inbound.method,
        inbound.path,
        outbound.status().as_u16(),
        if outbound.is_streamed() { "stream" } else { "buffered" }
    );
    Ok(outbound)
}
