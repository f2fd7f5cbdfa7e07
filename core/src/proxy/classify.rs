//! Streaming detection for inbound requests

use axum::http::Method;
use serde_json::Value;

/// Whether the caller asked for a streamed response.
///
/// Decided once per request, before the upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardDecision {
    pub is_streaming: bool,
}

impl ForwardDecision {
    pub fn classify(method: &Method, body: &[u8]) -> Self {
        Self {
            is_streaming: is_streaming_request(method, body),
        }
    }
}

/// True only for a `POST` whose body is a JSON object with `"stream": true`.
///
/// Any other shape, including a body that is not JSON, means buffered.
pub fn is_streaming_request(method: &Method, body: &[u8]) -> bool {
    if method != Method::POST || body.is_empty() {
        return false;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => matches!(value.get("stream"), Some(Value::Bool(true))),
        Err(_) => false,
    }
}
