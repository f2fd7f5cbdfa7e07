//! OpenAI-compatible passthrough handlers
//! Handles /v1/chat/completions, /v1/models and any other /v1/* path

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};

use crate::error::ProxyError;
use crate::proxy::forward::{forward, Deadline, InboundRequest};
use crate::proxy::server::AppState;

/// Handle POST /v1/chat/completions
pub async fn handle_chat_completions(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let inbound = InboundRequest::new(method, &uri, headers, body);
    let outbound = forward(&state.upstream, inbound, "chat/completions", Deadline::Unbounded).await?;
    Ok(outbound.into_response())
}

/// Handle GET /v1/models
pub async fn handle_list_models(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let inbound = InboundRequest::new(method, &uri, headers, body);
    let outbound = forward(&state.upstream, inbound, "models", Deadline::Bounded).await?;
    Ok(outbound.into_response())
}

/// Handle any other /v1/*path, method preserved.
///
/// The sub-path is taken from the raw request target so percent-escapes reach the
/// upstream exactly as the client sent them.
pub async fn handle_passthrough(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let sub_path = uri.path().strip_prefix("/v1/").unwrap_or_default();
    let inbound = InboundRequest::new(method, &uri, headers, body);
    let outbound = forward(&state.upstream, inbound, sub_path, Deadline::Unbounded).await?;
    Ok(outbound.into_response())
}
