//! Error type for the forwarding engine
//! Only local failures live here; upstream status >= 400 is relayed, not raised.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("invalid upstream base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("refused request path {path:?}: {reason}")]
    InvalidTarget { path: String, reason: &'static str },

    #[error("invalid upstream proxy {url:?}: {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(e)
        } else {
            Self::Upstream(e)
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": "proxy_error",
                "code": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}
