//! Proxy Server - Axum HTTP server

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::ProxyError;
use crate::proxy::cors;
use crate::proxy::handlers::openai::{handle_chat_completions, handle_list_models, handle_passthrough};
use crate::proxy::upstream::UpstreamClient;

static GET_ONLY: [Method; 1] = [Method::GET];
static CHAT_METHODS: [Method; 1] = [Method::POST];
static PASSTHROUGH_METHODS: [Method; 6] = [
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::PATCH,
    Method::POST,
    Method::PUT,
];

pub const ENDPOINTS: &[&str] = &["/v1/models", "/v1/chat/completions"];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(upstream: Arc<UpstreamClient>, max_body_bytes: usize) -> Self {
        Self {
            upstream,
            max_body_bytes,
        }
    }
}

/// Proxy server instance
pub struct ProxyServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ProxyServer {
    /// Build the shared upstream transport. No request can be served before this succeeds.
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let upstream = Arc::new(UpstreamClient::new(&config.upstream)?);
        tracing::info!("Upstream client created for {}", upstream.base_url());

        Ok(Self {
            host: config.server.host.clone(),
            port: config.server.port,
            state: AppState::new(upstream, config.server.max_body_bytes),
        })
    }

    /// Run the proxy server (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        let Self { host, port, state } = self;
        let app = router(state.clone());

        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Proxy server listening on {}", addr);

        // In-flight requests finish before serve returns
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        drop(state);
        tracing::info!("Upstream client closed");
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Full route table. Every route answers OPTIONS as a CORS preflight.
pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;

    Router::new()
        .route("/", with_preflight(get(root_handler), &GET_ONLY))
        .route("/health", with_preflight(get(health_check_handler), &GET_ONLY))
        .route("/healthz", with_preflight(get(health_check_handler), &GET_ONLY))
        .route("/v1", with_preflight(get(endpoints_handler), &GET_ONLY))
        .route("/v1/models", with_preflight(get(handle_list_models), &GET_ONLY))
        .route(
            "/v1/chat/completions",
            with_preflight(post(handle_chat_completions), &CHAT_METHODS),
        )
        .route(
            "/v1/*path",
            with_preflight(
                get(handle_passthrough)
                    .post(handle_passthrough)
                    .put(handle_passthrough)
                    .patch(handle_passthrough)
                    .delete(handle_passthrough),
                &PASSTHROUGH_METHODS,
            ),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(cors::annotate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn with_preflight(
    route: MethodRouter<AppState>,
    allowed: &'static [Method],
) -> MethodRouter<AppState> {
    route.options(move |headers: HeaderMap| async move { cors::preflight(&headers, allowed) })
}

async fn root_handler(State(state): State<AppState>) -> String {
    format!(
        "OpenAI-compatible proxy running, forwarding to {}",
        state.upstream.base_url()
    )
}

/// Health check handler
async fn health_check_handler() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn endpoints_handler() -> Json<serde_json::Value> {
    Json(json!({
        "object": "list",
        "endpoints": ENDPOINTS,
    }))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use crate::config::UpstreamConfig;

    fn test_router() -> Router {
        let upstream = UpstreamClient::new(&UpstreamConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            ..UpstreamConfig::default()
        })
        .unwrap();
        router(AppState::new(Arc::new(upstream), 1024 * 1024))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_plain_text_ok() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");
    }

    #[tokio::test]
    async fn root_names_the_upstream() {
        let response = test_router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(body_string(response).await.contains("http://127.0.0.1:9/v1"));
    }

    #[tokio::test]
    async fn v1_lists_endpoints_without_upstream_call() {
        let response = test_router()
            .oneshot(Request::get("/v1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["object"], "list");
        assert_eq!(body["endpoints"], json!(["/v1/models", "/v1/chat/completions"]));
    }

    #[tokio::test]
    async fn chat_completions_preflight() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/chat/completions")
            .header("origin", "https://example.com")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(response.headers().get_all("vary").iter().count(), 1);
    }

    #[tokio::test]
    async fn models_options_without_request_method_is_405() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/models")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET");
    }

    #[tokio::test]
    async fn passthrough_preflight_lists_every_method() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/embeddings")
            .header("origin", "https://example.com")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "authorization")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-methods"],
            "DELETE, GET, HEAD, PATCH, POST, PUT, OPTIONS"
        );
        assert_eq!(response.headers()["access-control-allow-headers"], "authorization");
    }

    #[tokio::test]
    async fn origin_annotates_local_responses() {
        let request = Request::get("/health")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();

        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["vary"], "Origin");
    }

    #[tokio::test]
    async fn no_origin_no_cors_headers() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
