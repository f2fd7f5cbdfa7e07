//! Upstream client for the OpenAI-compatible API

use std::fmt;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use reqwest::{Client, Response, Url};
use tokio::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Absolute URL of one outbound request. Always starts with the configured base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTarget(String);

impl OutboundTarget {
    /// Join `sub_path` (still percent-encoded) onto `base_url`.
    ///
    /// Dot segments, in any encoding, are refused, and so is any join that the URL
    /// parser resolves to somewhere outside the base.
    pub fn new(base_url: &str, sub_path: &str, query: Option<&str>) -> Result<Self, ProxyError> {
        let sub_path = sub_path.trim_start_matches('/');
        let rejected = |reason: &'static str| ProxyError::InvalidTarget {
            path: sub_path.to_string(),
            reason,
        };
        if sub_path.split('/').any(is_dot_segment) {
            return Err(rejected("dot segments are not allowed"));
        }
        if sub_path.contains('\\') {
            return Err(rejected("backslashes are not allowed"));
        }

        let base = base_url.trim_end_matches('/');
        let mut url = if sub_path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, sub_path)
        };
        if let Some(qs) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(qs);
        }

        let base = Url::parse(base).map_err(|_| rejected("invalid upstream base"))?;
        let parsed = Url::parse(&url).map_err(|_| rejected("not a valid URL path"))?;
        let base_path = base.path().trim_end_matches('/');
        let within_base = parsed.path() == base.path()
            || parsed.path().starts_with(&format!("{}/", base_path));
        if parsed.origin() != base.origin() || !within_base || parsed.fragment().is_some() {
            return Err(rejected("resolves outside the upstream base"));
        }
        Ok(Self(parsed.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `.` or `..`, including percent-encoded forms such as `%2e%2E` or `.%2e`.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

impl fmt::Display for OutboundTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How long the caller is willing to wait on the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Whole response is read before relaying. `Some` bounds headers and body together.
    Buffered { timeout: Option<Duration> },
    /// Returns at headers; the body is pulled chunk by chunk with no deadline.
    Streaming,
}

/// Shared, pooled transport to the upstream. Built once at startup.
#[derive(Debug)]
pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
    buffered_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let base_url = validate_base_url(&config.base_url)?;

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.tcp_keepalive_secs));

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let p = reqwest::Proxy::all(proxy).map_err(|source| ProxyError::InvalidProxy {
                url: proxy.to_string(),
                source,
            })?;
            builder = builder.proxy(p);
            tracing::info!("Using upstream proxy: {}", proxy);
        }

        let http_client = builder.build().map_err(ProxyError::ClientBuild)?;
        Ok(Self {
            http_client,
            base_url,
            buffered_timeout: config.buffered_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn buffered_timeout(&self) -> Duration {
        self.buffered_timeout
    }

    pub fn target(&self, sub_path: &str, query: Option<&str>) -> Result<OutboundTarget, ProxyError> {
        OutboundTarget::new(&self.base_url, sub_path, query)
    }

    /// Issue a single upstream attempt. No retries.
    ///
    /// A status >= 400 comes back as `Ok`; only transport failures are errors.
    pub async fn send(
        &self,
        method: Method,
        target: &OutboundTarget,
        headers: HeaderMap,
        body: Bytes,
        shape: CallShape,
    ) -> Result<Response, ProxyError> {
        let mut request = self
            .http_client
            .request(method, target.as_str())
            .headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }
        if let CallShape::Buffered { timeout: Some(timeout) } = shape {
            request = request.timeout(timeout);
        }

        request.send().await.map_err(ProxyError::from)
    }
}

fn validate_base_url(raw: &str) -> Result<String, ProxyError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let invalid = |reason: String| ProxyError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base url must not carry a query or fragment".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_joins_with_exactly_one_slash() {
        let cases = [
            ("https://integrate.api.nvidia.com/v1", "chat/completions"),
            ("https://integrate.api.nvidia.com/v1/", "chat/completions"),
            ("https://integrate.api.nvidia.com/v1", "/chat/completions"),
            ("https://integrate.api.nvidia.com/v1/", "//chat/completions"),
        ];
        for (base, path) in cases {
            assert_eq!(
                OutboundTarget::new(base, path, None).unwrap().as_str(),
                "https://integrate.api.nvidia.com/v1/chat/completions"
            );
        }
    }

    #[test]
    fn target_keeps_query_and_base_prefix() {
        let target = OutboundTarget::new("http://127.0.0.1:9000/v1", "files", Some("purpose=batch&limit=2")).unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:9000/v1/files?purpose=batch&limit=2");
        assert!(target.as_str().starts_with("http://127.0.0.1:9000/v1"));

        let empty = OutboundTarget::new("http://127.0.0.1:9000/v1", "", Some("")).unwrap();
        assert_eq!(empty.as_str(), "http://127.0.0.1:9000/v1");
    }

    #[test]
    fn base_url_validation() {
        assert_eq!(
            validate_base_url(" https://api.example.com/v1/ ").unwrap(),
            "https://api.example.com/v1"
        );
        assert!(validate_base_url("not a url").is_err());
        assert!(validate_base_url("ftp://api.example.com/v1").is_err());
        assert!(validate_base_url("https://api.example.com/v1?key=1").is_err());
    }

    #[test]
    fn client_builds_from_default_config() {
        let client = UpstreamClient::new(&UpstreamConfig::default()).unwrap();
        assert_eq!(client.base_url(), "https://integrate.api.nvidia.com/v1");
        assert_eq!(client.buffered_timeout(), Duration::from_secs(30));
        assert_eq!(
            client.target("models", None).unwrap().as_str(),
            "https://integrate.api.nvidia.com/v1/models"
        );
    }

    #[test]
    fn target_refuses_dot_segments_in_every_encoding() {
        let base = "http://127.0.0.1:9000/v1";
        for path in ["..", "../secret", "%2e%2e/secret", "%2E%2e/secret", ".%2e/secret", "files/./x", "a/%2e/b"] {
            assert!(
                matches!(OutboundTarget::new(base, path, None), Err(ProxyError::InvalidTarget { .. })),
                "expected {path:?} to be refused"
            );
        }
        assert!(OutboundTarget::new(base, "a\\..\\secret", None).is_err());
    }

    #[test]
    fn target_keeps_encoded_delimiters_inside_the_path() {
        let base = "http://127.0.0.1:9000/v1";

        let question = OutboundTarget::new(base, "files/a%3Fb%3Dc", None).unwrap();
        assert_eq!(question.as_str(), "http://127.0.0.1:9000/v1/files/a%3Fb%3Dc");

        let slash = OutboundTarget::new(base, "files/a%2Fb", None).unwrap();
        assert_eq!(slash.as_str(), "http://127.0.0.1:9000/v1/files/a%2Fb");

        let dotted_name = OutboundTarget::new(base, "files/..hidden/v1.2", None).unwrap();
        assert_eq!(dotted_name.as_str(), "http://127.0.0.1:9000/v1/files/..hidden/v1.2");
    }

    #[test]
    fn invalid_target_maps_to_bad_request() {
        let err = OutboundTarget::new("http://127.0.0.1:9000/v1", "%2e%2e", None).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
