//! CORS: response annotation and preflight answers

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Add `Access-Control-Allow-Origin: *` and `Vary: Origin`.
///
/// Idempotent: an existing allow-origin is kept and `Origin` is added to `Vary` once.
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    if !headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    let varies_on_origin = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("origin"));
    if !varies_on_origin {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// Middleware: annotate every response whose request carried `Origin`.
///
/// Runs on the response head, so streamed bodies get the headers before the first chunk.
pub async fn annotate(req: Request, next: Next) -> Response {
    let has_origin = req.headers().contains_key(header::ORIGIN);
    let mut response = next.run(req).await;
    if has_origin {
        apply_cors_headers(response.headers_mut());
    }
    response
}

fn join_methods(allowed: &[Method], with_options: bool) -> String {
    let mut names: Vec<&str> = allowed.iter().map(Method::as_str).collect();
    if with_options {
        names.push(Method::OPTIONS.as_str());
    }
    names.join(", ")
}

/// Answer an `OPTIONS` request for a route serving `allowed`.
///
/// A real preflight (both `Origin` and `Access-Control-Request-Method`) gets 204.
/// Anything else is not a supported operation and gets 405 with `Allow`.
pub fn preflight(req_headers: &HeaderMap, allowed: &[Method]) -> Response {
    let is_preflight = req_headers.contains_key(header::ORIGIN)
        && req_headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    if !is_preflight {
        tracing::debug!("OPTIONS without CORS negotiation headers rejected");
        let allow = join_methods(allowed, false);
        let mut response = (
            StatusCode::METHOD_NOT_ALLOWED,
            "OPTIONS is only supported as a CORS preflight",
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.headers_mut().insert(header::ALLOW, value);
        }
        return response;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if let Ok(value) = HeaderValue::from_str(&join_methods(allowed, true)) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    if let Some(requested) = req_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn preflight_with_negotiation_headers_is_204() {
        let headers = request_headers(&[
            ("origin", "https://example.com"),
            ("access-control-request-method", "POST"),
            ("access-control-request-headers", "authorization, content-type"),
        ]);

        let response = preflight(&headers, &[Method::POST]);

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let h = response.headers();
        assert_eq!(h["access-control-allow-origin"], "*");
        assert_eq!(h["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(h["vary"], "Origin");
        assert_eq!(h["access-control-allow-headers"], "authorization, content-type");
    }

    #[test]
    fn preflight_without_request_headers_omits_allow_headers() {
        let headers = request_headers(&[
            ("origin", "https://example.com"),
            ("access-control-request-method", "GET"),
        ]);

        let response = preflight(&headers, &[Method::GET]);

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get("access-control-allow-headers").is_none());
    }

    #[test]
    fn options_without_negotiation_is_method_not_allowed() {
        let only_origin = request_headers(&[("origin", "https://example.com")]);
        let only_method = request_headers(&[("access-control-request-method", "POST")]);

        for headers in [only_origin, only_method, HeaderMap::new()] {
            let response = preflight(&headers, &[Method::GET, Method::POST]);
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(response.headers()["allow"], "GET, POST");
            assert!(response.headers().get("access-control-allow-origin").is_none());
        }
    }

    #[test]
    fn annotation_is_idempotent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding, origin"));

        apply_cors_headers(&mut headers);
        apply_cors_headers(&mut headers);

        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers.get_all(header::VARY).iter().count(), 1);
    }

    #[test]
    fn annotation_appends_vary() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));

        apply_cors_headers(&mut headers);

        let vary: Vec<_> = headers.get_all(header::VARY).iter().collect();
        assert_eq!(vary, vec!["Accept-Encoding", "Origin"]);
    }
}
