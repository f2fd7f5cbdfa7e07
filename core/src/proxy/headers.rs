//! Outbound header derivation

use axum::http::HeaderMap;

/// Headers scoped to the inbound connection; the upstream transport sets its own.
const CONNECTION_SCOPED: &[&str] = &["host", "content-length"];

fn is_connection_scoped(name: &str) -> bool {
    CONNECTION_SCOPED.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copy every inbound header except `Host` and `Content-Length`.
///
/// Repeated headers keep all of their values and their order. Credentials such as
/// `Authorization` pass through untouched.
pub fn filter_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src.iter() {
        if is_connection_scoped(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
