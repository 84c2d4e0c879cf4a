//! HTTP route handlers.

pub mod api;
pub mod mcp;
pub mod ws;

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;

use switchyard_core::constants::SESSION_HEADER;

/// Session id from the `mcp-session-id` header.
pub(crate) fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// Echo the session id on a response.
pub(crate) fn with_session(mut response: Response, id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(id) {
        let _ = response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Whether a header contains `needle`, case-insensitively.
pub(crate) fn header_contains(headers: &HeaderMap, name: header::HeaderName, needle: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn session_header_trims_and_ignores_blank() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_header(&headers), None);
        let _ = headers.insert(SESSION_HEADER, HeaderValue::from_static("  "));
        assert_eq!(session_header(&headers), None);
        let _ = headers.insert(SESSION_HEADER, HeaderValue::from_static(" abc "));
        assert_eq!(session_header(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn with_session_sets_header() {
        let resp = with_session(().into_response(), "s-1");
        assert_eq!(resp.headers()[SESSION_HEADER], "s-1");
    }

    #[test]
    fn header_contains_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::ACCEPT, HeaderValue::from_static("Text/Event-Stream"));
        assert!(header_contains(&headers, header::ACCEPT, "text/event-stream"));
        assert!(!header_contains(&headers, header::CONTENT_TYPE, "json"));
    }
}
