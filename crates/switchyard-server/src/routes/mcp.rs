//! `/mcp` routes: streamable HTTP, NDJSON, and SSE sessions.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use switchyard_core::constants::{NDJSON_CONTENT_TYPE, PROTOCOL_VERSION, SSE_CONTENT_TYPE};
use switchyard_rpc::Dispatcher;

use crate::admission::Connection;
use crate::errors::ApiError;
use crate::routes::{header_contains, session_header, with_session};
use crate::server::AppState;
use crate::session::{Frame, SESSION_EVENT, SessionKind, SessionManager};
use crate::source::ClientSource;

/// Query flags on `POST /mcp`.
#[derive(Debug, Default, Deserialize)]
pub struct McpQuery {
    /// `1` or `true` selects NDJSON streaming.
    #[serde(default)]
    pub stream: Option<String>,
}

/// `?session=` on the legacy SSE routes.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    /// Session id.
    #[serde(default)]
    pub session: Option<String>,
}

fn wants_ndjson(headers: &HeaderMap, query: &McpQuery) -> bool {
    header_contains(headers, header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        || header_contains(headers, header::ACCEPT, NDJSON_CONTENT_TYPE)
        || matches!(query.stream.as_deref(), Some("1" | "true"))
}

fn wants_sse(headers: &HeaderMap) -> bool {
    header_contains(headers, header::ACCEPT, SSE_CONTENT_TYPE)
        || headers
            .get("x-stream")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn is_json(headers: &HeaderMap) -> bool {
    match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        }
    }
}

/// `POST /mcp`
pub async fn post_mcp(
    State(state): State<AppState>,
    ClientSource(source): ClientSource,
    Query(query): Query<McpQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ndjson = wants_ndjson(&headers, &query);
    if !ndjson && !is_json(&headers) {
        return ApiError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json").into_response();
    }
    let text = String::from_utf8_lossy(&body).into_owned();
    let requested = session_header(&headers);

    if ndjson {
        let connection = match state.admission.admit(&source) {
            Ok(connection) => connection,
            Err(rejection) => return ApiError::from(rejection).into_response(),
        };
        let session_id = post_session_id(&state, &source, requested.as_deref());
        return with_session(ndjson_response(Arc::clone(&state.dispatcher), text, connection), &session_id);
    }

    if wants_sse(&headers) {
        return open_streamable(&state, &source, requested.as_deref(), text);
    }

    let session_id = post_session_id(&state, &source, requested.as_deref());
    let response = match state.dispatcher.handle_text(&text).await {
        Some(out) => Json(out).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session(response, &session_id)
}

/// Session id for a non-streaming POST. A POST without `mcp-session-id`
/// gets a fresh id to echo but no session until the client comes back
/// with it.
fn post_session_id(state: &AppState, source: &str, requested: Option<&str>) -> String {
    match requested {
        Some(requested) => {
            let session = state.sessions.open(SessionKind::Http, source, Some(requested));
            session.touch();
            session.id().to_owned()
        }
        None => SessionManager::mint_id(),
    }
}

/// Answer a streamable POST over SSE: `session` first, the result as a
/// `message` event once dispatch finishes, then heartbeats while this
/// response is still the session's current stream. The result is written
/// to this response's own channel, so overlapping POSTs on one session each
/// get their own answer.
fn open_streamable(state: &AppState, source: &str, requested: Option<&str>, text: String) -> Response {
    let connection = match state.admission.admit(source) {
        Ok(connection) => connection,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    let session = state.sessions.open(SessionKind::Streamable, source, requested);
    let Some((stream, reply)) = state.sessions.attach_reply_stream(&session, Some(connection)) else {
        return ApiError::session_not_found().into_response();
    };
    let id = session.id().to_owned();
    let _ = reply.try_send(Frame::event(SESSION_EVENT, json!({ "session": id })));

    let dispatcher = Arc::clone(&state.dispatcher);
    drop(tokio::spawn(async move {
        let Some(out) = dispatcher.handle_text(&text).await else {
            return;
        };
        session.touch();
        if reply.send(Frame::message(out)).await.is_err() {
            debug!(session_id = %session.id(), "result dropped, client went away");
        }
    }));

    with_session(Sse::new(stream.into_sse()).into_response(), &id)
}

/// One JSON value per line; each request line or array item answered as
/// one line in order. The admission slot is held until the body ends.
fn ndjson_response(dispatcher: Arc<Dispatcher>, text: String, connection: Connection) -> Response {
    let body = async_stream::stream! {
        let _connection = connection;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let items = match serde_json::from_str::<Value>(line) {
                Ok(Value::Array(items)) => items,
                Ok(value) => vec![value],
                Err(_) => {
                    if let Some(out) = dispatcher.handle_text(line).await {
                        yield Ok::<_, Infallible>(ndjson_line(&out));
                    }
                    continue;
                }
            };
            for item in items {
                if let Some(out) = dispatcher.handle_value(item).await {
                    yield Ok(ndjson_line(&out));
                }
            }
        }
    };
    let mut response = Body::from_stream(body).into_response();
    let _ = response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
    response
}

fn ndjson_line(value: &Value) -> Bytes {
    Bytes::from(format!("{value}\n"))
}

/// `GET /mcp`
pub async fn get_mcp(State(state): State<AppState>, ClientSource(source): ClientSource, headers: HeaderMap) -> Response {
    let requested = session_header(&headers);
    let (name, version) = state.dispatcher.context().server_identity();
    let server_info = json!({ "name": name, "version": version, "protocolVersion": PROTOCOL_VERSION });
    open_sse(&state, &source, SessionKind::Sse, requested.as_deref(), Some(server_info))
}

/// `DELETE /mcp`
pub async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return ApiError::not_ok(StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
    };
    if state.sessions.close(&id, "client closed") {
        Json(json!({ "ok": true })).into_response()
    } else {
        ApiError::session_not_found().into_response()
    }
}

/// `GET /mcp/sse?session=`
pub async fn get_sse(
    State(state): State<AppState>,
    ClientSource(source): ClientSource,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    let requested = query.session.filter(|s| !s.is_empty()).or_else(|| session_header(&headers));
    open_sse(&state, &source, SessionKind::Sse, requested.as_deref(), None)
}

fn open_sse(
    state: &AppState,
    source: &str,
    kind: SessionKind,
    requested: Option<&str>,
    server_info: Option<Value>,
) -> Response {
    let connection = match state.admission.admit(source) {
        Ok(connection) => connection,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    let session = state.sessions.open(kind, source, requested);
    let Some(stream) = state.sessions.attach_stream(&session, Some(connection)) else {
        return ApiError::session_not_found().into_response();
    };
    let id = session.id().to_owned();
    let _ = session.enqueue(Frame::event(SESSION_EVENT, json!({ "session": id })));
    if let Some(info) = server_info {
        let _ = session.enqueue(Frame::event("serverInfo", info));
    }
    with_session(Sse::new(stream.into_sse()).into_response(), &id)
}

/// `POST /mcp/message?session=`
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(id) = query.session.filter(|s| !s.is_empty()).or_else(|| session_header(&headers)) else {
        return ApiError::not_ok(StatusCode::BAD_REQUEST, "missing session").into_response();
    };
    if !state.sessions.touch(&id) {
        return ApiError::session_not_found().into_response();
    }
    let text = String::from_utf8_lossy(&body);
    let Some(out) = state.dispatcher.handle_text(&text).await else {
        return Json(json!({ "ok": true })).into_response();
    };
    if state.sessions.send(&id, Frame::message(out)) {
        return Json(json!({ "ok": true })).into_response();
    }
    if state.sessions.get(&id).is_none() {
        return ApiError::session_not_found().into_response();
    }
    warn!(session_id = %id, "session buffer full, result dropped");
    ApiError::not_ok(StatusCode::SERVICE_UNAVAILABLE, "session busy").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            let _ = map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn ndjson_selection() {
        let none = McpQuery::default();
        assert!(wants_ndjson(&headers(&[("content-type", "application/x-ndjson")]), &none));
        assert!(wants_ndjson(&headers(&[("accept", "application/x-ndjson")]), &none));
        assert!(wants_ndjson(&HeaderMap::new(), &McpQuery { stream: Some("1".into()) }));
        assert!(wants_ndjson(&HeaderMap::new(), &McpQuery { stream: Some("true".into()) }));
        assert!(!wants_ndjson(&HeaderMap::new(), &McpQuery { stream: Some("0".into()) }));
        assert!(!wants_ndjson(&headers(&[("content-type", "application/json")]), &none));
    }

    #[test]
    fn sse_selection() {
        assert!(wants_sse(&headers(&[("accept", "text/event-stream")])));
        assert!(wants_sse(&headers(&[("x-stream", "true")])));
        assert!(!wants_sse(&headers(&[("x-stream", "no")])));
        assert!(!wants_sse(&headers(&[("accept", "application/json")])));
    }

    #[test]
    fn json_content_types() {
        assert!(is_json(&HeaderMap::new()));
        assert!(is_json(&headers(&[("content-type", "application/json; charset=utf-8")])));
        assert!(is_json(&headers(&[("content-type", "application/vnd.api+json")])));
        assert!(!is_json(&headers(&[("content-type", "text/plain")])));
    }

    #[test]
    fn ndjson_line_is_terminated() {
        assert_eq!(ndjson_line(&json!({"a": 1})), Bytes::from_static(b"{\"a\":1}\n"));
    }
}
