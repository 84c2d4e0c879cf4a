//! HTTP adapter against a wiremock upstream.

use assert_matches::assert_matches;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchyard_settings::{UpstreamAuth, UpstreamConfig};
use switchyard_upstream::{HttpAdapter, TransportAdapter, UpstreamError};

fn rpc_result(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": result})
}

fn tools_body() -> Value {
    rpc_result(json!({"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}))
}

async fn mount_handshake(server: &MockServer, session: Option<&str>) {
    let mut init = ResponseTemplate::new(200).set_body_json(rpc_result(json!({
        "protocolVersion": "2024-11-05",
        "serverInfo": {"name": "remote", "version": "1"}
    })));
    if let Some(session) = session {
        init = init.insert_header("mcp-session-id", session);
    }
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(init)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(server)
        .await;
}

fn adapter(server: &MockServer) -> HttpAdapter {
    HttpAdapter::new(&UpstreamConfig::http("remote", format!("{}/mcp", server.uri())), "test").unwrap()
}

#[tokio::test]
async fn json_reply_and_single_handshake() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(tools_body()))
        .expect(2)
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    assert_eq!(adapter.list_tools().await.unwrap()[0].name, "add");
    assert_eq!(adapter.list_tools().await.unwrap().len(), 1);
}

#[tokio::test]
async fn ndjson_reply_uses_first_line() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;
    let body = format!("{}\n{{\"not\": \"read\"}}\n", tools_body());
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let tools = adapter(&server).list_tools().await.unwrap();
    assert_eq!(tools[0].name, "add");
}

#[tokio::test]
async fn sse_reply_uses_first_message() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;
    let body = format!(": comment\nevent: message\ndata: {}\n\n", tools_body());
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let tools = adapter(&server).list_tools().await.unwrap();
    assert_eq!(tools[0].name, "add");
}

#[tokio::test]
async fn session_id_is_echoed() {
    let server = MockServer::start().await;
    mount_handshake(&server, Some("sess-42")).await;
    Mock::given(method("POST"))
        .and(header("mcp-session-id", "sess-42"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(tools_body()))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    let _ = adapter.list_tools().await.unwrap();
    assert_eq!(adapter.session_id().as_deref(), Some("sess-42"));
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({}))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let mut config = UpstreamConfig::http("remote", server.uri());
    if let switchyard_settings::TransportConfig::Http(remote) = &mut config.transport {
        remote.auth = Some(UpstreamAuth::Bearer { token: "s3cret".into() });
    }
    let adapter = HttpAdapter::new(&config, "test").unwrap();
    // The 202 for tools/list carries no body.
    assert_matches!(adapter.list_tools().await, Err(UpstreamError::Decode(_)));
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    assert_matches!(
        adapter(&server).list_tools().await,
        Err(UpstreamError::HttpStatus { status: 503, body }) if body == "overloaded"
    );
}

#[tokio::test]
async fn unexpected_content_type_is_rejected() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    assert_matches!(adapter(&server).list_tools().await, Err(UpstreamError::ContentType(ct)) if ct == "text/html");
}

#[tokio::test]
async fn remote_error_is_surfaced() {
    let server = MockServer::start().await;
    mount_handshake(&server, None).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 3, "error": {"code": -32602, "message": "bad args"}
        })))
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    assert_matches!(
        adapter.call_tool("add", serde_json::Map::new()).await,
        Err(UpstreamError::Remote { code: -32602, .. })
    );
}

#[tokio::test]
async fn closed_adapter_refuses_requests() {
    let server = MockServer::start().await;
    let adapter = adapter(&server);
    adapter.close().await;
    assert_matches!(adapter.list_tools().await, Err(UpstreamError::Closed));
}
