//! HTTP surface over an in-memory upstream, driven with `tower::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use switchyard_server::GatewayServer;
use switchyard_settings::{ConfigHandle, GatewayConfig, UpstreamConfig};
use switchyard_upstream::{AdapterFactory, TransportAdapter, UpstreamError, UpstreamRegistry};

struct Echo;

#[async_trait]
impl TransportAdapter for Echo {
    fn transport(&self) -> &'static str {
        "mock"
    }

    async fn request(&self, method: &str, params: Option<Value>) -> switchyard_upstream::Result<Value> {
        match method {
            "tools/list" => Ok(json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]})),
            "tools/call" => {
                let arguments = params.unwrap_or_default()["arguments"].clone();
                if let Some(ms) = arguments["delay_ms"].as_u64() {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                let text = arguments["text"].as_str().unwrap_or_default().to_owned();
                Ok(json!({"content": [{"type": "text", "text": text}]}))
            }
            _ => Err(UpstreamError::Remote {
                code: -32_601,
                message: "Method not found".into(),
            }),
        }
    }

    async fn close(&self) {}
}

struct Factory;

#[async_trait]
impl AdapterFactory for Factory {
    async fn connect(&self, _upstream: &UpstreamConfig) -> switchyard_upstream::Result<Arc<dyn TransportAdapter>> {
        Ok(Arc::new(Echo))
    }
}

async fn server_with(mut config: GatewayConfig) -> GatewayServer {
    let mut upstream = UpstreamConfig::stdio("util", "unused");
    upstream.reconnect.enabled = false;
    config.upstreams = vec![upstream];
    let registry = UpstreamRegistry::new(ConfigHandle::new(config), Arc::new(Factory));
    registry.init_upstreams().await;
    GatewayServer::new(registry, None)
}

async fn app() -> Router {
    server_with(GatewayConfig::default()).await.router()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read SSE chunks until `needle` shows up.
async fn read_until(stream: &mut axum::body::BodyDataStream, buf: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buf.contains(needle) {
            let chunk = stream.next().await.unwrap().unwrap();
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn json_request_gets_json_response_and_session_id() {
    let resp = app()
        .await
        .oneshot(post_json("/mcp", &json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("mcp-session-id"));
    let body = json_body(resp).await;
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"], json!({}));
}

#[tokio::test]
async fn supplied_session_id_is_echoed() {
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", "client-chosen")
        .body(Body::from(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string()))
        .unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.headers()["mcp-session-id"], "client-chosen");
}

#[tokio::test]
async fn notification_only_payload_is_accepted() {
    let resp = app()
        .await
        .oneshot(post_json(
            "/mcp",
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn non_json_content_type_is_rejected() {
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn ndjson_answers_one_line_per_request() {
    let body = format!(
        "{}\n{}\n{}\n",
        json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!([{"jsonrpc": "2.0", "id": 2, "method": "ping"}, {"jsonrpc": "2.0", "id": 3, "method": "nope"}]),
    );
    let req = Request::builder()
        .method("POST")
        .uri("/mcp?stream=1")
        .body(Body::from(body))
        .unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/x-ndjson");
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let lines: Vec<Value> = String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["id"], 2);
    assert_eq!(lines[2]["error"]["code"], -32_601);
}

#[tokio::test]
async fn streamable_post_sends_session_then_message() {
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", "text/event-stream")
        .body(Body::from(json!({"jsonrpc": "2.0", "id": 5, "method": "ping"}).to_string()))
        .unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let id = resp.headers()["mcp-session-id"].to_str().unwrap().to_owned();

    let mut stream = resp.into_body().into_data_stream();
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "event: message").await;
    read_until(&mut stream, &mut buf, "\"id\":5").await;
    let session_at = buf.find("event: session").unwrap();
    let message_at = buf.find("event: message").unwrap();
    assert!(session_at < message_at);
    assert!(buf.contains(&id));
}

fn streaming_post(session: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", "text/event-stream")
        .header("mcp-session-id", session)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn overlapping_streaming_posts_keep_their_own_results() {
    let app = app().await;
    let slow = app
        .clone()
        .oneshot(streaming_post(
            "shared",
            &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": {"name": "util_echo", "arguments": {"text": "slow", "delay_ms": 300}}}),
        ))
        .await
        .unwrap();
    let fast = app
        .clone()
        .oneshot(streaming_post(
            "shared",
            &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": {"name": "util_echo", "arguments": {"text": "fast"}}}),
        ))
        .await
        .unwrap();
    assert_eq!(slow.headers()["mcp-session-id"], "shared");
    assert_eq!(fast.headers()["mcp-session-id"], "shared");

    let mut fast_stream = fast.into_body().into_data_stream();
    let mut fast_buf = String::new();
    read_until(&mut fast_stream, &mut fast_buf, "\"id\":2").await;

    let mut slow_stream = slow.into_body().into_data_stream();
    let mut slow_buf = String::new();
    read_until(&mut slow_stream, &mut slow_buf, "\"id\":1").await;
    assert!(slow_buf.contains("slow"));
    assert!(!slow_buf.contains("\"id\":2"));

    let _ = tokio::time::timeout(Duration::from_millis(100), async {
        while let Some(Ok(chunk)) = fast_stream.next().await {
            fast_buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await;
    assert!(!fast_buf.contains("\"id\":1"));
}

#[tokio::test]
async fn one_shot_posts_do_not_leave_sessions_behind() {
    let server = server_with(GatewayConfig::default()).await;
    let app = server.router();
    for id in 0..3 {
        let resp = app
            .clone()
            .oneshot(post_json("/mcp", &json!({"jsonrpc": "2.0", "id": id, "method": "ping"})))
            .await
            .unwrap();
        assert!(resp.headers().contains_key("mcp-session-id"));
    }
    assert_eq!(server.sessions().count(), 0);

    let echoed = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", "kept")
        .body(Body::from(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(echoed).await.unwrap();
    assert_eq!(resp.headers()["mcp-session-id"], "kept");
    assert_eq!(server.sessions().count(), 1);
}

#[tokio::test]
async fn sse_session_receives_posted_results() {
    let app = app().await;
    let resp = app.clone().oneshot(get("/mcp/sse?session=abc")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["mcp-session-id"], "abc");
    let mut stream = resp.into_body().into_data_stream();
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "{\"session\":\"abc\"}").await;
    assert!(buf.starts_with("event: session"));

    let ack = app
        .clone()
        .oneshot(post_json(
            "/mcp/message?session=abc",
            &json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(ack.status(), StatusCode::OK);
    assert_eq!(json_body(ack).await, json!({"ok": true}));

    read_until(&mut stream, &mut buf, "util_echo").await;
    assert!(buf.contains("event: message"));
}

#[tokio::test]
async fn get_mcp_sends_server_info() {
    let resp = app().await.oneshot(get("/mcp")).await.unwrap();
    let mut stream = resp.into_body().into_data_stream();
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "event: serverInfo").await;
    read_until(&mut stream, &mut buf, "switchyard").await;
    assert!(buf.find("event: session").unwrap() < buf.find("event: serverInfo").unwrap());
}

#[tokio::test]
async fn message_to_unknown_session_is_404() {
    let resp = app()
        .await
        .oneshot(post_json(
            "/mcp/message?session=missing",
            &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await, json!({"ok": false, "error": "session not found"}));
}

#[tokio::test]
async fn delete_closes_session_once() {
    let app = app().await;
    let _ = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("mcp-session-id", "s1")
                .body(Body::from(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header("mcp-session-id", "s1")
            .body(Body::empty())
            .unwrap()
    };
    let first = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn per_source_cap_rejects_with_counts() {
    let mut config = GatewayConfig::default();
    config.admission.max_per_source = 1;
    let server = server_with(config).await;
    let app = server.router();

    let held = app.clone().oneshot(get("/mcp/sse")).await.unwrap();
    assert_eq!(held.status(), StatusCode::OK);
    assert_eq!(server.admission().count(), 1);

    let rejected = app.clone().oneshot(get("/mcp/sse")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(rejected).await;
    assert_eq!(body["current"], 1);
    assert_eq!(body["max"], 1);
    assert!(body["error"].is_string());

    drop(held);
    assert_eq!(server.admission().count(), 0);
    assert_eq!(server.sessions().count(), 0);
}

#[tokio::test]
async fn auth_gate_protects_api_but_not_health() {
    let mut config = GatewayConfig::default();
    config.auth.enabled = true;
    config.auth.tokens = vec!["secret".into()];
    let app = server_with(config).await.router();

    let denied = app.clone().oneshot(get("/api/tools")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(denied).await, json!({"error": "unauthorized"}));

    let health = app.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tools")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let tools = json_body(allowed).await;
    assert_eq!(tools[0]["name"], "util_echo");
}

#[tokio::test]
async fn health_counts_connected_upstreams() {
    let resp = app().await.oneshot(get("/api/health")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["upstreams"], json!({"total": 1, "connected": 1}));
}

#[tokio::test]
async fn tool_call_route() {
    let app = app().await;
    let ok = app
        .clone()
        .oneshot(post_json("/api/tools/call", &json!({"name": "util_echo", "arguments": {"text": "hi"}})))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await["content"][0]["text"], "hi");

    let missing = app
        .clone()
        .oneshot(post_json("/api/tools/call", &json!({"name": "nope"})))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_status_and_reconnect() {
    let app = app().await;
    let status = json_body(app.clone().oneshot(get("/api/upstreams/status")).await.unwrap()).await;
    assert_eq!(status[0]["name"], "util");
    assert_eq!(status[0]["connected"], true);

    let req = |uri: &str| Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap();
    let ok = app.clone().oneshot(req("/api/upstreams/reconnect?name=util")).await.unwrap();
    assert_eq!(json_body(ok).await, json!({"ok": true}));
    let unknown = app.clone().oneshot(req("/api/upstreams/reconnect?name=ghost")).await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
