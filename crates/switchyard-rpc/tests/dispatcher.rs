//! End-to-end dispatcher scenarios over in-memory upstreams.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use switchyard_rpc::{Dispatcher, RpcContext};
use switchyard_settings::{ConfigHandle, GatewayConfig, UpstreamConfig};
use switchyard_upstream::{AdapterFactory, TransportAdapter, UpstreamError, UpstreamRegistry};

/// `math` answers tools and resources; `notes` only has tools.
struct Upstream {
    name: String,
}

#[async_trait]
impl TransportAdapter for Upstream {
    fn transport(&self) -> &'static str {
        "mock"
    }

    async fn request(&self, method: &str, params: Option<Value>) -> switchyard_upstream::Result<Value> {
        let params = params.unwrap_or_default();
        match (self.name.as_str(), method) {
            ("math", "tools/list") => Ok(json!({"tools": [{
                "name": "add",
                "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}, "required": ["a", "b"]}
            }]})),
            ("math", "tools/call") => {
                let a = params["arguments"]["a"].as_f64().unwrap_or_default();
                let b = params["arguments"]["b"].as_f64().unwrap_or_default();
                Ok(json!({"content": [{"type": "text", "text": format!("sum={}", a + b)}]}))
            }
            ("math", "resources/list") => Ok(json!({"resources": [{"uri": "math://pi", "name": "pi"}]})),
            ("notes", "tools/list") => Ok(json!({"tools": [{"name": "add"}]})),
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
    async fn connect(&self, upstream: &UpstreamConfig) -> switchyard_upstream::Result<Arc<dyn TransportAdapter>> {
        if upstream.name == "offline" {
            return Err(UpstreamError::Closed);
        }
        Ok(Arc::new(Upstream {
            name: upstream.name.clone(),
        }))
    }
}

async fn dispatcher(names: &[&str]) -> Dispatcher {
    let upstreams = names
        .iter()
        .map(|name| {
            let mut u = UpstreamConfig::stdio(*name, "unused");
            u.reconnect.enabled = false;
            u
        })
        .collect();
    let config = GatewayConfig {
        upstreams,
        ..GatewayConfig::default()
    };
    let registry = UpstreamRegistry::new(ConfigHandle::new(config), Arc::new(Factory));
    registry.init_upstreams().await;
    Dispatcher::new(RpcContext::new(registry))
}

async fn call(d: &Dispatcher, method: &str, params: Value) -> Value {
    d.handle_value(json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
        .await
        .unwrap()
}

#[tokio::test]
async fn namespaced_tools_do_not_collide() {
    let d = dispatcher(&["math", "notes"]).await;
    let out = call(&d, "tools/list", json!({})).await;
    let mut names: Vec<_> = out["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["math_add", "notes_add"]);
}

#[tokio::test]
async fn tool_result_text_comes_from_upstream() {
    let d = dispatcher(&["math"]).await;
    let out = call(&d, "tools/call", json!({"name": "math_add", "arguments": {"a": 2, "b": 3}})).await;
    assert_eq!(out["result"]["isError"], false);
    assert_eq!(out["result"]["content"][0]["text"], "sum=5");
}

#[tokio::test]
async fn missing_required_never_reaches_upstream() {
    let d = dispatcher(&["math"]).await;
    let out = call(&d, "tools/call", json!({"name": "math_add", "arguments": {}})).await;
    assert_eq!(out["result"]["isError"], true);
    let text = out["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(text, "Missing required arguments: a, b");
}

#[tokio::test]
async fn resources_survive_an_offline_upstream() {
    let d = dispatcher(&["math", "offline", "notes"]).await;
    let out = call(&d, "resources/list", json!({})).await;
    let uris: Vec<_> = out["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(uris, vec!["info://server", "help://usage", "math://pi"]);
}

#[tokio::test]
async fn status_reports_every_upstream() {
    let d = dispatcher(&["math", "offline"]).await;
    let out = call(&d, "upstreams/status", json!({})).await;
    let upstreams = out["result"]["upstreams"].as_array().unwrap();
    assert_eq!(upstreams.len(), 2);
    assert_eq!(upstreams[0]["name"], "math");
    assert_eq!(upstreams[0]["connected"], true);
    assert_eq!(upstreams[1]["name"], "offline");
    assert_eq!(upstreams[1]["connected"], false);
    assert!(upstreams[1]["lastError"].is_string());
}
