//! Transport-agnostic JSON-RPC entry point.
//!
//! Every inbound surface (HTTP, SSE, NDJSON, WebSocket, stdio) hands raw
//! payloads here and writes back whatever comes out. `None` means "nothing
//! to send": the payload held only notifications.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use switchyard_core::jsonrpc::{INVALID_REQUEST, PARSE_ERROR, parse_envelope};
use switchyard_core::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RpcContext;
use crate::handlers::register_all;
use crate::registry::MethodRegistry;

/// Routes single and batch payloads through the method registry.
pub struct Dispatcher {
    methods: MethodRegistry,
    ctx: RpcContext,
}

impl Dispatcher {
    /// Dispatcher with every gateway method registered.
    pub fn new(ctx: RpcContext) -> Self {
        let mut methods = MethodRegistry::new();
        register_all(&mut methods);
        Self { methods, ctx }
    }

    /// Override the per-call handler timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.methods = std::mem::take(&mut self.methods).with_timeout(timeout);
        self
    }

    /// Shared handler context.
    pub fn context(&self) -> &RpcContext {
        &self.ctx
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        self.methods.methods()
    }

    /// Handle a raw text payload. Malformed JSON yields a Parse error with a
    /// `null` id.
    pub async fn handle_text(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                debug!(error = %e, "unparseable payload");
                Some(to_value(&JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error")))
            }
        }
    }

    /// Handle an already-parsed payload, single or batch.
    pub async fn handle_value(&self, payload: Value) -> Option<Value> {
        match payload {
            Value::Array(items) => self.handle_batch(items).await,
            single => self.handle_single(single).await.map(|r| to_value(&r)),
        }
    }

    /// Handle a validated request. Notifications are dispatched but
    /// produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let notification = request.is_notification();
        let response = self.methods.dispatch(request, &self.ctx).await;
        (!notification).then_some(response)
    }

    async fn handle_single(&self, value: Value) -> Option<JsonRpcResponse> {
        match parse_envelope(value) {
            Ok(request) => self.handle_request(request).await,
            Err(id) => Some(JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid Request")),
        }
    }

    async fn handle_batch(&self, items: Vec<Value>) -> Option<Value> {
        if items.is_empty() {
            return Some(to_value(&JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                "Invalid Request: empty batch",
            )));
        }
        let mut responses = Vec::with_capacity(items.len());
        for item in items {
            if let Some(response) = self.handle_single(item).await {
                responses.push(to_value(&response));
            }
        }
        (!responses.is_empty()).then_some(Value::Array(responses))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods.methods().len())
            .finish_non_exhaustive()
    }
}

fn to_value(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::{make_connected_context, make_test_context};
    use serde_json::json;

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let d = Dispatcher::new(make_test_context());
        let out = d.handle_text("{not json").await.unwrap();
        assert_eq!(out["error"]["code"], -32_700);
        assert_eq!(out["id"], Value::Null);
    }

    #[tokio::test]
    async fn invalid_envelope_echoes_id() {
        let d = Dispatcher::new(make_test_context());
        let out = d.handle_value(json!({"jsonrpc": "1.0", "id": 4, "method": "ping"})).await.unwrap();
        assert_eq!(out["error"]["code"], -32_600);
        assert_eq!(out["id"], 4);
    }

    #[tokio::test]
    async fn notification_has_no_reply() {
        let d = Dispatcher::new(make_test_context());
        let out = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn unknown_method() {
        let d = Dispatcher::new(make_test_context());
        let out = d.handle_value(json!({"jsonrpc": "2.0", "id": "a", "method": "nope"})).await.unwrap();
        assert_eq!(out["error"]["code"], -32_601);
        assert_eq!(out["id"], "a");
    }

    #[tokio::test]
    async fn batch_keeps_order_and_flags_bad_items() {
        let d = Dispatcher::new(make_test_context());
        let out = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                7,
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": 2, "method": "initialize"}
            ]))
            .await
            .unwrap();
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[0]["result"], json!({}));
        assert_eq!(items[1]["error"]["code"], -32_600);
        assert_eq!(items[2]["id"], 2);
        assert_eq!(items[2]["result"]["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn empty_batch_is_single_error() {
        let d = Dispatcher::new(make_test_context());
        let out = d.handle_value(json!([])).await.unwrap();
        assert!(out.is_object());
        assert_eq!(out["error"]["code"], -32_600);
    }

    #[tokio::test]
    async fn all_notification_batch_is_silent() {
        let d = Dispatcher::new(make_test_context());
        let out = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"}
            ]))
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn tool_call_end_to_end() {
        let d = Dispatcher::new(make_connected_context().await);
        let out = d
            .handle_text(r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"math_add","arguments":{"a":2,"b":3}}}"#)
            .await
            .unwrap();
        assert_eq!(out["id"], 9);
        assert_eq!(out["result"]["isError"], false);
    }
}
