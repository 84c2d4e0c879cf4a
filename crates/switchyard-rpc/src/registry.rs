//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, warn};

use switchyard_core::jsonrpc::INTERNAL_ERROR;
use switchyard_core::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RpcContext;
use crate::errors::RpcError;

/// Requests per method (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Failed requests (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Handler duration seconds (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    timeout: Duration,
}

impl MethodRegistry {
    /// Maximum time a single RPC handler is allowed to run.
    pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: Self::HANDLER_TIMEOUT,
        }
    }

    /// Register a handler for a method name, replacing any previous one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Override the handler timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dispatch a request to its handler. The response echoes the request
    /// id (`null` for notifications; callers drop those replies).
    pub async fn dispatch(&self, request: JsonRpcRequest, ctx: &RpcContext) -> JsonRpcResponse {
        let JsonRpcRequest { id, method, params, .. } = request;
        let id = id.unwrap_or(Value::Null);
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            let err = RpcError::MethodNotFound { method: method.clone() };
            counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => err.kind()).increment(1);
            return error_response(id, &err);
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, handler.handle(params, ctx)).await;

        let response = match result {
            Ok(Ok(result)) => JsonRpcResponse::success(id, result),
            Ok(Err(err)) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => err.kind()).increment(1);
                if matches!(err, RpcError::Internal { .. }) {
                    error!(method, error = %err, "RPC handler failed");
                }
                error_response(id, &err)
            }
            Err(_elapsed) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "timeout").increment(1);
                error!(method, "RPC handler timed out after {:?}", self.timeout);
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Handler for '{method}' timed out"))
            }
        };

        let duration = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone()).record(duration.as_secs_f64());

        if duration.as_secs() >= 5 {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        response
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn error_response(id: Value, err: &RpcError) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: switchyard_core::jsonrpc::JSONRPC_VERSION.into(),
        id,
        result: None,
        error: Some(err.to_error_body()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;
    use serde_json::json;

    // ── Test handler implementations ────────────────────────────────

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(json!(null)))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Err(RpcError::Internal { message: "boom".into() })
        }
    }

    struct SlowHandler {
        delay: Duration,
    }

    #[async_trait]
    impl MethodHandler for SlowHandler {
        async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!("done"))
        }
    }

    fn request(id: Value, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_and_dispatch_success() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);

        let resp = reg.dispatch(request(json!("r1"), "echo", Some(json!({"x": 1}))), &ctx).await;
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn dispatch_method_not_found_preserves_id() {
        let ctx = make_test_context();
        let reg = MethodRegistry::new();

        let resp = reg.dispatch(request(json!(99), "no/such", None), &ctx).await;
        assert_eq!(resp.id, 99);
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32_601);
        assert!(err.message.contains("no/such"));
    }

    #[tokio::test]
    async fn dispatch_handler_error() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);

        let resp = reg.dispatch(request(json!("id-err"), "fail", None), &ctx).await;
        assert_eq!(resp.id, "id-err");
        assert_eq!(resp.error.unwrap().code, -32_603);
    }

    #[tokio::test]
    async fn list_methods_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("tools/list", EchoHandler);
        reg.register("initialize", EchoHandler);
        assert_eq!(reg.methods(), vec!["initialize", "tools/list"]);
        assert!(reg.has_method("initialize"));
        assert!(!reg.has_method("shutdown"));
    }

    #[tokio::test]
    async fn register_overwrites_previous() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("test", EchoHandler);
        reg.register("test", FailHandler);
        let resp = reg.dispatch(request(json!(1), "test", None), &ctx).await;
        assert!(resp.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_timeout_returns_internal_error() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new();
        reg.register("slow", SlowHandler { delay: Duration::from_secs(120) });

        let resp = reg.dispatch(request(json!("r-timeout"), "slow", None), &ctx).await;
        assert_eq!(resp.id, "r-timeout");
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32_603);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn fast_handler_unaffected_by_timeout() {
        let ctx = make_test_context();
        let mut reg = MethodRegistry::new().with_timeout(Duration::from_secs(1));
        reg.register("fast", SlowHandler { delay: Duration::from_millis(1) });
        let resp = reg.dispatch(request(json!(1), "fast", None), &ctx).await;
        assert_eq!(resp.result.unwrap(), "done");
    }

    #[test]
    fn metric_constants_are_snake_case() {
        for name in [RPC_REQUESTS_TOTAL, RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS] {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'), "{name}");
        }
    }
}
