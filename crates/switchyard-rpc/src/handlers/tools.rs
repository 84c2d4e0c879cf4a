//! Tool handlers: list and call against the merged catalog.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{object_param, require_string_param};
use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Lists every tool with its standard JSON Schema.
pub struct ListToolsHandler;

#[async_trait]
impl MethodHandler for ListToolsHandler {
    #[instrument(skip_all, fields(method = "tools/list"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({ "tools": ctx.registry.get_all_tools() }))
    }
}

/// Calls one tool by its published name.
///
/// Execution failures come back as `isError` results, never as RPC errors.
pub struct CallToolHandler;

#[async_trait]
impl MethodHandler for CallToolHandler {
    #[instrument(skip_all, fields(method = "tools/call"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let name = require_string_param(params.as_ref(), "name")?;
        let arguments = object_param(params.as_ref(), &["arguments", "args"])?;

        let Some(tool) = ctx.registry.tool(&name) else {
            return Err(RpcError::ToolNotFound { name });
        };
        let result = tool.call(arguments).await;
        debug!(tool = %name, is_error = result.is_error, "tool call finished");
        serde_json::to_value(&result).map_err(|e| RpcError::Internal { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::{make_connected_context, make_test_context};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn list_translates_schema() {
        let ctx = make_connected_context().await;
        let result = ListToolsHandler.handle(None, &ctx).await.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "math_add");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn empty_catalog_lists_nothing() {
        let ctx = make_test_context();
        let result = ListToolsHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(result["tools"], json!([]));
    }

    #[tokio::test]
    async fn call_passes_upstream_content_through() {
        let ctx = make_connected_context().await;
        let params = json!({"name": "math_add", "arguments": {"a": 2, "b": 3}});
        let result = CallToolHandler.handle(Some(params), &ctx).await.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("called \"add\""), "{text}");
    }

    #[tokio::test]
    async fn legacy_args_key_is_accepted() {
        let ctx = make_connected_context().await;
        let params = json!({"name": "math_add", "args": {"a": 1, "b": 1}});
        let result = CallToolHandler.handle(Some(params), &ctx).await.unwrap();
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn missing_required_is_an_error_result() {
        let ctx = make_connected_context().await;
        let params = json!({"name": "math_add", "arguments": {"a": 2}});
        let result = CallToolHandler.handle(Some(params), &ctx).await.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains('b'));
    }

    #[tokio::test]
    async fn unknown_tool_and_missing_name() {
        let ctx = make_connected_context().await;
        let err = CallToolHandler
            .handle(Some(json!({"name": "math_div"})), &ctx)
            .await
            .unwrap_err();
        assert_matches!(err, RpcError::ToolNotFound { .. });
        assert_eq!(err.code(), -32_601);

        let err = CallToolHandler.handle(Some(json!({})), &ctx).await.unwrap_err();
        assert_eq!(err.code(), -32_602);
    }
}
