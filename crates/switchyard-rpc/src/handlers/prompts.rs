//! Prompt handlers: built-ins merged with upstream listings.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use switchyard_upstream::UpstreamError;

use super::{object_param, require_string_param};
use crate::builtins::{builtin_prompts, get_builtin_prompt};
use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Lists built-in prompts followed by every reachable upstream's.
pub struct ListPromptsHandler;

#[async_trait]
impl MethodHandler for ListPromptsHandler {
    #[instrument(skip_all, fields(method = "prompts/list"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let mut prompts: Vec<Value> = builtin_prompts()
            .iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();
        prompts.extend(
            ctx.registry
                .get_aggregated_prompts()
                .await
                .iter()
                .filter_map(|p| serde_json::to_value(p).ok()),
        );
        Ok(json!({ "prompts": prompts }))
    }
}

/// Renders a prompt by its published name.
pub struct GetPromptHandler;

#[async_trait]
impl MethodHandler for GetPromptHandler {
    #[instrument(skip_all, fields(method = "prompts/get"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let name = require_string_param(params.as_ref(), "name")?;
        let arguments = object_param(params.as_ref(), &["arguments"])?;
        if let Some(rendered) = get_builtin_prompt(&name, &arguments) {
            return rendered;
        }

        let (upstream, original) = ctx
            .registry
            .resolve_prompt(&name)
            .await
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt: {name}")))?;

        match ctx.registry.get_aggregated_prompt(&upstream, &original, arguments).await {
            Ok(rendered) => Ok(rendered),
            Err(UpstreamError::UnknownUpstream(name)) => {
                Err(RpcError::invalid_params(format!("Unknown upstream: {name}")))
            }
            Err(e) => {
                warn!(upstream = %upstream, prompt = %original, error = %e, "prompt render failed");
                Err(RpcError::execution("prompts/get", &e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::{make_connected_context, make_test_context};

    #[tokio::test]
    async fn lists_builtins_then_upstream() {
        let ctx = make_connected_context().await;
        let result = ListPromptsHandler.handle(None, &ctx).await.unwrap();
        let names: Vec<_> = result["prompts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["review-code", "explain-code", "optimize-code", "math_solve"]);
    }

    #[tokio::test]
    async fn upstream_prompt_resolves_to_original_name() {
        let ctx = make_connected_context().await;
        let result = GetPromptHandler
            .handle(Some(json!({"name": "math_solve"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["messages"][0]["content"]["text"], "solve it");
    }

    #[tokio::test]
    async fn builtin_prompt_renders() {
        let ctx = make_test_context();
        let result = GetPromptHandler
            .handle(Some(json!({"name": "explain-code", "arguments": {"code": "x = 1"}})), &ctx)
            .await
            .unwrap();
        assert!(result["messages"][0]["content"]["text"].as_str().unwrap().contains("x = 1"));
    }

    #[tokio::test]
    async fn unknown_prompt_is_invalid_params() {
        let ctx = make_test_context();
        let err = GetPromptHandler
            .handle(Some(json!({"name": "nope"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32_602);
    }
}
