//! Tool handlers that forward to an upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use switchyard_core::catalog::ToolItem;
use switchyard_core::schema::reconcile;
use switchyard_core::{ToolCallResult, ToolHandler, ToolSpec};

use crate::adapter::TransportAdapter;
use crate::mapping::NameMapper;
use crate::status::UpstreamStatusStore;

/// Calls one upstream tool by its original name.
pub struct UpstreamToolHandler {
    upstream: String,
    tool: String,
    adapter: Arc<dyn TransportAdapter>,
    permits: Option<Arc<Semaphore>>,
    call_timeout: Duration,
    status: UpstreamStatusStore,
}

#[async_trait]
impl ToolHandler for UpstreamToolHandler {
    async fn call(&self, arguments: Map<String, Value>) -> ToolCallResult {
        let _permit = match &self.permits {
            Some(sem) => match Arc::clone(sem).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return ToolCallResult::error(format!("upstream `{}` is shutting down", self.upstream)),
            },
            None => None,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.call_timeout, self.adapter.call_tool(&self.tool, arguments)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(result)) => {
                let error = result.is_error.then(|| result.joined_text());
                self.status.record_call(&self.upstream, elapsed, error);
                result
            }
            Ok(Err(e)) => {
                warn!(upstream = %self.upstream, tool = %self.tool, error = %e, "tool call failed");
                self.status.record_call(&self.upstream, elapsed, Some(e.to_string()));
                ToolCallResult::error(format!("Tool `{}` failed: {e}", self.tool))
            }
            Err(_) => {
                let ms = self.call_timeout.as_millis();
                warn!(upstream = %self.upstream, tool = %self.tool, timeout_ms = %ms, "tool call timed out");
                let message = format!("Tool `{}` timed out after {ms}ms", self.tool);
                self.status.record_call(&self.upstream, elapsed, Some(message.clone()));
                ToolCallResult::error(message)
            }
        }
    }
}

/// Everything needed to turn one upstream's tool list into catalog entries.
pub struct ToolBuildContext<'a> {
    /// Upstream name.
    pub upstream: &'a str,
    /// Name mapping.
    pub mapper: &'a NameMapper,
    /// Connected adapter.
    pub adapter: &'a Arc<dyn TransportAdapter>,
    /// Shared concurrency limit, if configured.
    pub permits: Option<Arc<Semaphore>>,
    /// Per-call deadline.
    pub call_timeout: Duration,
    /// Status sink.
    pub status: &'a UpstreamStatusStore,
}

/// Build namespaced [`ToolSpec`]s with reconciled schemas.
pub fn build_tool_specs(ctx: &ToolBuildContext<'_>, items: Vec<ToolItem>) -> Vec<ToolSpec> {
    items
        .into_iter()
        .map(|item| {
            let name = ctx.mapper.tool(&item.name);
            let input_schema = reconcile(&item.name, item.input_schema.as_ref());
            debug!(upstream = %ctx.upstream, tool = %name, properties = input_schema.properties.len(), "tool mapped");
            ToolSpec {
                title: item.title.clone().unwrap_or_else(|| item.name.clone()),
                description: item.description.clone().unwrap_or_default(),
                input_schema,
                handler: Arc::new(UpstreamToolHandler {
                    upstream: ctx.upstream.to_owned(),
                    tool: item.name,
                    adapter: Arc::clone(ctx.adapter),
                    permits: ctx.permits.clone(),
                    call_timeout: ctx.call_timeout,
                    status: ctx.status.clone(),
                }),
                name,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::ScriptedAdapter;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use switchyard_settings::MappingConfig;

    fn specs(adapter: Arc<ScriptedAdapter>, timeout: Duration) -> (Vec<ToolSpec>, UpstreamStatusStore) {
        let status = UpstreamStatusStore::new();
        let mapper = NameMapper::new("math", &MappingConfig::default());
        let dyn_adapter: Arc<dyn TransportAdapter> = adapter;
        let items = vec![
            serde_json::from_value::<ToolItem>(json!({
                "name": "add",
                "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}, "required": ["a", "b"]}
            }))
            .unwrap(),
            serde_json::from_value::<ToolItem>(json!({"name": "mystery"})).unwrap(),
        ];
        let ctx = ToolBuildContext {
            upstream: "math",
            mapper: &mapper,
            adapter: &dyn_adapter,
            permits: Some(Arc::new(Semaphore::new(1))),
            call_timeout: timeout,
            status: &status,
        };
        (build_tool_specs(&ctx, items), status)
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn namespaced_and_reconciled() {
        let (specs, _) = specs(Arc::new(ScriptedAdapter::default()), Duration::from_secs(1));
        assert_eq!(specs[0].name, "math_add");
        assert_eq!(specs[0].title, "add");
        assert_eq!(specs[0].input_schema.required, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(specs[1].name, "math_mystery");
        assert!(specs[1].input_schema.is_empty());
    }

    #[tokio::test]
    async fn call_forwards_original_name_and_content() {
        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.reply("tools/call", json!({"content": [{"type": "text", "text": "5"}]}));
        let (specs, status) = specs(Arc::clone(&adapter), Duration::from_secs(1));

        let result = specs[0].call(args(json!({"a": 2, "b": 3}))).await;
        assert!(!result.is_error);
        assert_eq!(result.joined_text(), "5");
        let calls = adapter.calls.lock();
        assert_eq!(calls[0].1.as_ref().unwrap()["name"], "add");
        assert!(status.get("math").unwrap().avg_latency_ms.is_some());
    }

    #[tokio::test]
    async fn missing_required_never_reaches_upstream() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let (specs, _) = specs(Arc::clone(&adapter), Duration::from_secs(1));
        let result = specs[0].call(args(json!({"a": 2}))).await;
        assert!(result.is_error);
        assert!(result.joined_text().contains('b'));
        assert_eq!(adapter.count("tools/call"), 0);
    }

    #[tokio::test]
    async fn upstream_errors_become_error_results() {
        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.fail("tools/call", -32603, "division by zero");
        let (specs, status) = specs(Arc::clone(&adapter), Duration::from_secs(1));
        let result = specs[0].call(args(json!({"a": 1, "b": 0}))).await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("division by zero"));
        assert!(status.get("math").unwrap().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out() {
        let adapter = Arc::new(ScriptedAdapter::default());
        adapter.hang.store(true, Ordering::SeqCst);
        let (specs, _) = specs(Arc::clone(&adapter), Duration::from_millis(250));
        let result = specs[1].call(Map::new()).await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("timed out after 250ms"));
    }
}
