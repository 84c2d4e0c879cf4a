//! Resource handlers: built-ins merged with upstream listings.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use switchyard_upstream::UpstreamError;

use super::{opt_string_param, require_string_param};
use crate::builtins::{builtin_resources, read_builtin_resource};
use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Lists built-in resources followed by every reachable upstream's.
pub struct ListResourcesHandler;

#[async_trait]
impl MethodHandler for ListResourcesHandler {
    #[instrument(skip_all, fields(method = "resources/list"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let mut resources: Vec<Value> = builtin_resources()
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect();
        resources.extend(
            ctx.registry
                .get_aggregated_resources()
                .await
                .iter()
                .filter_map(|r| serde_json::to_value(r).ok()),
        );
        Ok(json!({ "resources": resources }))
    }
}

/// Reads a resource by URI, from a built-in or its owning upstream.
pub struct ReadResourceHandler;

#[async_trait]
impl MethodHandler for ReadResourceHandler {
    #[instrument(skip_all, fields(method = "resources/read"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let uri = require_string_param(params.as_ref(), "uri")?;
        if let Some(contents) = read_builtin_resource(&uri, ctx) {
            return Ok(contents);
        }

        let upstream = match opt_string_param(params.as_ref(), "upstream") {
            Some(upstream) => upstream,
            None => ctx
                .registry
                .resolve_resource(&uri)
                .await
                .ok_or_else(|| RpcError::invalid_params(format!("Unknown resource: {uri}")))?,
        };

        match ctx.registry.read_aggregated_resource(&upstream, &uri).await {
            Ok(contents) => Ok(contents),
            Err(UpstreamError::UnknownUpstream(name)) => {
                Err(RpcError::invalid_params(format!("Unknown upstream: {name}")))
            }
            Err(e) => {
                warn!(upstream = %upstream, uri = %uri, error = %e, "resource read failed");
                Err(RpcError::execution("resources/read", &e))
            }
        }
    }
}
