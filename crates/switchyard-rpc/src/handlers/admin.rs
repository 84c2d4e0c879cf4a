//! Upstream administration: status and manual reconnect.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};

use switchyard_upstream::UpstreamError;

use super::require_string_param;
use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Per-upstream status with supervisor state.
pub struct StatusHandler;

#[async_trait]
impl MethodHandler for StatusHandler {
    #[instrument(skip_all, fields(method = "upstreams/status"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({ "upstreams": ctx.registry.status() }))
    }
}

/// Reconnect one upstream now, clearing an exhausted retry budget.
pub struct ReconnectHandler;

#[async_trait]
impl MethodHandler for ReconnectHandler {
    #[instrument(skip_all, fields(method = "upstreams/reconnect"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let name = require_string_param(params.as_ref(), "name")?;
        info!(upstream = %name, "manual reconnect requested");
        match ctx.registry.manual_reconnect(&name).await {
            Ok(()) => Ok(json!({ "ok": true })),
            Err(UpstreamError::UnknownUpstream(name)) => {
                Err(RpcError::invalid_params(format!("Unknown upstream: {name}")))
            }
            Err(e) => Ok(json!({ "ok": false, "error": e.to_string() })),
        }
    }
}
