//! Session handshake handlers: initialize, initialized, ping.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use switchyard_core::constants::{PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Static capability flags advertised to clients.
pub fn server_capabilities() -> Value {
    json!({
        "tools": {},
        "resources": {"subscribe": false, "listChanged": false},
        "prompts": {"listChanged": false},
        "logging": {}
    })
}

/// Negotiates the protocol version and returns server identity.
pub struct InitializeHandler;

#[async_trait]
impl MethodHandler for InitializeHandler {
    #[instrument(skip_all, fields(method = "initialize"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(PROTOCOL_VERSION);
        let client = params
            .as_ref()
            .and_then(|p| p.pointer("/clientInfo/name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        debug!(client, requested = ?requested, negotiated = version, "client initialize");

        let (name, server_version) = ctx.server_identity();
        Ok(json!({
            "protocolVersion": version,
            "capabilities": server_capabilities(),
            "serverInfo": {"name": name, "version": server_version},
        }))
    }
}

/// `notifications/initialized`; nothing to do.
pub struct InitializedHandler;

#[async_trait]
impl MethodHandler for InitializedHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(Value::Null)
    }
}

/// Liveness check.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({}))
    }
}
