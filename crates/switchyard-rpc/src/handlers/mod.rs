//! RPC handler modules and registration.

pub mod admin;
pub mod lifecycle;
pub mod prompts;
pub mod resources;
pub mod tools;

use serde_json::{Map, Value};

use crate::errors::RpcError;
use crate::registry::MethodRegistry;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // Lifecycle
    registry.register("initialize", lifecycle::InitializeHandler);
    registry.register("notifications/initialized", lifecycle::InitializedHandler);
    registry.register("ping", lifecycle::PingHandler);

    // Tools
    registry.register("tools/list", tools::ListToolsHandler);
    registry.register("tools/call", tools::CallToolHandler);

    // Resources
    registry.register("resources/list", resources::ListResourcesHandler);
    registry.register("resources/read", resources::ReadResourceHandler);

    // Prompts
    registry.register("prompts/list", prompts::ListPromptsHandler);
    registry.register("prompts/get", prompts::GetPromptHandler);

    // Upstream administration
    registry.register("upstreams/status", admin::StatusHandler);
    registry.register("upstreams/reconnect", admin::ReconnectHandler);
}

/// Extract a required parameter from the params object.
pub(crate) fn require_param<'a>(params: Option<&'a Value>, key: &str) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {key}")))
}

/// Extract a required string parameter.
pub(crate) fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    require_param(params, key)?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| RpcError::invalid_params(format!("Parameter '{key}' must be a string")))
}

/// Optional string parameter; wrong types count as absent.
pub(crate) fn opt_string_param(params: Option<&Value>, key: &str) -> Option<String> {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// Object parameter under the first present key; absent means empty.
pub(crate) fn object_param(params: Option<&Value>, keys: &[&str]) -> Result<Map<String, Value>, RpcError> {
    let found = keys
        .iter()
        .find_map(|key| params.and_then(|p| p.get(*key)).map(|v| (*key, v)));
    match found {
        None | Some((_, Value::Null)) => Ok(Map::new()),
        Some((_, Value::Object(map))) => Ok(map.clone()),
        Some((key, _)) => Err(RpcError::invalid_params(format!("Parameter '{key}' must be an object"))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_all_populates_registry() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        for method in [
            "initialize",
            "notifications/initialized",
            "ping",
            "tools/list",
            "tools/call",
            "resources/list",
            "resources/read",
            "prompts/list",
            "prompts/get",
            "upstreams/status",
            "upstreams/reconnect",
        ] {
            assert!(reg.has_method(method), "{method}");
        }
    }

    #[test]
    fn require_param_missing() {
        let params = Some(json!({"other": 1}));
        let err = require_param(params.as_ref(), "name").unwrap_err();
        assert_eq!(err.code(), -32_602);
        assert!(require_param(None, "name").is_err());
    }

    #[test]
    fn require_string_param_type() {
        let params = Some(json!({"name": 5}));
        let err = require_string_param(params.as_ref(), "name").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn object_param_falls_back_through_keys() {
        let params = Some(json!({"args": {"a": 1}}));
        let map = object_param(params.as_ref(), &["arguments", "args"]).unwrap();
        assert_eq!(map["a"], 1);
        assert!(object_param(None, &["arguments"]).unwrap().is_empty());
        let bad = Some(json!({"arguments": [1]}));
        assert!(object_param(bad.as_ref(), &["arguments"]).is_err());
    }
}
