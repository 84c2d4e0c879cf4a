//! JSON-RPC 2.0 envelope types used on both sides of the gateway.
//!
//! Inbound payloads are validated with [`parse_envelope`] before dispatch so
//! that an invalid envelope can still be answered with the caller's `id`.
//! Outbound upstream calls build [`JsonRpcRequest`] values directly and read
//! replies back as [`JsonRpcResponse`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Malformed JSON.
pub const PARSE_ERROR: i64 = -32_700;
/// Well-formed JSON that is not a valid request object.
pub const INVALID_REQUEST: i64 = -32_600;
/// Unknown method or unknown tool.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Parameters missing or of the wrong shape.
pub const INVALID_PARAMS: i64 = -32_602;
/// Unexpected failure inside the gateway.
pub const INTERNAL_ERROR: i64 = -32_603;
/// Tool, resource or prompt execution failure on an upstream.
pub const EXECUTION_ERROR: i64 = -32_000;

/// A JSON-RPC request or notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id. `None` marks a notification; `Some(Value::Null)` is a
    /// request whose id is literally `null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Parameters (object or array).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    /// Build a request with a numeric id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no id, no reply expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Whether this envelope is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Structured error inside a [`JsonRpcResponse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorBody {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(data) = &self.data {
            match data {
                Value::String(s) => write!(f, ": {s}")?,
                other => write!(f, ": {other}")?,
            }
        }
        Ok(())
    }
}

/// A JSON-RPC response. Exactly one of `result` and `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Echoed request id (`null` when the request id could not be read).
    #[serde(default)]
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

fn default_version() -> String {
    JSONRPC_VERSION.into()
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(JsonRpcErrorBody {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Build an error response carrying a string detail in `data`.
    pub fn error_with_data(
        id: Value,
        code: i64,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(JsonRpcErrorBody {
                code,
                message: message.into(),
                data: Some(Value::String(detail.into())),
            }),
        }
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the result payload or the error body.
    pub fn into_result(self) -> Result<Value, JsonRpcErrorBody> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Validate one inbound envelope.
///
/// On failure returns the id to echo in the Invalid Request reply (`null`
/// when the payload had no readable id).
pub fn parse_envelope(value: Value) -> Result<JsonRpcRequest, Value> {
    let Value::Object(map) = value else {
        return Err(Value::Null);
    };
    let id = map.get("id").cloned();
    let echo = id.clone().unwrap_or(Value::Null);

    if let Some(id) = &id {
        if !matches!(id, Value::Null | Value::String(_) | Value::Number(_)) {
            return Err(Value::Null);
        }
    }
    if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(echo);
    }
    let Some(method) = map.get("method").and_then(Value::as_str) else {
        return Err(echo);
    };
    let params = match map.get("params") {
        None | Some(Value::Null) => None,
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
        Some(_) => return Err(echo),
    };

    Ok(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.into(),
        id,
        method: method.to_owned(),
        params,
    })
}
