//! RPC error type returned by method handlers.

use serde_json::Value;

use switchyard_core::JsonRpcErrorBody;
use switchyard_core::jsonrpc::{EXECUTION_ERROR, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use switchyard_upstream::UpstreamError;

/// Errors a handler can return. Each maps onto one JSON-RPC error code.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or of the wrong type.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// No handler for the method.
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// Requested method.
        method: String,
    },

    /// No tool with that name in the merged catalog.
    #[error("Tool not found: {name}")]
    ToolNotFound {
        /// Requested tool.
        name: String,
    },

    /// A resource read or prompt render failed on the upstream.
    #[error("{message}")]
    Execution {
        /// Summary.
        message: String,
        /// Underlying error text, sent as `data`.
        detail: String,
    },

    /// Unexpected failure inside the gateway.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Shorthand for [`RpcError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Wrap an upstream failure of `operation` as an execution error.
    pub fn execution(operation: &str, err: &UpstreamError) -> Self {
        Self::Execution {
            message: format!("{operation} failed"),
            detail: err.to_string(),
        }
    }

    /// JSON-RPC error code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::MethodNotFound { .. } | Self::ToolNotFound { .. } => METHOD_NOT_FOUND,
            Self::Execution { .. } => EXECUTION_ERROR,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Short label used as the `error_type` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "invalid_params",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::Execution { .. } => "execution",
            Self::Internal { .. } => "internal",
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> JsonRpcErrorBody {
        JsonRpcErrorBody {
            code: self.code(),
            message: self.to_string(),
            data: match self {
                Self::Execution { detail, .. } => Some(Value::String(detail.clone())),
                _ => None,
            },
        }
    }
}
