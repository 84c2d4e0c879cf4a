//! Upstream error types.

use thiserror::Error;

use switchyard_core::jsonrpc::METHOD_NOT_FOUND;

/// Errors raised while talking to, or managing, an upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The subprocess could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Executable that failed.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Pipe I/O failed.
    #[error("upstream i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The HTTP request itself failed.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx HTTP status.
    #[error("upstream returned HTTP {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },
    /// Response body in a format the client cannot decode.
    #[error("unsupported upstream content type `{0}`")]
    ContentType(String),
    /// Response body could not be read as JSON-RPC.
    #[error("malformed upstream response: {0}")]
    Decode(String),
    /// The upstream answered with a JSON-RPC error.
    #[error("upstream error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {ms}ms")]
    Timeout {
        /// What timed out.
        operation: String,
        /// Deadline in milliseconds.
        ms: u64,
    },
    /// The connection is gone (process exited, adapter closed).
    #[error("upstream connection closed")]
    Closed,
    /// Optional capability not offered by this upstream.
    #[error("upstream does not support {0}")]
    Unsupported(&'static str),
    /// No connected upstream with that name.
    #[error("unknown upstream `{0}`")]
    UnknownUpstream(String),
    /// No tool with that name in the merged catalog.
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    /// URL host not allowed by the upstream's whitelist.
    #[error("host `{0}` is not in the upstream whitelist")]
    HostNotAllowed(String),
    /// Configuration the adapter cannot use.
    #[error("invalid upstream config: {0}")]
    InvalidConfig(String),
}

impl UpstreamError {
    /// Whether the error means "capability not offered" rather than a fault.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Timeout with the deadline taken from a [`std::time::Duration`].
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Map a remote "method not found" onto [`UpstreamError::Unsupported`].
    pub(crate) fn unsupported_if_missing(self, capability: &'static str) -> Self {
        match self {
            Self::Remote { code, .. } if code == METHOD_NOT_FOUND => Self::Unsupported(capability),
            other => other,
        }
    }
}

/// Result type for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;
