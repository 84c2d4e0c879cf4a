//! Protocol constants shared by the gateway and its upstream clients.

/// MCP protocol revision spoken on both sides of the gateway.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol revisions the gateway accepts when a client requests one.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Prefix of the `clientInfo.name` sent to upstreams during the handshake.
pub const CLIENT_NAME_PREFIX: &str = "switchyard-proxy";

/// Session correlation header for streamable HTTP.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Content type of newline-delimited JSON bodies.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Content type of Server-Sent-Events bodies.
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Separator between namespace and original name in the merged catalog.
pub const NAMESPACE_SEPARATOR: char = '_';
