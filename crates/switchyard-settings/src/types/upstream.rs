//! Upstream definitions.
//!
//! An upstream is selected by its `transport` tag. Common fields (mapping,
//! limits, reconnect policy) sit next to the transport-specific ones in the
//! same JSON object:
//!
//! ```json
//! { "name": "math", "transport": "stdio", "command": "math-server" }
//! { "name": "search", "transport": "http", "url": "https://search.local/mcp",
//!   "auth": { "type": "bearer", "token": "..." } }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One configured upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Unique key.
    pub name: String,
    /// Disabled upstreams are ignored.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name prefix in the merged catalog; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Naming rules.
    #[serde(default)]
    pub mapping: MappingConfig,
    /// Which catalogs are bridged.
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Timeouts and concurrency.
    #[serde(default)]
    pub limits: UpstreamLimits,
    /// Reconnection and health probing.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Wire transport and its parameters.
    #[serde(flatten)]
    pub transport: TransportConfig,
}

fn default_true() -> bool {
    true
}

impl UpstreamConfig {
    /// Effective namespace (`namespace` or `name`).
    pub fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.name)
    }

    /// Convenience constructor for a stdio upstream with default settings.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio(StdioTransport {
                command: command.into(),
                args: Vec::new(),
                cwd: None,
                env: BTreeMap::new(),
            }),
        )
    }

    /// Convenience constructor for an HTTP upstream with default settings.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(name, TransportConfig::Http(RemoteTransport::new(url)))
    }

    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            namespace: None,
            mapping: MappingConfig::default(),
            capabilities: CapabilityFlags::default(),
            limits: UpstreamLimits::default(),
            reconnect: ReconnectPolicy::default(),
            transport,
        }
    }
}

/// Transport selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Subprocess speaking line-delimited JSON-RPC.
    Stdio(StdioTransport),
    /// Streamable HTTP endpoint.
    Http(RemoteTransport),
    /// Legacy SSE endpoint, driven through the HTTP RPC client.
    Sse(RemoteTransport),
    /// WebSocket endpoint, driven through the HTTP RPC client.
    Ws(RemoteTransport),
}

impl TransportConfig {
    /// Transport tag as written in config.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Http(_) => "http",
            Self::Sse(_) => "sse",
            Self::Ws(_) => "ws",
        }
    }

    /// Remote parameters for the HTTP family, `None` for stdio.
    pub fn remote(&self) -> Option<&RemoteTransport> {
        match self {
            Self::Stdio(_) => None,
            Self::Http(r) | Self::Sse(r) | Self::Ws(r) => Some(r),
        }
    }
}

/// Subprocess parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransport {
    /// Executable.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Extra environment, layered over the gateway's own.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Remote endpoint parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransport {
    /// Endpoint URL.
    pub url: String,
    /// Static headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<UpstreamAuth>,
    /// Allowed hosts; empty allows any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<HostWhitelist>,
}

impl RemoteTransport {
    /// Endpoint with no headers, auth or whitelist.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            auth: None,
            whitelist: None,
        }
    }
}

/// Upstream credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamAuth {
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Token.
        token: String,
    },
    /// `Authorization: Basic base64(user:pass)`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Arbitrary header.
    Header {
        /// Header name.
        #[serde(rename = "headerName")]
        header_name: String,
        /// Header value.
        value: String,
    },
    /// Mutual TLS (accepted, not applied by the HTTP client).
    Mtls {
        /// Client certificate path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cert: Option<String>,
        /// Client key path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, <redacted>)"),
            Self::Header { header_name, .. } => write!(f, "Header({header_name}: <redacted>)"),
            Self::Mtls { cert, .. } => write!(f, "Mtls({cert:?})"),
        }
    }
}

/// Host allow-list for remote upstreams.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostWhitelist {
    /// Host names (no scheme, no port).
    pub allowed_hosts: Vec<String>,
}

/// What to do when two upstreams publish the same catalog name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Refuse to register the later tool.
    #[default]
    Error,
    /// The later registration replaces the earlier one.
    LastWins,
}

/// Per-kind rename tables (upstream name to local name).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameTables {
    /// Tool renames.
    pub tools: BTreeMap<String, String>,
    /// Resource name renames.
    pub resources: BTreeMap<String, String>,
    /// Prompt renames.
    pub prompts: BTreeMap<String, String>,
}

/// Naming rules for one upstream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingConfig {
    /// Publish names without the `{namespace}_` prefix.
    pub hide_namespace_prefix: bool,
    /// Rename tables.
    pub rename: RenameTables,
    /// Collision handling.
    pub conflict_policy: ConflictPolicy,
}

/// Which catalogs are bridged from an upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityFlags {
    /// Bridge `tools/*`.
    pub bridge_tools: bool,
    /// Bridge `resources/*`.
    pub bridge_resources: bool,
    /// Bridge `prompts/*`.
    pub bridge_prompts: bool,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            bridge_tools: true,
            bridge_resources: true,
            bridge_prompts: true,
        }
    }
}

/// Timeouts and concurrency limits for one upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamLimits {
    /// Connect (and handshake) timeout.
    pub connect_ms: u64,
    /// Per-call timeout.
    pub call_ms: u64,
    /// Maximum in-flight calls; unlimited when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_calls: Option<usize>,
}

impl Default for UpstreamLimits {
    fn default() -> Self {
        Self {
            connect_ms: 15_000,
            call_ms: 15_000,
            max_concurrent_calls: None,
        }
    }
}

impl UpstreamLimits {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Call timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}

/// Retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaxRetries {
    /// Give up after this many failed attempts.
    Finite(u32),
    /// Never give up.
    Infinite,
}

impl MaxRetries {
    /// Whether `attempts` failed attempts exhaust the budget.
    pub fn is_exhausted(self, attempts: u32) -> bool {
        match self {
            Self::Finite(max) => attempts >= max,
            Self::Infinite => false,
        }
    }
}

impl Serialize for MaxRetries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Finite(n) => serializer.serialize_u32(*n),
            Self::Infinite => serializer.serialize_str("infinite"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxRetries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(u32),
            Word(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Count(n) => Ok(Self::Finite(n)),
            Repr::Word(w) if w.eq_ignore_ascii_case("infinite") => Ok(Self::Infinite),
            Repr::Word(other) => Err(D::Error::custom(format!(
                "invalid maxRetries `{other}`, expected a number or \"infinite\""
            ))),
        }
    }
}

/// Reconnection and health-probe settings for one upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Supervise this upstream (reconnect + health probing).
    pub enabled: bool,
    /// First retry delay.
    pub initial_delay_ms: u64,
    /// Delay cap.
    pub max_delay_ms: u64,
    /// Multiplier per failed attempt.
    pub factor: f64,
    /// Retry budget.
    pub max_retries: MaxRetries,
    /// Health probe interval; `0` disables probing.
    pub heartbeat_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            factor: 2.0,
            max_retries: MaxRetries::Finite(5),
            heartbeat_ms: 30_000,
        }
    }
}
