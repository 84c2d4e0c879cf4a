//! Gateway configuration types.
//!
//! Every struct carries `#[serde(default)]` so a settings file only needs the
//! keys it changes; missing keys fall back to [`Default`].

pub mod upstream;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use upstream::{
    CapabilityFlags, ConflictPolicy, HostWhitelist, MappingConfig, MaxRetries, ReconnectPolicy,
    RemoteTransport, RenameTables, StdioTransport, TransportConfig, UpstreamAuth, UpstreamConfig,
    UpstreamLimits,
};

/// Root configuration value. Replaced wholesale on reload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Name reported in `serverInfo`.
    pub server_name: String,
    /// Version reported in `serverInfo` and upstream `clientInfo`.
    pub version: String,
    /// Bind address.
    pub host: String,
    /// HTTP port.
    pub http_port: u16,
    /// Default log level (`RUST_LOG` wins).
    pub log_level: String,
    /// Emit JSON log lines.
    pub log_json: bool,
    /// Attach a permissive CORS layer.
    pub cors: bool,
    /// Inbound authentication.
    pub auth: AuthSettings,
    /// Streaming session lifecycle.
    pub sessions: SessionSettings,
    /// Inbound connection caps.
    pub admission: AdmissionSettings,
    /// Upstream registry timers.
    pub registry: RegistrySettings,
    /// Configured upstreams.
    pub upstreams: Vec<UpstreamConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_name: "switchyard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "127.0.0.1".to_string(),
            http_port: 8090,
            log_level: "info".to_string(),
            log_json: false,
            cors: true,
            auth: AuthSettings::default(),
            sessions: SessionSettings::default(),
            admission: AdmissionSettings::default(),
            registry: RegistrySettings::default(),
            upstreams: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Enabled upstreams in declaration order.
    pub fn enabled_upstreams(&self) -> impl Iterator<Item = &UpstreamConfig> {
        self.upstreams.iter().filter(|u| u.enabled)
    }

    /// Look up an upstream by name (enabled or not).
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// Inbound bearer-token authentication.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Require a token on protected routes.
    pub enabled: bool,
    /// Accepted tokens.
    pub tokens: Vec<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("enabled", &self.enabled)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

/// Streaming session lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Idle budget before a session is force-closed.
    pub idle_timeout_ms: u64,
    /// Fraction of the idle budget after which a one-shot warning is sent.
    pub warning_ratio: f64,
    /// Sweep period.
    pub sweep_interval_ms: u64,
    /// Keep-alive ping period.
    pub heartbeat_interval_ms: u64,
    /// A session whose last heartbeat is older than twice this is dead.
    pub heartbeat_timeout_ms: u64,
    /// Outbound frame buffer per session.
    pub channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1_800_000,
            warning_ratio: 0.8,
            sweep_interval_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            channel_capacity: 64,
        }
    }
}

impl SessionSettings {
    /// Idle budget.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Idle time after which the warning is sent.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn warning_after(&self) -> Duration {
        Duration::from_millis((self.idle_timeout_ms as f64 * self.warning_ratio) as u64)
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Keep-alive period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat age beyond which a session is considered dead.
    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.saturating_mul(2))
    }
}

/// Inbound connection caps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionSettings {
    /// Global cap.
    pub max_connections: usize,
    /// Cap per source address.
    pub max_per_source: usize,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_per_source: 10,
        }
    }
}

/// Upstream registry timers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Periodic catalog refresh; `0` disables.
    pub refresh_interval_ms: u64,
    /// Per-upstream timeout while aggregating listings.
    pub aggregation_timeout_ms: u64,
    /// Timeout of one health probe.
    pub health_probe_timeout_ms: u64,
    /// Consecutive probe failures before an upstream is handed to the
    /// reconnect supervisor.
    pub unhealthy_threshold: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 0,
            aggregation_timeout_ms: 5_000,
            health_probe_timeout_ms: 5_000,
            unhealthy_threshold: 3,
        }
    }
}

impl RegistrySettings {
    /// Aggregation timeout as a [`Duration`].
    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_millis(self.aggregation_timeout_ms)
    }

    /// Health probe timeout as a [`Duration`].
    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }
}
