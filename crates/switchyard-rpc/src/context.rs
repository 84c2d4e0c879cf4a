//! RPC dependency-injection context.

use std::sync::Arc;
use std::time::Instant;

use switchyard_settings::ConfigHandle;
use switchyard_upstream::UpstreamRegistry;

/// Shared context passed to every RPC handler.
#[derive(Clone)]
pub struct RpcContext {
    /// Upstream connections and the merged catalog.
    pub registry: Arc<UpstreamRegistry>,
    /// Live configuration.
    pub config: ConfigHandle,
    /// When the gateway started (for uptime).
    pub server_start_time: Instant,
}

impl RpcContext {
    /// Context over a registry, sharing the registry's config handle.
    pub fn new(registry: Arc<UpstreamRegistry>) -> Self {
        Self {
            config: registry.config().clone(),
            registry,
            server_start_time: Instant::now(),
        }
    }

    /// `(serverName, version)` from the current config.
    pub fn server_identity(&self) -> (String, String) {
        let config = self.config.current();
        (config.server_name.clone(), config.version.clone())
    }

    /// Seconds since start.
    pub fn uptime_secs(&self) -> u64 {
        self.server_start_time.elapsed().as_secs()
    }
}

impl std::fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcContext")
            .field("uptime_secs", &self.uptime_secs())
            .finish_non_exhaustive()
    }
}
