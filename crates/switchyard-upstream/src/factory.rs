//! Adapter construction from configuration.

use std::sync::Arc;

use async_trait::async_trait;

use switchyard_settings::{TransportConfig, UpstreamConfig};

use crate::adapter::{HttpAdapter, StdioAdapter, TransportAdapter};
use crate::errors::Result;

/// Builds a connected adapter for an upstream.
///
/// The registry only depends on this trait, so tests can substitute
/// in-memory adapters.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Open a connection. Stdio upstreams are spawned and initialized here;
    /// remote upstreams initialize lazily on their first request.
    async fn connect(&self, upstream: &UpstreamConfig) -> Result<Arc<dyn TransportAdapter>>;
}

/// Factory for the real transports.
#[derive(Clone, Debug)]
pub struct DefaultAdapterFactory {
    client_version: String,
}

impl DefaultAdapterFactory {
    /// `client_version` is reported in each upstream handshake.
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            client_version: client_version.into(),
        }
    }
}

impl Default for DefaultAdapterFactory {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl AdapterFactory for DefaultAdapterFactory {
    async fn connect(&self, upstream: &UpstreamConfig) -> Result<Arc<dyn TransportAdapter>> {
        match &upstream.transport {
            TransportConfig::Stdio(_) => {
                let adapter = StdioAdapter::connect(upstream, &self.client_version).await?;
                Ok(Arc::new(adapter))
            }
            TransportConfig::Http(_) | TransportConfig::Sse(_) | TransportConfig::Ws(_) => {
                let adapter = HttpAdapter::new(upstream, &self.client_version)?;
                Ok(Arc::new(adapter))
            }
        }
    }
}
