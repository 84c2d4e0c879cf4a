//! Shared, replaceable configuration.
//!
//! [`ConfigHandle`] holds the current [`GatewayConfig`] behind a
//! `tokio::sync::watch` channel. A new config is always a wholesale
//! replacement; subscribers see each replacement as a change.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::{GatewayConfig, UpstreamConfig};

/// Cloneable handle to the live configuration.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<GatewayConfig>>>,
}

impl ConfigHandle {
    /// Create a handle holding `config`.
    pub fn new(config: GatewayConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current config.
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.tx.borrow().clone()
    }

    /// All configured upstreams.
    pub fn upstreams(&self) -> Vec<UpstreamConfig> {
        self.tx.borrow().upstreams.clone()
    }

    /// One upstream by name.
    pub fn upstream(&self, name: &str) -> Option<UpstreamConfig> {
        self.tx.borrow().upstream(name).cloned()
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<GatewayConfig>> {
        self.tx.subscribe()
    }

    /// Replace the config wholesale. Returns the previous value.
    pub fn replace(&self, config: GatewayConfig) -> Arc<GatewayConfig> {
        self.tx.send_replace(Arc::new(config))
    }

    /// Run `callback` with each new config until the handle is dropped.
    pub fn on_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Arc<GatewayConfig>) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let config = rx.borrow_and_update().clone();
                callback(config);
            }
        })
    }
}
