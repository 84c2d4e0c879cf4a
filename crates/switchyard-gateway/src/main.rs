//! # switchyard
//!
//! Gateway binary: loads the config, connects the upstreams and serves the
//! merged catalog over HTTP, or over stdin/stdout with `--stdio`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing::{info, warn};

use switchyard_core::logging::init_subscriber;
use switchyard_rpc::{Dispatcher, RpcContext};
use switchyard_server::metrics::install_recorder;
use switchyard_server::{GatewayServer, ShutdownCoordinator, serve_stdio};
use switchyard_settings::watcher::DEFAULT_DEBOUNCE;
use switchyard_settings::{ConfigHandle, GatewayConfig, config_path, load_config_from_path, watch_config_file};
use switchyard_upstream::{DefaultAdapterFactory, UpstreamRegistry};

/// switchyard gateway.
#[derive(Parser, Debug)]
#[command(name = "switchyard", about = "Aggregating JSON-RPC tool gateway")]
struct Cli {
    /// Settings file (default: `$SWITCHYARD_CONFIG`, then `./switchyard.json`).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Serve JSON-RPC over stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = config_path(cli.config.as_deref());
    let mut config = load_config_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut config);

    init_subscriber(&config.log_level, config.log_json);
    info!(
        path = %path.display(),
        upstreams = config.upstreams.len(),
        "settings loaded"
    );

    let handle = ConfigHandle::new(config.clone());
    let _watcher = match watch_config_file(&path, handle.clone(), DEFAULT_DEBOUNCE) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "settings hot reload disabled");
            None
        }
    };

    let factory = Arc::new(DefaultAdapterFactory::new(config.version.clone()));
    let registry = UpstreamRegistry::new(handle, factory);
    registry.init_upstreams().await;
    registry.watch_config();
    registry.apply_refresh_interval(config.registry.refresh_interval_ms);
    info!(connected = registry.connected_count(), "upstreams initialized");

    let result = if cli.stdio {
        run_stdio(&registry).await
    } else {
        run_http(&registry, &config).await
    };

    registry.shutdown().await;
    result
}

async fn run_stdio(registry: &Arc<UpstreamRegistry>) -> Result<()> {
    let dispatcher = Dispatcher::new(RpcContext::new(Arc::clone(registry)));
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signal = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { shutdown.cancel_on_ctrl_c().await })
    };

    let result = serve_stdio(
        &dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown.token(),
    )
    .await
    .context("stdio transport failed");
    signal.abort();
    result
}

async fn run_http(registry: &Arc<UpstreamRegistry>, config: &GatewayConfig) -> Result<()> {
    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let server = GatewayServer::new(Arc::clone(registry), metrics);
    let addr = format!("{}:{}", config.host, config.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = Arc::clone(server.shutdown());
    let signal = tokio::spawn(async move { shutdown.cancel_on_ctrl_c().await });

    let result = server.serve(listener).await.context("HTTP server failed");
    signal.abort();
    result
}
