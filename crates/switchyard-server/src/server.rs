//! `GatewayServer`: axum HTTP surface over the dispatcher and sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use switchyard_rpc::{Dispatcher, RpcContext};
use switchyard_settings::ConfigHandle;
use switchyard_upstream::UpstreamRegistry;

use crate::admission::AdmissionController;
use crate::auth::{self, Authenticator};
use crate::health::{self, HealthResponse, UpstreamCounts};
use crate::routes::{api, mcp, ws};
use crate::session::SessionManager;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// JSON-RPC dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Upstream connections.
    pub registry: Arc<UpstreamRegistry>,
    /// Streaming sessions.
    pub sessions: Arc<SessionManager>,
    /// Connection caps.
    pub admission: AdmissionController,
    /// Live configuration.
    pub config: ConfigHandle,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The gateway's HTTP server.
pub struct GatewayServer {
    state: AppState,
    auth: Arc<dyn Authenticator>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl GatewayServer {
    /// Build a server over `registry`, taking session, admission and auth
    /// settings from the registry's config.
    pub fn new(registry: Arc<UpstreamRegistry>, metrics: Option<PrometheusHandle>) -> Self {
        let config = registry.config().clone();
        let current = config.current();
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let sessions = SessionManager::new(current.sessions.clone(), &shutdown.token());
        let dispatcher = Arc::new(Dispatcher::new(RpcContext::new(Arc::clone(&registry))));
        Self {
            state: AppState {
                dispatcher,
                registry,
                sessions,
                admission: AdmissionController::new(current.admission.clone()),
                config,
                metrics,
                start_time: Instant::now(),
            },
            auth: auth::from_settings(&current.auth),
            shutdown,
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/mcp", post(mcp::post_mcp).get(mcp::get_mcp).delete(mcp::delete_mcp))
            .route("/mcp/sse", get(mcp::get_sse))
            .route("/mcp/message", post(mcp::post_message))
            .route("/mcp/ws", get(ws::upgrade))
            .route("/api/upstreams/status", get(api::upstream_status))
            .route("/api/upstreams/reconnect", post(api::reconnect))
            .route("/api/tools", get(api::list_tools))
            .route("/api/tools/call", post(api::call_tool))
            .route_layer(middleware::from_fn_with_state(Arc::clone(&self.auth), auth::require_auth));

        let router = Router::new()
            .route("/api/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(protected)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.state.config.current().cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.state.sessions
    }

    /// Admission controller.
    pub fn admission(&self) -> &AdmissionController {
        &self.state.admission
    }

    /// Dispatcher shared by every transport.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Push config changes into the session timers and admission caps.
    pub fn watch_config(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.state.sessions);
        let admission = self.state.admission.clone();
        self.state.config.on_change(move |config| {
            sessions.set_settings(config.sessions.clone());
            admission.set_limits(config.admission.clone());
        })
    }

    /// Serve until the shutdown token fires. Sessions are closed first so
    /// open streams end and the graceful drain can finish.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        self.state.sessions.start();
        let watcher = self.watch_config();
        let token = self.shutdown.token();

        let sessions = Arc::clone(&self.state.sessions);
        let closer_token = token.clone();
        let closer = tokio::spawn(async move {
            closer_token.cancelled().await;
            sessions.shutdown();
        });

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "gateway listening");
        }
        let app = self.router();
        let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(token.cancelled_owned())
            .await;

        watcher.abort();
        let _ = self.shutdown.drain(vec![closer]).await;
        info!("gateway stopped");
        result
    }
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let total = state.config.current().enabled_upstreams().count();
    let upstreams = UpstreamCounts {
        total,
        connected: state.registry.connected_count(),
    };
    Json(health::health_check(
        state.start_time,
        state.sessions.count(),
        state.admission.count(),
        upstreams,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(handle) = &state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response();
    };
    let mut response = crate::metrics::render(handle).into_response();
    let _ = response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use switchyard_settings::GatewayConfig;
    use switchyard_upstream::DefaultAdapterFactory;
    use tower::ServiceExt;

    fn make_server(config: GatewayConfig) -> GatewayServer {
        let registry = UpstreamRegistry::new(ConfigHandle::new(config), Arc::new(DefaultAdapterFactory::new("test")));
        GatewayServer::new(registry, None)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server(GatewayConfig::default()).router();
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 0);
        assert_eq!(parsed["upstreams"]["total"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let app = make_server(GatewayConfig::default()).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server(GatewayConfig::default()).router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server(GatewayConfig::default());
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.sessions().count(), 0);
        assert_eq!(server.admission().count(), 0);
        assert!(server.dispatcher().methods().contains(&"tools/call".to_string()));
    }

    #[tokio::test]
    async fn config_change_updates_admission_limits() {
        let server = make_server(GatewayConfig::default());
        let watcher = server.watch_config();
        let mut next = GatewayConfig::default();
        next.admission.max_connections = 3;
        let _ = server.state().config.replace(next);
        for _ in 0..50 {
            if server.admission().limits().max_connections == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.admission().limits().max_connections, 3);
        watcher.abort();
    }
}
