//! Admin API under `/api`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use switchyard_upstream::UpstreamError;

use crate::errors::ApiError;
use crate::server::AppState;

/// `?name=` for reconnect.
#[derive(Debug, Default, Deserialize)]
pub struct NameQuery {
    /// Upstream name.
    #[serde(default)]
    pub name: Option<String>,
}

/// `POST /api/tools/call` body.
#[derive(Debug, Deserialize)]
pub struct CallToolBody {
    /// Published tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// `GET /api/upstreams/status`
pub async fn upstream_status(State(state): State<AppState>) -> Response {
    Json(state.registry.status()).into_response()
}

/// `POST /api/upstreams/reconnect?name=`
pub async fn reconnect(State(state): State<AppState>, Query(query): Query<NameQuery>) -> Response {
    let Some(name) = query.name.filter(|n| !n.is_empty()) else {
        return ApiError::not_ok(StatusCode::BAD_REQUEST, "missing name").into_response();
    };
    match state.registry.manual_reconnect(&name).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(UpstreamError::UnknownUpstream(name)) => {
            ApiError::not_ok(StatusCode::NOT_FOUND, format!("unknown upstream: {name}")).into_response()
        }
        Err(e) => {
            warn!(upstream = %name, error = %e, "manual reconnect failed");
            Json(json!({ "ok": false, "error": e.to_string() })).into_response()
        }
    }
}

/// `GET /api/tools`
pub async fn list_tools(State(state): State<AppState>) -> Response {
    Json(state.registry.get_all_tools()).into_response()
}

/// `POST /api/tools/call`
pub async fn call_tool(State(state): State<AppState>, Json(body): Json<CallToolBody>) -> Response {
    match state.registry.call_tool(&body.name, body.arguments).await {
        Ok(result) => Json(result).into_response(),
        Err(UpstreamError::UnknownTool(name)) => {
            ApiError::new(StatusCode::NOT_FOUND, format!("unknown tool: {name}")).into_response()
        }
        Err(e) => ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}
