//! Bearer-token gate for `/mcp*` and `/api/*`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde_json::json;
use tracing::{debug, warn};

use switchyard_settings::AuthSettings;

use crate::metrics::AUTH_FAILURES_TOTAL;

/// Result of an authentication check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Whether the request may proceed.
    pub authenticated: bool,
    /// Who made the request, when known.
    pub principal: Option<String>,
}

impl AuthOutcome {
    /// Accepted, optionally naming the caller.
    pub fn allow(principal: Option<String>) -> Self {
        Self {
            authenticated: true,
            principal,
        }
    }

    /// Refused.
    pub fn deny() -> Self {
        Self {
            authenticated: false,
            principal: None,
        }
    }
}

/// Decides whether an inbound request is authenticated.
pub trait Authenticator: Send + Sync {
    /// Inspect request headers.
    fn check(&self, headers: &HeaderMap) -> AuthOutcome;
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn check(&self, _headers: &HeaderMap) -> AuthOutcome {
        AuthOutcome::allow(None)
    }
}

/// Accepts `Authorization: Bearer <token>` for any configured token.
pub struct StaticTokenAuth {
    tokens: Vec<String>,
}

impl StaticTokenAuth {
    /// Gate over a fixed token list. Empty tokens are ignored.
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }
}

impl std::fmt::Debug for StaticTokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuth")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Authenticator for StaticTokenAuth {
    fn check(&self, headers: &HeaderMap) -> AuthOutcome {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented.and_then(|token| self.tokens.iter().position(|t| t == token)) {
            Some(index) => AuthOutcome::allow(Some(format!("token#{index}"))),
            None => AuthOutcome::deny(),
        }
    }
}

/// Authenticator selected by the settings.
pub fn from_settings(settings: &AuthSettings) -> Arc<dyn Authenticator> {
    if settings.enabled {
        Arc::new(StaticTokenAuth::new(settings.tokens.iter().cloned()))
    } else {
        Arc::new(AllowAll)
    }
}

/// Middleware refusing unauthenticated requests with 401 JSON.
pub async fn require_auth(
    State(auth): State<Arc<dyn Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    let outcome = auth.check(request.headers());
    if !outcome.authenticated {
        counter!(AUTH_FAILURES_TOTAL).increment(1);
        warn!(path = %request.uri().path(), "unauthenticated request rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response();
    }
    if let Some(principal) = &outcome.principal {
        debug!(principal = %principal, path = %request.uri().path(), "authenticated");
    }
    next.run(request).await
}
