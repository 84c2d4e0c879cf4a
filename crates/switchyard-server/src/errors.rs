//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};

use crate::admission::Rejection;

/// A JSON error body with its status code.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Response body.
    pub body: Value,
}

impl ApiError {
    /// `{"error": message}` with `status`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    /// `{"ok": false, "error": message}` with `status`.
    pub fn not_ok(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "ok": false, "error": message.into() }),
        }
    }

    /// 404 for an unknown or closed session.
    pub fn session_not_found() -> Self {
        Self::not_ok(StatusCode::NOT_FOUND, "session not found")
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({
                "error": "connection limit reached",
                "scope": rejection.scope,
                "current": rejection.current,
                "max": rejection.max,
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RejectScope;

    #[test]
    fn rejection_maps_to_503_with_counts() {
        let err = ApiError::from(Rejection {
            scope: RejectScope::Source,
            current: 10,
            max: 10,
        });
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body["scope"], "source");
        assert_eq!(err.body["current"], 10);
        assert_eq!(err.body["max"], 10);
    }

    #[test]
    fn session_not_found_shape() {
        let err = ApiError::session_not_found();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body, json!({"ok": false, "error": "session not found"}));
    }
}
