//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Streaming sessions opened (counter, labels: kind).
pub const SESSIONS_OPENED_TOTAL: &str = "sessions_opened_total";
/// Streaming sessions closed (counter, labels: reason).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
/// Open sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Idle warnings sent (counter).
pub const SESSION_WARNINGS_TOTAL: &str = "session_warnings_total";
/// Session lifetime seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "session_duration_seconds";
/// Frames dropped because a session buffer was full (counter).
pub const SESSION_FRAMES_DROPPED_TOTAL: &str = "session_frames_dropped_total";
/// Admitted stream connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
/// Rejected stream connections (counter, labels: scope).
pub const ADMISSION_REJECTIONS_TOTAL: &str = "admission_rejections_total";
/// Requests refused by the auth gate (counter).
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            SESSIONS_OPENED_TOTAL,
            SESSIONS_CLOSED_TOTAL,
            SESSIONS_ACTIVE,
            SESSION_WARNINGS_TOTAL,
            SESSION_DURATION_SECONDS,
            SESSION_FRAMES_DROPPED_TOTAL,
            CONNECTIONS_ACTIVE,
            ADMISSION_REJECTIONS_TOTAL,
            AUTH_FAILURES_TOTAL,
            WS_CONNECTIONS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
