//! `/api/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Upstream counts in the health body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpstreamCounts {
    /// Enabled upstreams in the config.
    pub total: usize,
    /// Upstreams with a live connection.
    pub connected: usize,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` while some upstream is down.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live sessions.
    pub sessions: usize,
    /// Admitted stream connections.
    pub connections: usize,
    /// Upstream connectivity.
    pub upstreams: UpstreamCounts,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    connections: usize,
    upstreams: UpstreamCounts,
) -> HealthResponse {
    let status = if upstreams.connected >= upstreams.total {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        connections,
        upstreams,
    }
}
