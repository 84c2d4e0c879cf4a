//! Per-upstream status and metrics.
//!
//! The registry and the tool handlers write here; the admin surface reads
//! snapshots. Every update is mirrored into `metrics` gauges and counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use serde::Serialize;

use crate::supervisor::ReconnectStats;

// Metric name constants.

/// Upstream connected state (gauge, labels: upstream). 1 = connected.
pub const UPSTREAM_CONNECTED: &str = "upstream_connected";
/// Published tool count (gauge, labels: upstream).
pub const UPSTREAM_TOOLS: &str = "upstream_tools";
/// Successful reconnects (counter, labels: upstream).
pub const UPSTREAM_RECONNECTS_TOTAL: &str = "upstream_reconnects_total";
/// Tool calls routed to an upstream (counter, labels: upstream).
pub const UPSTREAM_CALLS_TOTAL: &str = "upstream_calls_total";
/// Failed tool calls (counter, labels: upstream).
pub const UPSTREAM_CALL_ERRORS_TOTAL: &str = "upstream_call_errors_total";
/// Tool call duration seconds (histogram, labels: upstream).
pub const UPSTREAM_CALL_DURATION_SECONDS: &str = "upstream_call_duration_seconds";
/// Failed health probes (counter, labels: upstream).
pub const UPSTREAM_HEALTH_FAILURES_TOTAL: &str = "upstream_health_failures_total";

/// Smoothing factor of the latency moving average.
const LATENCY_ALPHA: f64 = 0.2;

/// Observable state of one upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamStatus {
    /// Upstream name.
    pub name: String,
    /// Transport tag.
    pub transport: String,
    /// Whether a live instance exists.
    pub connected: bool,
    /// When the current instance connected.
    pub connected_at: Option<DateTime<Utc>>,
    /// Successful reconnects since startup.
    pub reconnects: u64,
    /// Most recent connect, call or probe failure.
    pub last_error: Option<String>,
    /// Published tools.
    pub tool_count: usize,
    /// Resources seen at the last aggregation.
    pub resource_count: usize,
    /// Prompts seen at the last aggregation.
    pub prompt_count: usize,
    /// Exponential moving average of tool call latency.
    pub avg_latency_ms: Option<f64>,
    /// Last health probe.
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Consecutive failed probes.
    pub consecutive_failures: u32,
    /// Reconnect supervisor state, when the upstream is supervised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<ReconnectStats>,
}

/// Shared status table keyed by upstream name.
#[derive(Clone, Debug, Default)]
pub struct UpstreamStatusStore {
    inner: Arc<RwLock<HashMap<String, UpstreamStatus>>>,
}

impl UpstreamStatusStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut UpstreamStatus)) {
        let mut map = self.inner.write();
        let entry = map.entry(name.to_owned()).or_insert_with(|| UpstreamStatus {
            name: name.to_owned(),
            ..UpstreamStatus::default()
        });
        f(entry);
    }

    /// Make sure an entry exists (configured but never connected).
    pub fn register(&self, name: &str, transport: &str) {
        self.update(name, |s| s.transport = transport.to_owned());
        gauge!(UPSTREAM_CONNECTED, "upstream" => name.to_owned()).set(0.0);
    }

    /// A new instance went live.
    pub fn mark_connected(&self, name: &str, transport: &str, tool_count: usize) {
        self.update(name, |s| {
            s.transport = transport.to_owned();
            s.connected = true;
            s.connected_at = Some(Utc::now());
            s.last_error = None;
            s.tool_count = tool_count;
            s.consecutive_failures = 0;
        });
        gauge!(UPSTREAM_CONNECTED, "upstream" => name.to_owned()).set(1.0);
        #[allow(clippy::cast_precision_loss)]
        gauge!(UPSTREAM_TOOLS, "upstream" => name.to_owned()).set(tool_count as f64);
    }

    /// The instance is gone; `error` explains why when it failed.
    pub fn mark_disconnected(&self, name: &str, error: Option<String>) {
        self.update(name, |s| {
            s.connected = false;
            s.connected_at = None;
            s.tool_count = 0;
            if error.is_some() {
                s.last_error = error;
            }
        });
        gauge!(UPSTREAM_CONNECTED, "upstream" => name.to_owned()).set(0.0);
        gauge!(UPSTREAM_TOOLS, "upstream" => name.to_owned()).set(0.0);
    }

    /// Count one successful reconnect.
    pub fn record_reconnect(&self, name: &str) {
        self.update(name, |s| s.reconnects += 1);
        counter!(UPSTREAM_RECONNECTS_TOTAL, "upstream" => name.to_owned()).increment(1);
    }

    /// Published tool count changed (conflicts, refresh).
    pub fn set_tool_count(&self, name: &str, count: usize) {
        self.update(name, |s| s.tool_count = count);
        #[allow(clippy::cast_precision_loss)]
        gauge!(UPSTREAM_TOOLS, "upstream" => name.to_owned()).set(count as f64);
    }

    /// Resource count seen at the last aggregation.
    pub fn set_resource_count(&self, name: &str, count: usize) {
        self.update(name, |s| s.resource_count = count);
    }

    /// Prompt count seen at the last aggregation.
    pub fn set_prompt_count(&self, name: &str, count: usize) {
        self.update(name, |s| s.prompt_count = count);
    }

    /// Record one tool call.
    pub fn record_call(&self, name: &str, elapsed: Duration, error: Option<String>) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let failed = error.is_some();
        self.update(name, |s| {
            s.avg_latency_ms = Some(match s.avg_latency_ms {
                Some(avg) => LATENCY_ALPHA * ms + (1.0 - LATENCY_ALPHA) * avg,
                None => ms,
            });
            if error.is_some() {
                s.last_error = error;
            }
        });
        counter!(UPSTREAM_CALLS_TOTAL, "upstream" => name.to_owned()).increment(1);
        histogram!(UPSTREAM_CALL_DURATION_SECONDS, "upstream" => name.to_owned())
            .record(elapsed.as_secs_f64());
        if failed {
            counter!(UPSTREAM_CALL_ERRORS_TOTAL, "upstream" => name.to_owned()).increment(1);
        }
    }

    /// Record one health probe outcome.
    pub fn record_health(&self, name: &str, consecutive_failures: u32, error: Option<String>) {
        let failed = error.is_some();
        self.update(name, |s| {
            s.last_health_check_at = Some(Utc::now());
            s.consecutive_failures = consecutive_failures;
            if error.is_some() {
                s.last_error = error;
            }
        });
        if failed {
            counter!(UPSTREAM_HEALTH_FAILURES_TOTAL, "upstream" => name.to_owned()).increment(1);
        }
    }

    /// Forget an upstream removed from config.
    pub fn remove(&self, name: &str) {
        let _ = self.inner.write().remove(name);
        gauge!(UPSTREAM_CONNECTED, "upstream" => name.to_owned()).set(0.0);
    }

    /// Status of one upstream.
    pub fn get(&self, name: &str) -> Option<UpstreamStatus> {
        self.inner.read().get(name).cloned()
    }

    /// All statuses, sorted by name.
    pub fn snapshot(&self) -> Vec<UpstreamStatus> {
        let mut all: Vec<_> = self.inner.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
