//! Periodic upstream health probing.
//!
//! A probe is a `tools/list` under a short timeout. After `threshold`
//! consecutive failures the ticker stops itself and reports the upstream
//! unhealthy exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use switchyard_core::ticker::{TickFlow, Ticker};

use crate::adapter::TransportAdapter;
use crate::status::UpstreamStatusStore;

/// Probe parameters for one upstream instance.
pub struct HealthCheck {
    /// Upstream name.
    pub upstream: String,
    /// Adapter of the live instance.
    pub adapter: Arc<dyn TransportAdapter>,
    /// Probe period.
    pub interval: Duration,
    /// Deadline of one probe.
    pub probe_timeout: Duration,
    /// Consecutive failures that make the upstream unhealthy.
    pub threshold: u32,
    /// Status sink.
    pub status: UpstreamStatusStore,
}

/// Start probing. `on_unhealthy` runs once, after the ticker has stopped.
pub fn start_health_probe<F>(check: HealthCheck, parent: &CancellationToken, on_unhealthy: F) -> Ticker
where
    F: Fn() + Send + Sync + 'static,
{
    let check = Arc::new(check);
    let failures = Arc::new(AtomicU32::new(0));
    let on_unhealthy = Arc::new(on_unhealthy);
    let name = format!("health:{}", check.upstream);

    Ticker::spawn_with_parent(name, check.interval, parent, move || {
        let check = Arc::clone(&check);
        let failures = Arc::clone(&failures);
        let on_unhealthy = Arc::clone(&on_unhealthy);
        async move {
            let outcome = tokio::time::timeout(check.probe_timeout, check.adapter.list_tools()).await;
            let error = match outcome {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("health probe timed out after {}ms", check.probe_timeout.as_millis())),
            };

            let Some(error) = error else {
                failures.store(0, Ordering::SeqCst);
                check.status.record_health(&check.upstream, 0, None);
                debug!(upstream = %check.upstream, "health probe ok");
                return TickFlow::Continue;
            };

            let count = failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(upstream = %check.upstream, failures = count, error = %error, "health probe failed");
            check.status.record_health(&check.upstream, count, Some(error));
            if count >= check.threshold.max(1) {
                warn!(upstream = %check.upstream, "upstream unhealthy, handing off to reconnect");
                on_unhealthy();
                return TickFlow::Stop;
            }
            TickFlow::Continue
        }
    })
}
