//! Process-wide stop signal for the gateway.
//!
//! One root token; the session manager, the HTTP listener and the stdio loop
//! each hold a clone or a child of it. `drain` waits for the background tasks
//! spawned around the listener, bounded by a timeout.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on how long `drain` waits for background tasks.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the gateway's root cancellation token.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator whose `drain` gives up after `drain_timeout`.
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop signal. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire on ctrl-c (or SIGTERM on unix). Returns early if the token is
    /// cancelled some other way.
    pub async fn cancel_on_ctrl_c(&self) {
        tokio::select! {
            signal = wait_for_signal() => {
                match signal {
                    Ok(name) => {
                        info!(signal = name, "stopping gateway");
                        self.shutdown();
                    }
                    Err(e) => warn!(error = %e, "signal handler unavailable"),
                }
            }
            () = self.token.cancelled() => {}
        }
    }

    /// Fire the stop signal and wait for `tasks`, up to the drain timeout.
    /// Returns `false` when the timeout elapsed first.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        self.shutdown();
        if tasks.is_empty() {
            return true;
        }
        info!(
            tasks = tasks.len(),
            timeout_ms = u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
            "draining gateway tasks"
        );
        let finished = tokio::time::timeout(self.drain_timeout, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !finished {
            warn!(timeout = ?self.drain_timeout, "drain timed out");
        }
        finished
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
