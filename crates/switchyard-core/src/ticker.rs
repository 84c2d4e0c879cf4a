//! Cancellable periodic task.
//!
//! Every timer family in the gateway (session sweeps, heartbeat pings,
//! upstream health probes, catalog refresh) runs on a [`Ticker`]. Stopping a
//! ticker prevents further ticks; a tick already in progress runs to
//! completion. Dropping the handle stops the ticker.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Returned by a tick callback to keep or stop the ticker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickFlow {
    /// Schedule the next tick.
    Continue,
    /// Stop after this tick.
    Stop,
}

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct Ticker {
    name: String,
    period: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn a ticker whose first tick fires one `period` from now.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        Self::spawn_with_parent(name, period, &CancellationToken::new(), tick)
    }

    /// Spawn a ticker that also stops when `parent` is cancelled.
    pub fn spawn_with_parent<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let name = name.into();
        let cancel = parent.child_token();
        let token = cancel.clone();
        let task_name = name.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tick().await == TickFlow::Stop {
                            break;
                        }
                    }
                }
            }
            debug!(ticker = %task_name, "ticker stopped");
        });

        Self {
            name,
            period,
            cancel,
            handle,
        }
    }

    /// Ticker name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the ticker. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the ticker has stopped (cancelled or finished).
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
