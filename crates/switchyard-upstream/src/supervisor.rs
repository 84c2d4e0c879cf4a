//! Reconnection supervisor.
//!
//! One retry loop per upstream name, driven by the upstream's
//! [`ReconnectPolicy`]:
//!
//! ```text
//! Idle ─schedule─▶ Scheduled(delay) ─▶ Attempting ─ok─▶ Connected
//!                      ▲                   │
//!                      └──── failed ───────┤
//!                                          └─ budget spent ─▶ Exhausted
//! ```
//!
//! `Exhausted` is terminal until [`ReconnectSupervisor::cancel`] (manual
//! reconnect, config change) clears the entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchyard_settings::ReconnectPolicy;

/// Supervisor state of one upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectState {
    /// Not under supervision.
    #[default]
    Idle,
    /// Waiting for the next attempt.
    Scheduled,
    /// An attempt is running.
    Attempting,
    /// Last attempt succeeded.
    Connected,
    /// Retry budget spent; waits for a manual trigger.
    Exhausted,
}

/// Observable supervisor state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectStats {
    /// Current state.
    pub state: ReconnectState,
    /// Failed attempts since the last success.
    pub attempts: u32,
    /// Whether a retry is pending.
    pub scheduled: bool,
    /// Delay of the pending retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_delay_ms: Option<u64>,
}

/// Performs one reconnect attempt.
#[async_trait]
pub trait Reconnector: Send + Sync {
    /// Try to bring `name` back. `true` on success.
    async fn reconnect(&self, name: &str) -> bool;
}

/// Delay before attempt `attempt` (0-based): `min(initial * factor^attempt, max)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let max = policy.max_delay_ms as f64;
    let exponent = attempt.min(1_000) as i32;
    let raw = policy.initial_delay_ms as f64 * policy.factor.max(1.0).powi(exponent);
    let ms = if raw.is_finite() { raw.min(max) } else { max };
    Duration::from_millis(ms.max(0.0) as u64)
}

#[derive(Debug, Default)]
struct Entry {
    state: ReconnectState,
    attempts: u32,
    next_delay: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Entry {
    fn stats(&self) -> ReconnectStats {
        ReconnectStats {
            state: self.state,
            attempts: self.attempts,
            scheduled: self.state == ReconnectState::Scheduled,
            next_delay_ms: self.next_delay.map(millis),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Backoff/retry engine shared by every upstream.
#[derive(Debug, Default)]
pub struct ReconnectSupervisor {
    entries: Entries,
    root: CancellationToken,
}

impl ReconnectSupervisor {
    /// Idle supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a retry loop for `name` unless one is already pending, running
    /// or exhausted. Returns whether a loop was started.
    pub fn schedule(
        &self,
        name: &str,
        policy: ReconnectPolicy,
        reconnector: Arc<dyn Reconnector>,
    ) -> bool {
        if self.root.is_cancelled() {
            return false;
        }
        let mut entries = self.entries.lock();
        let entry = entries.entry(name.to_owned()).or_default();
        match entry.state {
            ReconnectState::Scheduled | ReconnectState::Attempting | ReconnectState::Exhausted => {
                return false;
            }
            ReconnectState::Idle | ReconnectState::Connected => {}
        }
        if policy.max_retries.is_exhausted(entry.attempts) {
            entry.state = ReconnectState::Exhausted;
            warn!(upstream = %name, attempts = entry.attempts, "reconnect budget exhausted");
            return false;
        }

        let token = self.root.child_token();
        let delay = backoff_delay(&policy, entry.attempts);
        entry.state = ReconnectState::Scheduled;
        entry.next_delay = Some(delay);
        entry.cancel = Some(token.clone());
        drop(entries);

        info!(upstream = %name, delay_ms = millis(delay), "reconnect scheduled");
        drop(tokio::spawn(retry_loop(
            Arc::clone(&self.entries),
            name.to_owned(),
            policy,
            reconnector,
            token,
            delay,
        )));
        true
    }

    /// Drop all state for `name`: the pending timer is cancelled and the
    /// attempt counter reset. Also clears `Exhausted`.
    pub fn cancel(&self, name: &str) {
        if let Some(entry) = self.entries.lock().remove(name) {
            if let Some(token) = entry.cancel {
                token.cancel();
            }
        }
    }

    /// Record a connection made outside the retry loop (manual reconnect,
    /// refresh). Any pending retry is cancelled.
    pub fn mark_connected(&self, name: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(name) {
            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }
            entry.state = ReconnectState::Connected;
            entry.attempts = 0;
            entry.next_delay = None;
        }
    }

    /// Stats for one name; `None` if never supervised (or cancelled).
    pub fn stats(&self, name: &str) -> Option<ReconnectStats> {
        self.entries.lock().get(name).map(Entry::stats)
    }

    /// Stats for every supervised name.
    pub fn all_stats(&self) -> HashMap<String, ReconnectStats> {
        self.entries
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.stats()))
            .collect()
    }

    /// Cancel every loop; later `schedule` calls are ignored.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.entries.lock().clear();
    }
}

async fn retry_loop(
    entries: Entries,
    name: String,
    policy: ReconnectPolicy,
    reconnector: Arc<dyn Reconnector>,
    token: CancellationToken,
    mut delay: Duration,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        {
            let mut map = entries.lock();
            let Some(entry) = map.get_mut(&name) else { return };
            if token.is_cancelled() {
                return;
            }
            entry.state = ReconnectState::Attempting;
            entry.next_delay = None;
        }

        let connected = reconnector.reconnect(&name).await;

        let mut map = entries.lock();
        if token.is_cancelled() {
            return;
        }
        let Some(entry) = map.get_mut(&name) else { return };

        if connected {
            info!(upstream = %name, attempts = entry.attempts + 1, "reconnected");
            entry.state = ReconnectState::Connected;
            entry.attempts = 0;
            entry.cancel = None;
            return;
        }

        entry.attempts = entry.attempts.saturating_add(1);
        if policy.max_retries.is_exhausted(entry.attempts) {
            warn!(upstream = %name, attempts = entry.attempts, "reconnect budget exhausted");
            entry.state = ReconnectState::Exhausted;
            entry.cancel = None;
            return;
        }
        delay = backoff_delay(&policy, entry.attempts);
        entry.state = ReconnectState::Scheduled;
        entry.next_delay = Some(delay);
        warn!(
            upstream = %name,
            attempts = entry.attempts,
            delay_ms = millis(delay),
            "reconnect failed, retrying"
        );
    }
}
