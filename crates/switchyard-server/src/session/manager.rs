//! Session map, idle sweep and heartbeat.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchyard_core::ticker::{TickFlow, Ticker};
use switchyard_settings::SessionSettings;

use super::stream::StreamGuard;
use super::{Frame, HeartbeatOutcome, Session, SessionKind, SessionStream, WARNING_EVENT};
use crate::admission::Connection;
use crate::metrics::{SESSION_WARNINGS_TOTAL, SESSIONS_ACTIVE, SESSIONS_OPENED_TOTAL};

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that received the idle warning.
    pub warned: Vec<String>,
    /// Sessions force-closed.
    pub closed: Vec<String>,
}

#[derive(Default)]
struct Timers {
    sweep: Option<Ticker>,
    heartbeat: Option<Ticker>,
}

/// Owns every live session.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    settings: RwLock<SessionSettings>,
    cancel: CancellationToken,
    timers: Mutex<Timers>,
}

impl SessionManager {
    /// Manager whose timers stop with `parent`.
    pub fn new(settings: SessionSettings, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
            cancel: parent.child_token(),
            timers: Mutex::new(Timers::default()),
        })
    }

    /// Current settings.
    pub fn settings(&self) -> SessionSettings {
        self.settings.read().clone()
    }

    /// Start the sweep and heartbeat timers. Restarts them if running.
    pub fn start(self: &Arc<Self>) {
        let settings = self.settings();
        let sweep = {
            let weak = Arc::downgrade(self);
            Ticker::spawn_with_parent("session-sweep", settings.sweep_interval(), &self.cancel, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(manager) => {
                            let _ = manager.sweep();
                            TickFlow::Continue
                        }
                        None => TickFlow::Stop,
                    }
                }
            })
        };
        let heartbeat = {
            let weak = Arc::downgrade(self);
            Ticker::spawn_with_parent(
                "session-heartbeat",
                settings.heartbeat_interval(),
                &self.cancel,
                move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(manager) => {
                                let _ = manager.heartbeat();
                                TickFlow::Continue
                            }
                            None => TickFlow::Stop,
                        }
                    }
                },
            )
        };
        let mut timers = self.timers.lock();
        timers.sweep = Some(sweep);
        timers.heartbeat = Some(heartbeat);
        debug!(
            sweep_ms = settings.sweep_interval_ms,
            heartbeat_ms = settings.heartbeat_interval_ms,
            "session timers started"
        );
    }

    /// Apply new settings; running timers are rescheduled when a period
    /// changed.
    pub fn set_settings(self: &Arc<Self>, settings: SessionSettings) {
        let previous = std::mem::replace(&mut *self.settings.write(), settings.clone());
        let running = self.timers.lock().sweep.is_some();
        let periods_changed = previous.sweep_interval_ms != settings.sweep_interval_ms
            || previous.heartbeat_interval_ms != settings.heartbeat_interval_ms;
        if running && periods_changed {
            info!("session timer periods changed, rescheduling");
            self.start();
        }
    }

    /// Fresh session id.
    pub fn mint_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Open a session, or return the live one named `requested`.
    pub fn open(&self, kind: SessionKind, source: &str, requested: Option<&str>) -> Arc<Session> {
        if let Some(existing) = requested.and_then(|id| self.get(id)) {
            existing.touch();
            return existing;
        }
        let id = requested
            .filter(|id| !id.is_empty())
            .map_or_else(Self::mint_id, ToOwned::to_owned);
        let session = Arc::new(Session::new(id.clone(), kind, source.to_owned()));

        let displaced = {
            let mut sessions = self.sessions.write();
            let displaced = sessions.insert(id.clone(), Arc::clone(&session));
            #[allow(clippy::cast_precision_loss)]
            gauge!(SESSIONS_ACTIVE).set(sessions.len() as f64);
            displaced
        };
        if let Some(old) = displaced {
            let _ = old.close("replaced");
        }
        counter!(SESSIONS_OPENED_TOTAL, "kind" => kind.as_str()).increment(1);
        info!(session_id = %id, kind = kind.as_str(), source, "session opened");
        session
    }

    /// Attach an outbound stream. `connection` is the admission slot
    /// released when the session closes or the stream is replaced.
    pub fn attach_stream(
        self: &Arc<Self>,
        session: &Arc<Session>,
        connection: Option<Connection>,
    ) -> Option<SessionStream> {
        self.attach_reply_stream(session, connection).map(|(stream, _)| stream)
    }

    /// [`attach_stream`](Self::attach_stream), plus a sender that feeds this
    /// stream only. Frames sent on it still arrive after a newer stream has
    /// taken over the session; the stream ends once the sender is dropped.
    pub fn attach_reply_stream(
        self: &Arc<Self>,
        session: &Arc<Session>,
        connection: Option<Connection>,
    ) -> Option<(SessionStream, mpsc::Sender<Frame>)> {
        if let Some(connection) = &connection {
            let manager = Arc::downgrade(self);
            let owner = Arc::downgrade(session);
            connection.on_close(move || {
                if let (Some(manager), Some(session)) = (manager.upgrade(), owner.upgrade()) {
                    manager.release_stream(&session);
                }
            });
        }
        let capacity = self.settings.read().channel_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let generation = session.attach(tx.clone(), connection)?;
        let stream = SessionStream::new(
            rx,
            StreamGuard {
                manager: Arc::downgrade(self),
                session: Arc::clone(session),
                generation,
            },
        );
        Some((stream, tx))
    }

    /// Called when a stream's writer went away.
    pub(crate) fn detach(&self, session: &Arc<Session>, generation: u64) {
        let current = self
            .get(session.id())
            .is_some_and(|live| Arc::ptr_eq(&live, session));
        if current && session.stream_generation() == Some(generation) {
            let _ = self.close(session.id(), "client disconnected");
        }
    }

    /// Admission cleanup: a live session whose slot was released and that
    /// has no other stream attached is closed.
    pub(crate) fn release_stream(&self, session: &Arc<Session>) {
        let current = self
            .get(session.id())
            .is_some_and(|live| Arc::ptr_eq(&live, session));
        if current && !session.has_stream() {
            let _ = self.close(session.id(), "connection released");
        }
    }

    /// Live session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).filter(|s| !s.is_closed()).cloned()
    }

    /// Record activity. `false` if the session is gone.
    pub fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Push a frame to a session, if it still exists. A writer that has
    /// gone away closes the session.
    pub fn send(&self, id: &str, frame: Frame) -> bool {
        let Some(session) = self.get(id) else {
            debug!(session_id = %id, "send to missing session");
            return false;
        };
        if session.enqueue(frame) {
            return true;
        }
        if session.writer_closed() {
            warn!(session_id = %id, "session writer gone, closing session");
            let _ = self.close(id, "write failed");
        }
        false
    }

    /// Remove and close a session. `false` if it was not live.
    pub fn close(&self, id: &str, reason: &'static str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(id);
            #[allow(clippy::cast_precision_loss)]
            gauge!(SESSIONS_ACTIVE).set(sessions.len() as f64);
            removed
        };
        removed.is_some_and(|session| session.close(reason))
    }

    /// Close every session.
    pub fn close_all(&self, reason: &'static str) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write();
            gauge!(SESSIONS_ACTIVE).set(0.0);
            sessions.drain().map(|(_, s)| s).collect()
        };
        drained.iter().filter(|s| s.close(reason)).count()
    }

    /// Live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Live session ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// One idle pass: close sessions past the idle budget or with a dead
    /// writer, warn sessions past the warning threshold.
    pub fn sweep(&self) -> SweepReport {
        let settings = self.settings();
        let idle_timeout = settings.idle_timeout();
        let warning_after = settings.warning_after();
        let dead_after = settings.dead_after();
        let now = Instant::now();
        let mut report = SweepReport::default();

        for session in self.snapshot() {
            let idle = session.idle_for(now);
            let dead = session.heartbeat_age(now).is_some_and(|age| age > dead_after);

            if idle >= idle_timeout || dead {
                let reason = if dead { "heartbeat timeout" } else { "idle timeout" };
                if self.close(session.id(), reason) {
                    report.closed.push(session.id().to_owned());
                }
                continue;
            }

            if idle >= warning_after && session.mark_warned() {
                let expires_in = u64::try_from(idle_timeout.saturating_sub(idle).as_millis()).unwrap_or(u64::MAX);
                let delivered = session.enqueue(Frame::event(
                    WARNING_EVENT,
                    json!({
                        "type": "expiring_soon",
                        "expiresIn": expires_in,
                        "sessionId": session.id(),
                    }),
                ));
                counter!(SESSION_WARNINGS_TOTAL).increment(1);
                debug!(session_id = %session.id(), expires_in_ms = expires_in, delivered, "session idle warning");
                report.warned.push(session.id().to_owned());
            }
        }

        if !report.closed.is_empty() {
            info!(closed = report.closed.len(), remaining = self.count(), "session sweep");
        }
        report
    }

    /// Ping every streaming session. Writers that cannot take the ping are
    /// closed immediately. Returns the pings sent.
    pub fn heartbeat(&self) -> usize {
        let mut sent = 0;
        for session in self.snapshot() {
            match session.heartbeat() {
                HeartbeatOutcome::Sent => sent += 1,
                HeartbeatOutcome::Detached => {}
                HeartbeatOutcome::Failed => {
                    warn!(session_id = %session.id(), "heartbeat enqueue failed, closing session");
                    let _ = self.close(session.id(), "write failed");
                }
            }
        }
        sent
    }

    /// Stop timers and close every session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let timers = std::mem::take(&mut *self.timers.lock());
        drop(timers);
        let closed = self.close_all("shutdown");
        info!(closed, "session manager stopped");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.count())
            .finish_non_exhaustive()
    }
}
