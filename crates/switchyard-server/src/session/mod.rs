//! Streaming sessions: SSE, streamable HTTP and WebSocket clients.
//!
//! A [`Session`] is the server-side record of one client. It may carry an
//! outbound stream (a bounded frame channel drained by the HTTP or
//! WebSocket writer). The [`SessionManager`] owns the session map and its
//! two timer families: the idle sweep and the heartbeat.

pub mod manager;
pub mod stream;

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::response::sse::Event;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::Connection;
use crate::metrics::{SESSION_DURATION_SECONDS, SESSION_FRAMES_DROPPED_TOTAL, SESSIONS_CLOSED_TOTAL};

pub use manager::{SessionManager, SweepReport};
pub use stream::SessionStream;

/// Name of the idle warning event.
pub const WARNING_EVENT: &str = "session_warning";
/// Name of the event carrying JSON-RPC responses.
pub const MESSAGE_EVENT: &str = "message";
/// Name of the first event on every stream.
pub const SESSION_EVENT: &str = "session";

/// One outbound item on a session stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A named event with a JSON payload.
    Event {
        /// Event name.
        name: String,
        /// Payload.
        data: Value,
    },
    /// Keep-alive.
    Ping,
}

impl Frame {
    /// A named event.
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::Event {
            name: name.into(),
            data,
        }
    }

    /// A JSON-RPC response pushed as a `message` event.
    pub fn message(data: Value) -> Self {
        Self::event(MESSAGE_EVENT, data)
    }

    /// SSE rendering: `event: <name>\ndata: <json>\n\n`, pings as the
    /// `: ping` comment.
    pub fn into_sse_event(self) -> Result<Event, Infallible> {
        Ok(match self {
            Self::Event { name, data } => Event::default().event(name).data(data.to_string()),
            Self::Ping => Event::default().comment("ping"),
        })
    }
}

/// How the client talks to us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    /// `GET /mcp/sse` or `GET /mcp`.
    Sse,
    /// `POST /mcp` without a stream.
    Http,
    /// `POST /mcp` upgraded to an SSE response.
    Streamable,
    /// `GET /mcp/ws`.
    WebSocket,
}

impl SessionKind {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Http => "http",
            Self::Streamable => "streamable",
            Self::WebSocket => "websocket",
        }
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Seen recently.
    Active,
    /// Idle past the warning threshold; the warning was sent.
    Warning,
    /// Closed; no further frames.
    Closed,
}

/// Outcome of a heartbeat attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Ping enqueued.
    Sent,
    /// No stream attached; nothing to do.
    Detached,
    /// The writer is gone or not keeping up.
    Failed,
}

struct Slot {
    tx: mpsc::Sender<Frame>,
    generation: u64,
    connection: Option<Connection>,
}

struct State {
    last_seen: Instant,
    last_heartbeat: Instant,
    warned: bool,
    slot: Option<Slot>,
    generation: u64,
}

/// One client session.
pub struct Session {
    id: String,
    kind: SessionKind,
    source: String,
    opened_at: Instant,
    state: Mutex<State>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: String, kind: SessionKind, source: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind,
            source,
            opened_at: now,
            state: Mutex::new(State {
                last_seen: now,
                last_heartbeat: now,
                warned: false,
                slot: None,
                generation: 0,
            }),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Kind at open.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Remote source address.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else if self.state.lock().warned {
            SessionState::Warning
        } else {
            SessionState::Active
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Cancelled when the session closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Record activity; clears a pending warning.
    pub fn touch(&self) {
        let mut state = self.state.lock();
        state.last_seen = Instant::now();
        state.warned = false;
    }

    /// Record a WebSocket pong.
    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.last_heartbeat = now;
        state.last_seen = now;
    }

    /// Time since the last activity.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_seen)
    }

    /// Time since the last successful heartbeat; `None` without a stream.
    pub fn heartbeat_age(&self, now: Instant) -> Option<Duration> {
        let state = self.state.lock();
        state
            .slot
            .as_ref()
            .map(|_| now.saturating_duration_since(state.last_heartbeat))
    }

    /// Whether an outbound stream is attached.
    pub fn has_stream(&self) -> bool {
        self.state.lock().slot.is_some()
    }

    /// Attach a new outbound channel, replacing (and ending) any previous
    /// one. Returns the stream generation.
    pub(crate) fn attach(&self, tx: mpsc::Sender<Frame>, connection: Option<Connection>) -> Option<u64> {
        if self.is_closed() {
            return None;
        }
        let (generation, previous) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.last_heartbeat = Instant::now();
            let generation = state.generation;
            let previous = state.slot.replace(Slot {
                tx,
                generation,
                connection,
            });
            (generation, previous)
        };
        if previous.is_some() {
            debug!(session_id = %self.id, generation, "stream replaced");
        }
        drop(previous);
        Some(generation)
    }

    pub(crate) fn stream_generation(&self) -> Option<u64> {
        self.state.lock().slot.as_ref().map(|s| s.generation)
    }

    /// Enqueue a frame. `false` when there is no stream or the writer
    /// cannot take it; a full buffer drops the frame.
    pub fn enqueue(&self, frame: Frame) -> bool {
        let state = self.state.lock();
        let Some(slot) = &state.slot else {
            return false;
        };
        match slot.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!(SESSION_FRAMES_DROPPED_TOTAL).increment(1);
                debug!(session_id = %self.id, "session buffer full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the attached writer has gone away.
    pub fn writer_closed(&self) -> bool {
        self.state.lock().slot.as_ref().is_some_and(|s| s.tx.is_closed())
    }

    /// Enqueue a keep-alive ping.
    pub(crate) fn heartbeat(&self) -> HeartbeatOutcome {
        let mut state = self.state.lock();
        let Some(slot) = &state.slot else {
            return HeartbeatOutcome::Detached;
        };
        if slot.tx.try_send(Frame::Ping).is_err() {
            return HeartbeatOutcome::Failed;
        }
        // WebSocket liveness comes from pongs, not from the local buffer.
        if self.kind != SessionKind::WebSocket {
            state.last_heartbeat = Instant::now();
        }
        HeartbeatOutcome::Sent
    }

    /// Mark warned. Returns `false` if already warned since the last touch.
    pub(crate) fn mark_warned(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.warned, true)
    }

    /// Close the session: end the stream, release the admission slot and
    /// cancel [`closed_token`](Self::closed_token). Runs once; later calls
    /// return `false`.
    pub fn close(&self, reason: &'static str) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let slot = self.state.lock().slot.take();
        drop(slot);
        self.closed.cancel();

        let lifetime = self.opened_at.elapsed();
        counter!(SESSIONS_CLOSED_TOTAL, "reason" => reason).increment(1);
        histogram!(SESSION_DURATION_SECONDS).record(lifetime.as_secs_f64());
        info!(
            session_id = %self.id,
            kind = self.kind.as_str(),
            reason,
            lifetime_secs = lifetime.as_secs(),
            "session closed"
        );
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
