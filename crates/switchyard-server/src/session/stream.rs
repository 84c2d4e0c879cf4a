//! Receiving half of a session stream.

use std::convert::Infallible;
use std::sync::{Arc, Weak};

use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::mpsc;

use super::{Frame, Session, SessionManager};

/// Closes the session when the stream that owns it goes away, unless a
/// newer stream has replaced it.
pub(crate) struct StreamGuard {
    pub(crate) manager: Weak<SessionManager>,
    pub(crate) session: Arc<Session>,
    pub(crate) generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.detach(&self.session, self.generation);
        }
    }
}

/// Frames for one attached writer. Dropping it counts as a client abort.
pub struct SessionStream {
    rx: mpsc::Receiver<Frame>,
    guard: StreamGuard,
}

impl SessionStream {
    pub(crate) fn new(rx: mpsc::Receiver<Frame>, guard: StreamGuard) -> Self {
        Self { rx, guard }
    }

    /// The session this stream belongs to.
    pub fn session(&self) -> &Arc<Session> {
        &self.guard.session
    }

    /// Next frame; `None` once the session closed or the stream was
    /// replaced.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// SSE event stream for an axum `Sse` response.
    pub fn into_sse(self) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        let Self { mut rx, guard } = self;
        async_stream::stream! {
            let _guard = guard;
            while let Some(frame) = rx.recv().await {
                yield frame.into_sse_event();
            }
        }
    }
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream")
            .field("session_id", &self.guard.session.id())
            .field("generation", &self.guard.generation)
            .finish()
    }
}
