//! Admission control for stream-opening connections.
//!
//! Connections are indexed by id and by source address. A [`Connection`]
//! ticket releases its slot exactly once: on [`Connection::close`] or when
//! dropped. Release removes the id from both indexes, then runs the cleanup
//! registered with [`Connection::on_close`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use switchyard_settings::AdmissionSettings;

use crate::metrics::{ADMISSION_REJECTIONS_TOTAL, CONNECTIONS_ACTIVE};

type Cleanup = Box<dyn FnOnce() + Send>;

/// Which cap refused a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectScope {
    /// The global cap.
    Global,
    /// The per-source cap.
    Source,
}

/// Why a connection was not admitted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("connection limit reached ({current}/{max}, {scope:?})")]
pub struct Rejection {
    /// Cap that was hit.
    pub scope: RejectScope,
    /// Connections counted against that cap.
    pub current: usize,
    /// The cap.
    pub max: usize,
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, Entry>,
    by_source: HashMap<String, HashSet<String>>,
}

struct Entry {
    source: String,
    cleanup: Option<Cleanup>,
}

struct Inner {
    limits: Mutex<AdmissionSettings>,
    indexes: Mutex<Indexes>,
}

impl Inner {
    fn release(&self, id: &str) {
        let cleanup = {
            let mut indexes = self.indexes.lock();
            let Some(entry) = indexes.by_id.remove(id) else {
                return;
            };
            if let Some(ids) = indexes.by_source.get_mut(&entry.source) {
                let _ = ids.remove(id);
                if ids.is_empty() {
                    let _ = indexes.by_source.remove(&entry.source);
                }
            }
            #[allow(clippy::cast_precision_loss)]
            gauge!(CONNECTIONS_ACTIVE).set(indexes.by_id.len() as f64);
            entry.cleanup
        };
        debug!(connection_id = %id, "connection released");
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Global and per-source connection caps.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// Controller enforcing `limits`.
    pub fn new(limits: AdmissionSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                limits: Mutex::new(limits),
                indexes: Mutex::new(Indexes::default()),
            }),
        }
    }

    /// Replace the caps. Existing connections are kept.
    pub fn set_limits(&self, limits: AdmissionSettings) {
        *self.inner.limits.lock() = limits;
    }

    /// Current caps.
    pub fn limits(&self) -> AdmissionSettings {
        self.inner.limits.lock().clone()
    }

    /// Admit one connection from `source`.
    pub fn admit(&self, source: &str) -> Result<Connection, Rejection> {
        let limits = self.limits();
        let mut indexes = self.inner.indexes.lock();

        let total = indexes.by_id.len();
        let from_source = indexes.by_source.get(source).map_or(0, HashSet::len);
        let rejection = if total >= limits.max_connections {
            Some(Rejection {
                scope: RejectScope::Global,
                current: total,
                max: limits.max_connections,
            })
        } else if from_source >= limits.max_per_source {
            Some(Rejection {
                scope: RejectScope::Source,
                current: from_source,
                max: limits.max_per_source,
            })
        } else {
            None
        };
        if let Some(rejection) = rejection {
            warn!(
                source,
                scope = ?rejection.scope,
                current = rejection.current,
                max = rejection.max,
                total,
                "connection rejected"
            );
            let scope = match rejection.scope {
                RejectScope::Global => "global",
                RejectScope::Source => "source",
            };
            counter!(ADMISSION_REJECTIONS_TOTAL, "scope" => scope).increment(1);
            return Err(rejection);
        }

        let id = Uuid::now_v7().to_string();
        let _ = indexes.by_id.insert(
            id.clone(),
            Entry {
                source: source.to_owned(),
                cleanup: None,
            },
        );
        let _ = indexes
            .by_source
            .entry(source.to_owned())
            .or_default()
            .insert(id.clone());
        #[allow(clippy::cast_precision_loss)]
        gauge!(CONNECTIONS_ACTIVE).set(indexes.by_id.len() as f64);
        debug!(connection_id = %id, source, total = total + 1, "connection admitted");

        Ok(Connection {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Admitted connections.
    pub fn count(&self) -> usize {
        self.inner.indexes.lock().by_id.len()
    }

    /// Admitted connections from `source`.
    pub fn count_for(&self, source: &str) -> usize {
        self.inner
            .indexes
            .lock()
            .by_source
            .get(source)
            .map_or(0, HashSet::len)
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limits", &self.limits())
            .field("connections", &self.count())
            .finish()
    }
}

/// An admitted connection's slot.
pub struct Connection {
    id: String,
    inner: Arc<Inner>,
}

impl Connection {
    /// Connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the cleanup run when this slot is released. Replaces any
    /// earlier callback.
    pub fn on_close(&self, cleanup: impl FnOnce() + Send + 'static) {
        if let Some(entry) = self.inner.indexes.lock().by_id.get_mut(&self.id) {
            entry.cleanup = Some(Box::new(cleanup));
        }
    }

    /// Release the slot now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.release(&self.id);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}
