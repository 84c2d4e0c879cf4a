//! Subprocess adapter speaking line-delimited JSON-RPC over stdin/stdout.
//!
//! A reader task owns stdout. Responses are routed to the waiting caller by
//! id; `ping` requests from the child are answered with `{}` and any other
//! child-initiated request gets "method not found". Stderr is forwarded to
//! the debug log. Stdout lines that are not UTF-8 are logged and skipped. When stdout closes, every pending call fails with
//! [`UpstreamError::Closed`] and [`TransportAdapter::disconnected`] fires.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use switchyard_core::jsonrpc::{JSONRPC_VERSION, METHOD_NOT_FOUND};
use switchyard_core::lines::{byte_lines, lossy_line, utf8_line};
use switchyard_core::{JsonRpcRequest, JsonRpcResponse};
use switchyard_settings::{StdioTransport, UpstreamConfig};

use super::{TransportAdapter, initialize_params};
use crate::errors::{Result, UpstreamError};

type Pending = Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>;

struct Shared {
    name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    closed: CancellationToken,
}

impl Shared {
    async fn write_line(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(message).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(upstream = %self.name, count = drained.len(), "failing pending calls");
        }
    }
}

/// Adapter for a local subprocess upstream.
pub struct StdioAdapter {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl std::fmt::Debug for StdioAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioAdapter")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl StdioAdapter {
    /// Spawn the subprocess and complete the `initialize` handshake within
    /// the upstream's connect timeout.
    pub async fn connect(upstream: &UpstreamConfig, client_version: &str) -> Result<Self> {
        let switchyard_settings::TransportConfig::Stdio(spec) = &upstream.transport else {
            return Err(UpstreamError::InvalidConfig(format!(
                "upstream `{}` is not a stdio transport",
                upstream.name
            )));
        };

        let adapter = Self::spawn(&upstream.name, spec, upstream.limits.call_timeout())?;
        let connect_timeout = upstream.limits.connect_timeout();
        let handshake = async {
            let params = initialize_params(&upstream.name, client_version);
            let _ = adapter.call("initialize", Some(params)).await?;
            adapter
                .shared
                .write_line(&json!({ "jsonrpc": JSONRPC_VERSION, "method": "notifications/initialized" }))
                .await
        };

        let outcome = tokio::time::timeout(connect_timeout, handshake).await;
        match outcome {
            Ok(Ok(())) => Ok(adapter),
            Ok(Err(e)) => {
                adapter.close().await;
                Err(e)
            }
            Err(_) => {
                adapter.close().await;
                Err(UpstreamError::timeout("initialize", connect_timeout))
            }
        }
    }

    fn spawn(name: &str, spec: &StdioTransport, call_timeout: Duration) -> Result<Self> {
        let mut command = Command::new(&spec.command);
        let _ = command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            let _ = command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| UpstreamError::Spawn {
            command: spec.command.clone(),
            source,
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(UpstreamError::Closed);
        };

        if let Some(stderr) = child.stderr.take() {
            let upstream = name.to_owned();
            drop(tokio::spawn(async move {
                let mut lines = byte_lines(stderr);
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => debug!(upstream = %upstream, stderr = %lossy_line(&line), "upstream stderr"),
                        Err(e) => {
                            debug!(upstream = %upstream, error = %e, "upstream stderr read failed");
                            break;
                        }
                    }
                }
            }));
        }

        let shared = Arc::new(Shared {
            name: name.to_owned(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });
        drop(tokio::spawn(read_loop(Arc::clone(&shared), stdout)));
        debug!(upstream = %name, command = %spec.command, "spawned stdio upstream");

        Ok(Self {
            shared,
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            call_timeout,
        })
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.shared.closed.is_cancelled() {
            return Err(UpstreamError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.pending.lock().insert(id, tx);

        let message = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        if let Err(e) = self.shared.write_line(&message).await {
            let _ = self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(UpstreamError::Closed),
            Err(_) => {
                let _ = self.shared.pending.lock().remove(&id);
                return Err(UpstreamError::timeout(method, self.call_timeout));
            }
        };
        response.into_result().map_err(|e| UpstreamError::Remote {
            code: e.code,
            message: e.message,
        })
    }
}

#[async_trait]
impl TransportAdapter for StdioAdapter {
    fn transport(&self) -> &'static str {
        "stdio"
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call(method, params).await
    }

    async fn close(&self) {
        self.shared.closed.cancel();
        self.shared.fail_pending();
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!(upstream = %self.shared.name, error = %e, "kill failed (already exited?)");
            }
        }
    }

    fn disconnected(&self) -> Option<CancellationToken> {
        Some(self.shared.closed.clone())
    }
}

async fn read_loop(shared: Arc<Shared>, stdout: ChildStdout) {
    let mut lines = byte_lines(stdout);
    loop {
        let line = tokio::select! {
            () = shared.closed.cancelled() => break,
            line = lines.next() => line,
        };
        match line {
            Some(Ok(line)) => match utf8_line(&line) {
                Ok(text) => handle_line(&shared, text).await,
                Err(e) => warn!(upstream = %shared.name, error = %e, "skipping non-UTF-8 line from upstream"),
            },
            None => {
                debug!(upstream = %shared.name, "upstream stdout closed");
                break;
            }
            Some(Err(e)) => {
                warn!(upstream = %shared.name, error = %e, "upstream stdout read failed");
                break;
            }
        }
    }
    shared.closed.cancel();
    shared.fail_pending();
}

async fn handle_line(shared: &Shared, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(upstream = %shared.name, error = %e, "ignoring malformed line from upstream");
            return;
        }
    };

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        match message.get("id") {
            Some(id) => {
                let reply = if method == "ping" {
                    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
                } else {
                    json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": { "code": METHOD_NOT_FOUND, "message": format!("Method not found: {method}") }
                    })
                };
                if let Err(e) = shared.write_line(&reply).await {
                    warn!(upstream = %shared.name, error = %e, "failed to answer upstream request");
                }
            }
            None => trace!(upstream = %shared.name, method, "upstream notification"),
        }
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_value(message) {
        Ok(r) => r,
        Err(e) => {
            warn!(upstream = %shared.name, error = %e, "ignoring unreadable response");
            return;
        }
    };
    let Some(id) = response.id.as_u64() else {
        warn!(upstream = %shared.name, id = %response.id, "response with unexpected id");
        return;
    };
    let waiter = shared.pending.lock().remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!(upstream = %shared.name, id, "response for unknown or expired request"),
    }
}
