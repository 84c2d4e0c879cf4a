//! Transport adapters.
//!
//! [`TransportAdapter`] is the one interface the registry talks to. A
//! concrete adapter only has to move JSON-RPC requests ([`request`]) and
//! release its connection ([`close`]); the catalog operations are provided
//! on top of that and decode results leniently.
//!
//! Resource and prompt operations are optional capabilities: an upstream
//! answering "method not found" yields [`UpstreamError::Unsupported`].
//!
//! [`request`]: TransportAdapter::request
//! [`close`]: TransportAdapter::close

pub mod decode;
pub mod http;
pub mod stdio;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use switchyard_core::catalog::{PromptItem, ResourceItem, ToolItem, list_items};
use switchyard_core::constants::{CLIENT_NAME_PREFIX, PROTOCOL_VERSION};
use switchyard_core::ToolCallResult;

use crate::errors::Result;

pub use http::HttpAdapter;
pub use stdio::StdioAdapter;

/// Uniform access to one upstream connection.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Transport tag (`stdio`, `http`, `sse`, `ws`).
    fn transport(&self) -> &'static str;

    /// Send one JSON-RPC request and return its `result`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// Release the connection. Idempotent.
    async fn close(&self);

    /// Token cancelled when the connection drops on its own (process exit,
    /// broken pipe). Connectionless transports return `None`.
    fn disconnected(&self) -> Option<CancellationToken> {
        None
    }

    /// `tools/list`.
    async fn list_tools(&self) -> Result<Vec<ToolItem>> {
        let result = self.request("tools/list", Some(json!({}))).await?;
        Ok(list_items(&result, "tools"))
    }

    /// `tools/call`.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolCallResult> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        Ok(ToolCallResult::from_value(result))
    }

    /// `resources/list`.
    async fn list_resources(&self) -> Result<Vec<ResourceItem>> {
        let result = self
            .request("resources/list", Some(json!({})))
            .await
            .map_err(|e| e.unsupported_if_missing("resources"))?;
        Ok(list_items(&result, "resources"))
    }

    /// `resources/read`. The result (`{contents: [...]}`) is passed through.
    async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
            .map_err(|e| e.unsupported_if_missing("resources"))
    }

    /// `prompts/list`.
    async fn list_prompts(&self) -> Result<Vec<PromptItem>> {
        let result = self
            .request("prompts/list", Some(json!({})))
            .await
            .map_err(|e| e.unsupported_if_missing("prompts"))?;
        Ok(list_items(&result, "prompts"))
    }

    /// `prompts/get`. The result (`{description?, messages}`) is passed through.
    async fn get_prompt(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        self.request(
            "prompts/get",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
        .map_err(|e| e.unsupported_if_missing("prompts"))
    }
}

/// Parameters of the `initialize` handshake sent to an upstream.
pub fn initialize_params(upstream: &str, version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": format!("{CLIENT_NAME_PREFIX}-{upstream}"),
            "version": version,
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory adapter for registry and handler tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::errors::UpstreamError;

    /// Replies from a method table; counts calls.
    #[derive(Default)]
    pub struct ScriptedAdapter {
        pub replies: Mutex<HashMap<String, std::result::Result<Value, (i64, String)>>>,
        pub calls: Mutex<Vec<(String, Option<Value>)>>,
        pub closed: AtomicBool,
        pub hang: AtomicBool,
        pub call_count: AtomicUsize,
    }

    impl ScriptedAdapter {
        pub fn with_tools(names: &[&str]) -> Self {
            let tools: Vec<Value> = names
                .iter()
                .map(|n| json!({"name": n, "inputSchema": {"type": "object", "properties": {}}}))
                .collect();
            let adapter = Self::default();
            adapter.reply("tools/list", json!({ "tools": tools }));
            adapter
        }

        pub fn reply(&self, method: &str, result: Value) {
            let _ = self.replies.lock().insert(method.to_owned(), Ok(result));
        }

        pub fn fail(&self, method: &str, code: i64, message: &str) {
            let _ = self
                .replies
                .lock()
                .insert(method.to_owned(), Err((code, message.to_owned())));
        }

        pub fn count(&self, method: &str) -> usize {
            self.calls.lock().iter().filter(|(m, _)| m == method).count()
        }
    }

    #[async_trait]
    impl TransportAdapter for ScriptedAdapter {
        fn transport(&self) -> &'static str {
            "mock"
        }

        async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
            let _ = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().push((method.to_owned(), params));
            if self.closed.load(Ordering::SeqCst) {
                return Err(UpstreamError::Closed);
            }
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let reply = self.replies.lock().get(method).cloned();
            match reply {
                Some(Ok(v)) => Ok(v),
                Some(Err((code, message))) => Err(UpstreamError::Remote { code, message }),
                None => Err(UpstreamError::Remote {
                    code: switchyard_core::jsonrpc::METHOD_NOT_FOUND,
                    message: "Method not found".into(),
                }),
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
