//! HTTP RPC client adapter (`http`, `sse` and `ws` transports).
//!
//! Every request is a POST of one JSON-RPC envelope. The reply may be plain
//! JSON, NDJSON or an SSE stream (see [`super::decode`]). A session id
//! issued by the server in `mcp-session-id` is echoed on later requests.
//! The `initialize` handshake runs lazily, exactly once, before the first
//! real request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use switchyard_core::constants::SESSION_HEADER;
use switchyard_core::{JsonRpcRequest, JsonRpcResponse};
use switchyard_settings::{RemoteTransport, UpstreamAuth, UpstreamConfig};

use super::TransportAdapter;
use super::decode::{BodyFormat, first_ndjson_value, first_sse_message, json_body};
use super::initialize_params;
use crate::errors::{Result, UpstreamError};

/// Longest error body kept in [`UpstreamError::HttpStatus`].
const MAX_ERROR_BODY: usize = 512;

/// Adapter for remote upstreams.
pub struct HttpAdapter {
    name: String,
    transport: &'static str,
    client: Client,
    url: Url,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    handshake: OnceCell<()>,
    next_id: AtomicU64,
    call_timeout: Duration,
    client_version: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for HttpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpAdapter {
    /// Build an adapter for a remote upstream. No network traffic happens
    /// until the first request.
    pub fn new(upstream: &UpstreamConfig, client_version: &str) -> Result<Self> {
        let remote = upstream.transport.remote().ok_or_else(|| {
            UpstreamError::InvalidConfig(format!("upstream `{}` is not a remote transport", upstream.name))
        })?;

        let url = endpoint_url(remote)?;
        let headers = build_headers(&upstream.name, remote)?;
        let client = Client::builder()
            .connect_timeout(upstream.limits.connect_timeout())
            .build()?;

        Ok(Self {
            name: upstream.name.clone(),
            transport: upstream.transport.kind(),
            client,
            url,
            headers,
            session_id: Mutex::new(None),
            handshake: OnceCell::new(),
            next_id: AtomicU64::new(1),
            call_timeout: upstream.limits.call_timeout(),
            client_version: client_version.to_owned(),
            closed: AtomicBool::new(false),
        })
    }

    /// Endpoint the adapter posts to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Session id issued by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.handshake
            .get_or_try_init(|| async {
                let params = initialize_params(&self.name, &self.client_version);
                let result = self.rpc("initialize", Some(params)).await?;
                debug!(
                    upstream = %self.name,
                    server = ?result.get("serverInfo"),
                    "upstream initialized"
                );
                self.notify("notifications/initialized").await?;
                Ok::<(), UpstreamError>(())
            })
            .await
            .map(|_| ())
    }

    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let reply = tokio::time::timeout(self.call_timeout, self.post(&body, true))
            .await
            .map_err(|_| UpstreamError::timeout(method, self.call_timeout))??
            .ok_or_else(|| UpstreamError::Decode(format!("no response body for `{method}`")))?;

        let response: JsonRpcResponse =
            serde_json::from_value(reply).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        response.into_result().map_err(|e| UpstreamError::Remote {
            code: e.code,
            message: e.message,
        })
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let body = serde_json::to_value(JsonRpcRequest::notification(method, None))
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        let _ = self.post(&body, false).await?;
        Ok(())
    }

    /// POST one envelope. `Ok(None)` when no reply body is expected.
    async fn post(&self, body: &Value, expect_reply: bool) -> Result<Option<Value>> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        let session = self.session_id.lock().clone();
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(issued) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(issued.to_owned());
        }

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut text, MAX_ERROR_BODY);
            return Err(UpstreamError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        if !expect_reply || status == StatusCode::ACCEPTED {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let value = match BodyFormat::from_content_type(&content_type) {
            Some(BodyFormat::Json) => json_body(&response.bytes().await?)?,
            Some(BodyFormat::Ndjson) => first_ndjson_value(response.bytes_stream()).await?,
            Some(BodyFormat::EventStream) => first_sse_message(response.bytes_stream()).await?,
            None => return Err(UpstreamError::ContentType(content_type)),
        };
        Ok(Some(value))
    }
}

#[async_trait]
impl TransportAdapter for HttpAdapter {
    fn transport(&self) -> &'static str {
        self.transport
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::Closed);
        }
        self.ensure_initialized().await?;
        self.rpc(method, params).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(upstream = %self.name, "http adapter closed");
        }
    }
}

/// Parse the endpoint, enforce the host whitelist and map `ws`/`wss` onto
/// their HTTP equivalents.
fn endpoint_url(remote: &RemoteTransport) -> Result<Url> {
    let mut url = Url::parse(&remote.url)
        .map_err(|e| UpstreamError::InvalidConfig(format!("invalid url `{}`: {e}", remote.url)))?;

    if let Some(whitelist) = remote.whitelist.as_ref().filter(|w| !w.allowed_hosts.is_empty()) {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !whitelist.allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            return Err(UpstreamError::HostNotAllowed(host));
        }
    }

    let scheme = match url.scheme() {
        "ws" => Some("http"),
        "wss" => Some("https"),
        "http" | "https" => None,
        other => {
            return Err(UpstreamError::InvalidConfig(format!("unsupported url scheme `{other}`")));
        }
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|()| UpstreamError::InvalidConfig(format!("cannot rewrite scheme of `{}`", remote.url)))?;
    }
    Ok(url)
}

fn build_headers(upstream: &str, remote: &RemoteTransport) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &remote.headers {
        insert_header(&mut headers, name, value)?;
    }

    match &remote.auth {
        Some(UpstreamAuth::Bearer { token }) => {
            insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
        }
        Some(UpstreamAuth::Basic { username, password }) => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            insert_header(&mut headers, AUTHORIZATION.as_str(), &format!("Basic {encoded}"))?;
        }
        Some(UpstreamAuth::Header { header_name, value }) => {
            insert_header(&mut headers, header_name, value)?;
        }
        Some(UpstreamAuth::Mtls { .. }) => {
            warn!(upstream, "mtls auth is not supported by the HTTP client; continuing without it");
        }
        None => {}
    }
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| UpstreamError::InvalidConfig(format!("invalid header name `{name}`: {e}")))?;
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| UpstreamError::InvalidConfig(format!("invalid value for header `{name}`: {e}")))?;
    value.set_sensitive(name == AUTHORIZATION);
    let _ = headers.insert(name, value);
    Ok(())
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use switchyard_settings::{HostWhitelist, TransportConfig};

    fn remote(url: &str) -> RemoteTransport {
        RemoteTransport::new(url)
    }

    #[test]
    fn ws_urls_are_rewritten() {
        assert_eq!(endpoint_url(&remote("ws://h:1/mcp")).unwrap().as_str(), "http://h:1/mcp");
        assert_eq!(endpoint_url(&remote("wss://h/mcp")).unwrap().scheme(), "https");
        assert_matches!(endpoint_url(&remote("ftp://h/")), Err(UpstreamError::InvalidConfig(_)));
    }

    #[test]
    fn whitelist_rejects_other_hosts() {
        let mut r = remote("http://evil.example/mcp");
        r.whitelist = Some(HostWhitelist { allowed_hosts: vec!["api.example".into()] });
        assert_matches!(endpoint_url(&r), Err(UpstreamError::HostNotAllowed(h)) if h == "evil.example");
        r.url = "http://API.example/mcp".into();
        assert!(endpoint_url(&r).is_ok());
    }

    #[test]
    fn auth_headers() {
        let mut r = remote("http://h/");
        r.auth = Some(UpstreamAuth::Basic { username: "u".into(), password: "p".into() });
        let h = build_headers("x", &r).unwrap();
        assert_eq!(h[AUTHORIZATION], "Basic dTpw");

        r.auth = Some(UpstreamAuth::Header { header_name: "X-Api-Key".into(), value: "k".into() });
        let h = build_headers("x", &r).unwrap();
        assert_eq!(h["x-api-key"], "k");

        r.auth = Some(UpstreamAuth::Mtls { cert: None, key: None });
        assert!(build_headers("x", &r).unwrap().is_empty());
    }

    #[test]
    fn stdio_config_is_rejected() {
        let cfg = UpstreamConfig::stdio("local", "server");
        assert!(matches!(cfg.transport, TransportConfig::Stdio(_)));
        assert_matches!(HttpAdapter::new(&cfg, "0"), Err(UpstreamError::InvalidConfig(_)));
    }

    #[test]
    fn truncation_respects_utf8() {
        let mut s = "é".repeat(10);
        truncate_at_char_boundary(&mut s, 5);
        assert_eq!(s, "éé");
    }
}
