//! Response body decoding for the HTTP RPC client.
//!
//! Streamable HTTP servers may answer a POST with plain JSON, NDJSON or an
//! SSE stream. For the two streaming shapes only the first payload belongs
//! to the call: reading stops there and the rest of the body is dropped.

use std::fmt::Display;
use std::io;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::codec::AnyDelimiterCodecError;
use tokio_util::io::StreamReader;

use switchyard_core::lines::{SseDecoder, byte_lines, lossy_line};

use crate::errors::{Result, UpstreamError};

/// How a response body is framed, from its `Content-Type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFormat {
    /// `application/json` (or `+json`).
    Json,
    /// `application/x-ndjson`.
    Ndjson,
    /// `text/event-stream`.
    EventStream,
}

impl BodyFormat {
    /// Classify a `Content-Type` value. `None` for anything else.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/x-ndjson" | "application/ndjson" => Some(Self::Ndjson),
            "text/event-stream" => Some(Self::EventStream),
            "application/json" => Some(Self::Json),
            m if m.ends_with("+json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse a complete JSON body.
pub fn json_body(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| UpstreamError::Decode(format!("invalid JSON body: {e}")))
}

/// Byte lines of a response body stream.
fn body_lines<S, E>(stream: S) -> impl Stream<Item = std::result::Result<Bytes, AnyDelimiterCodecError>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let chunks = stream.map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string())));
    byte_lines(StreamReader::new(chunks))
}

/// Read until the first non-empty NDJSON line and parse it.
pub async fn first_ndjson_value<S, E>(stream: S) -> Result<Value>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let mut lines = std::pin::pin!(body_lines(stream));
    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| UpstreamError::Decode(format!("NDJSON body read failed: {e}")))?;
        let line = lossy_line(&line);
        if !line.trim().is_empty() {
            return parse_line(&line);
        }
    }
    Err(UpstreamError::Decode("empty NDJSON body".into()))
}

/// Read until the first `message` event and parse its data.
pub async fn first_sse_message<S, E>(stream: S) -> Result<Value>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let mut lines = std::pin::pin!(body_lines(stream));
    let mut events = SseDecoder::new();
    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| UpstreamError::Decode(format!("SSE body read failed: {e}")))?;
        if let Some(event) = events.feed(&lossy_line(&line)) {
            if event.event == "message" {
                return parse_line(&event.data);
            }
        }
    }
    match events.finish() {
        Some(event) if event.event == "message" => parse_line(&event.data),
        _ => Err(UpstreamError::Decode("SSE body ended without a message event".into())),
    }
}

fn parse_line(line: &str) -> Result<Value> {
    serde_json::from_str(line.trim()).map_err(|e| UpstreamError::Decode(format!("invalid JSON payload: {e}")))
}
