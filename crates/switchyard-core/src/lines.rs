//! Line framing for NDJSON, SSE and subprocess pipes.
//!
//! [`byte_lines`] frames any reader into `\n`-delimited byte lines with
//! tokio-util's [`AnyDelimiterCodec`]; a final unterminated line is yielded
//! at end of input. Lines stay bytes so a caller chooses between strict
//! ([`utf8_line`]) and lossy ([`lossy_line`]) decoding. [`SseDecoder`] folds
//! lines into events, dispatching on the blank line that terminates each
//! block.

use std::borrow::Cow;
use std::str::Utf8Error;

use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};

/// Byte lines from `reader`, without the `\n`.
pub fn byte_lines<R: AsyncRead>(reader: R) -> FramedRead<R, AnyDelimiterCodec> {
    FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec()))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// The line as UTF-8, trailing `\r` removed.
pub fn utf8_line(line: &[u8]) -> Result<&str, Utf8Error> {
    std::str::from_utf8(strip_cr(line))
}

/// The line with invalid UTF-8 replaced, trailing `\r` removed.
pub fn lossy_line(line: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(strip_cr(line))
}

/// One decoded SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the block has no `event:` field.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Folds SSE lines into events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Fresh decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns an event when `line` terminates a block that
    /// carried data.
    pub fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    /// Flush a pending block at end of input.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_owned()),
            data,
        })
    }
}
