//! Decoding of the line-oriented event stream.
//!
//! The stream server speaks a loose SSE dialect: each line is either
//! `data: <json>` or noise (heartbeats, blank keep-alive lines). Noise decodes
//! to [`StreamFrame::Empty`] and undecodable payloads to
//! [`StreamFrame::Malformed`]; neither aborts a read.

use std::io;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::transport::BodyStream;

/// Marker in front of an event payload.
pub const EVENT_PREFIX: &str = "data:";

/// Longest line [`FrameReader`] accepts, newline excluded.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// One decoded line of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Line carried a JSON payload.
    Event(Value),
    /// Line carried no event.
    Empty,
    /// Line had the event marker but its payload did not parse.
    Malformed,
}

impl StreamFrame {
    /// The payload, if this frame carries a non-empty one.
    ///
    /// `null`, `false`, `0`, `""`, `[]` and `{}` do not count as payloads.
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Event(value) if is_present(&value) => Some(value),
            _ => None,
        }
    }
}

/// Decode one raw line.
pub fn decode_line(raw: &[u8]) -> StreamFrame {
    let text = String::from_utf8_lossy(raw);
    let Some(start) = text.find(EVENT_PREFIX) else {
        return StreamFrame::Empty;
    };

    match serde_json::from_str(text[start + EVENT_PREFIX.len()..].trim()) {
        Ok(value) => StreamFrame::Event(value),
        Err(_) => StreamFrame::Malformed,
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Splits a response body into lines and decodes each one.
pub struct FrameReader {
    reader: StreamReader<BodyStream, Bytes>,
    line: Vec<u8>,
    lines_read: u64,
    max_line_bytes: usize,
}

impl FrameReader {
    /// Wrap a response body. Nothing is read until [`next_frame`](Self::next_frame).
    pub fn new(body: BodyStream) -> Self {
        Self {
            reader: StreamReader::new(body),
            line: Vec::new(),
            lines_read: 0,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Builder method to change the line length limit.
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Read and decode the next line. `None` at end of stream.
    ///
    /// A line longer than the limit fails with [`io::ErrorKind::InvalidData`];
    /// the stream is not usable after that.
    pub async fn next_frame(&mut self) -> io::Result<Option<StreamFrame>> {
        self.line.clear();
        let limit = self.max_line_bytes as u64 + 1;
        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if bytes_read as u64 == limit && !self.line.ends_with(b"\n") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream line exceeds {} bytes", self.max_line_bytes),
            ));
        }

        self.lines_read += 1;
        Ok(Some(decode_line(trim_line_ending(&self.line))))
    }

    /// Number of lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
