//! Line protocol decoder for the tool's output streams.
//!
//! stdout carries JSON log lines plus one `RESULT:` line; stderr carries free-form
//! diagnostics. Chunks are split on newlines and any trailing fragment is held until
//! the next chunk (or EOF) completes it. Nothing here ever fails: lines that cannot be
//! interpreted degrade to plain log entries.

use crate::model::{LogEntry, LogLevel, ResultPayload};
use bytes::{Buf, BytesMut};

pub const RESULT_PREFIX: &str = "RESULT:";

/// Which pipe a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Log(LogEntry),
    Result { payload: ResultPayload, raw: String },
    /// A `RESULT:` line whose payload was not valid JSON.
    Unparsable { raw: String },
}

#[derive(Debug, Default)]
pub struct LineDecoder {
    stdout: BytesMut,
    stderr: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&mut self, channel: Channel) -> &mut BytesMut {
        match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        }
    }

    /// Consume one chunk and return events for every line it completes.
    pub fn feed(&mut self, channel: Channel, chunk: &[u8]) -> Vec<DecodedEvent> {
        let buf = self.buffer(channel);
        // Bytes already held were scanned on an earlier call and hold no newline.
        let mut scanned = buf.len();
        buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = buf[scanned..].iter().position(|b| *b == b'\n') {
            let line = buf.split_to(scanned + offset);
            buf.advance(1);
            lines.push(line);
            scanned = 0;
        }

        lines
            .iter()
            .filter_map(|line| decode_line(channel, &String::from_utf8_lossy(line)))
            .collect()
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self, channel: Channel) -> Vec<DecodedEvent> {
        let rest = self.buffer(channel).split();
        decode_line(channel, &String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

/// Decode one complete line. Blank lines produce nothing.
///
/// Only the line ending and trailing whitespace are stripped; leading indentation is part
/// of the message.
pub fn decode_line(channel: Channel, line: &str) -> Option<DecodedEvent> {
    if line.trim().is_empty() {
        return None;
    }
    let line = line.trim_end();

    if channel == Channel::Stderr {
        return Some(DecodedEvent::Log(LogEntry::error(line)));
    }

    if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
        return Some(match serde_json::from_str::<ResultPayload>(rest) {
            Ok(payload) => DecodedEvent::Result {
                payload,
                raw: line.to_string(),
            },
            Err(_) => DecodedEvent::Unparsable {
                raw: line.to_string(),
            },
        });
    }

    Some(DecodedEvent::Log(coerce_log(line)))
}

fn coerce_log(line: &str) -> LogEntry {
    let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(line) else {
        return LogEntry::info(line);
    };
    let level = obj
        .get("level")
        .and_then(|v| v.as_str())
        .map(|s| LogLevel::from(s.to_string()))
        .unwrap_or_default();
    let message = obj
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| line.to_string());
    LogEntry::new(level, message)
}
