//! Control channel codec
//!
//! `GET /control` streams newline-delimited `data: {json}` lines. The
//! decoder buffers partial lines across chunks and yields parsed commands.
//! Anything it cannot understand is dropped, never fatal. A line longer
//! than [`MAX_LINE_LEN`] is dropped whole.

use bytes::{Buf, BytesMut};
use serde::Deserialize;

/// A start/stop intent pushed by the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start publishing a stream
    Start {
        stream_id: String,
        path: Option<String>,
    },
    /// Stop publishing a stream
    Stop { stream_id: String },
}

impl ControlCommand {
    /// Stream id the command targets
    pub fn stream_id(&self) -> &str {
        match self {
            ControlCommand::Start { stream_id, .. } => stream_id,
            ControlCommand::Stop { stream_id } => stream_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlEvent {
    action: String,
    stream_id: String,
    #[serde(default)]
    path: Option<String>,
}

/// Parse one line of the control stream
///
/// Returns `None` for blank lines, comments (`:`), non-data fields and
/// malformed events.
pub fn parse_line(line: &str) -> Option<ControlCommand> {
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }

    let event: ControlEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed control event");
            return None;
        }
    };

    if event.stream_id.is_empty() {
        tracing::debug!("Dropping control event without stream id");
        return None;
    }

    match event.action.as_str() {
        "start" => Some(ControlCommand::Start {
            stream_id: event.stream_id,
            path: event.path.filter(|p| !p.is_empty()),
        }),
        "stop" => Some(ControlCommand::Stop {
            stream_id: event.stream_id,
        }),
        other => {
            tracing::debug!(action = other, "Dropping control event with unknown action");
            None
        }
    }
}

/// Longest control line the decoder will buffer
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Incremental decoder for the control stream
#[derive(Debug, Default)]
pub struct ControlDecoder {
    buffer: BytesMut,
    /// Leading bytes of `buffer` already known to hold no newline
    scanned: usize,
    /// Skipping the remainder of an oversized line
    discarding: bool,
}

impl ControlDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every command completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ControlCommand> {
        self.buffer.extend_from_slice(chunk);

        let mut commands = Vec::new();
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > MAX_LINE_LEN {
                    if !self.discarding {
                        tracing::debug!(len = self.buffer.len(), "Dropping oversized control line");
                    }
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                break;
            };

            let line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                tracing::debug!(len = line.len(), "Dropping oversized control line");
                continue;
            }

            match std::str::from_utf8(&line) {
                Ok(text) => commands.extend(parse_line(text)),
                Err(_) => tracing::debug!("Dropping non-UTF-8 control line"),
            }
        }
        commands
    }

    /// Flush a trailing line without a newline (stream ended)
    pub fn finish(&mut self) -> Option<ControlCommand> {
        let line = self.buffer.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        std::str::from_utf8(&line).ok().and_then(parse_line)
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
