//! Line-oriented stream decoder
//!
//! Servers under test may print diagnostics on the same channel as protocol
//! traffic, so decoding is best-effort: bytes accumulate in a buffer, every
//! newline terminates one candidate line, and lines that fail to parse are
//! reported as [`Decoded::Violation`] and dropped.

use crate::message::{ProtocolMessage, ProtocolViolation};

/// Characters of a rejected line kept for logging
const PREVIEW_CHARS: usize = 120;

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Well-formed protocol message
    Message(ProtocolMessage),
    /// Rejected line with a short preview of its text
    Violation {
        violation: ProtocolViolation,
        preview: String,
    },
}

/// Incremental newline-delimited decoder
///
/// # Invariants
/// - `buffer` never contains a newline
/// - `buffer.len()` never exceeds `max_line_bytes`
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    /// Dropping the tail of an oversized line until the next newline
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Lines longer than this are dropped
    pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

    /// Create decoder with the default line limit
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(Self::DEFAULT_MAX_LINE_BYTES)
    }

    /// Create decoder with a custom line limit
    #[inline]
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    /// Bytes buffered without a terminating newline yet
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk of bytes, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            if self.buffer.len() + head.len() > self.max_line_bytes {
                out.push(Decoded::Violation {
                    violation: ProtocolViolation::OversizedLine(self.max_line_bytes),
                    preview: preview(&self.buffer),
                });
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            if let Some(decoded) = decode_line(&line) {
                out.push(decoded);
            }
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > self.max_line_bytes {
                out.push(Decoded::Violation {
                    violation: ProtocolViolation::OversizedLine(self.max_line_bytes),
                    preview: preview(&self.buffer),
                });
                self.buffer.clear();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        out
    }

    /// Flush at end of stream
    ///
    /// An unterminated trailing line is never parsed; it is reported as a
    /// [`ProtocolViolation::TruncatedLine`] when it holds non-whitespace.
    pub fn finish(&mut self) -> Option<Decoded> {
        self.discarding = false;
        let leftover = std::mem::take(&mut self.buffer);
        if leftover.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(Decoded::Violation {
            violation: ProtocolViolation::TruncatedLine(leftover.len()),
            preview: preview(&leftover),
        })
    }
}

fn decode_line(raw: &[u8]) -> Option<Decoded> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let Ok(text) = std::str::from_utf8(raw) else {
        return Some(Decoded::Violation {
            violation: ProtocolViolation::InvalidUtf8,
            preview: preview(raw),
        });
    };
    if text.trim().is_empty() {
        return None;
    }

    Some(match ProtocolMessage::parse_line(text) {
        Ok(message) => Decoded::Message(message),
        Err(violation) => Decoded::Violation {
            violation,
            preview: preview(raw),
        },
    })
}

fn preview(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).chars().take(PREVIEW_CHARS).collect()
}
