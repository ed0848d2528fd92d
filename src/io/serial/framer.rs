// src/io/serial/framer.rs
//
// Line framing for the serial byte stream.
// Splits on '\n', keeps the unterminated tail as a pending prefix, and
// decodes completed lines as UTF-8 with replacement characters.

use serde::Serialize;

/// Byte that terminates a line. A single '\r' before it is part of the terminator and is
/// recorded on the line as `crlf`.
pub const LINE_TERMINATOR: u8 = b'\n';

/// A decoded line of text, without its terminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Line {
    pub text: String,
    /// True when no terminator has been seen yet (the framer's pending prefix)
    pub incomplete: bool,
    /// True when the line ended in "\r\n" rather than a bare '\n'
    pub crlf: bool,
}

impl Line {
    pub fn complete(text: impl Into<String>) -> Self {
        Line {
            text: text.into(),
            incomplete: false,
            crlf: false,
        }
    }

    /// The terminator that ended this line, or nothing for the pending prefix.
    pub fn terminator(&self) -> &'static str {
        match (self.incomplete, self.crlf) {
            (true, _) => "",
            (false, true) => "\r\n",
            (false, false) => "\n",
        }
    }
}

/// Turns an unbounded byte stream into lines.
///
/// The pending prefix is held as raw bytes so a multi-byte character split
/// across two reads still decodes cleanly once the line completes.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_TERMINATOR) {
            self.pending.extend_from_slice(&rest[..pos]);
            let mut bytes = std::mem::take(&mut self.pending);
            let crlf = bytes.last() == Some(&b'\r');
            if crlf {
                bytes.pop();
            }
            lines.push(Line {
                text: decode(&bytes),
                incomplete: false,
                crlf,
            });
            rest = &rest[pos + 1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// The unterminated tail, if any.
    pub fn pending(&self) -> Option<Line> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Line {
            text: decode(&self.pending),
            incomplete: true,
            crlf: false,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard the pending prefix. Returns how many bytes were dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending = Vec::new();
        dropped
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
