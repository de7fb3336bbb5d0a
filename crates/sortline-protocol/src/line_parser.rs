//! Stream parser for newline-delimited device frames.
//!
//! TCP and serial links deliver arbitrary chunks: half a line, several lines,
//! or noise. [`LineParser`] buffers bytes and yields complete lines, dropping
//! anything that cannot be a valid frame.
//!
//! ```
//! use sortline_protocol::LineParser;
//!
//! let mut parser = LineParser::new();
//! parser.feed(b"SEi");
//! assert!(parser.next_line().is_none());
//!
//! parser.feed(b"r1\nSEss");
//! assert_eq!(parser.next_line().as_deref(), Some("SEir1"));
//! assert!(parser.next_line().is_none());
//! ```

use bytes::BytesMut;
use sortline_core::constants::{LINE_TERMINATOR, MAX_LINE_LENGTH};
use std::collections::VecDeque;

/// Initial capacity of the byte buffer. Most device lines are a few dozen bytes.
const INITIAL_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct LineParser {
    /// Bytes not yet terminated by a newline.
    buffer: BytesMut,

    /// Complete lines waiting to be taken.
    lines: VecDeque<String>,

    max_line_length: usize,

    /// Lines dropped for being oversized or not UTF-8.
    discarded: u64,

    /// Inside an oversized line; bytes are dropped up to its newline.
    discarding: bool,
}

impl LineParser {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            lines: VecDeque::new(),
            max_line_length,
            discarded: 0,
            discarding: false,
        }
    }

    /// Append bytes and split out every complete line.
    ///
    /// Empty lines are skipped and a trailing `\r` is removed. A partial line
    /// longer than the limit is thrown away so a peer that never sends a
    /// newline cannot grow the buffer without bound. The rest of that line is
    /// dropped as well, up to and including its newline.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        if self.discarding {
            match self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(pos) => {
                    let _ = self.buffer.split_to(pos + 1);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return;
                }
            }
        }

        while let Some(pos) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
            let raw = self.buffer.split_to(pos + 1);
            self.push_line(&raw[..pos]);
        }

        if self.buffer.len() > self.max_line_length {
            self.buffer.clear();
            self.discarded += 1;
            self.discarding = true;
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    pub fn lines_available(&self) -> usize {
        self.lines.len()
    }

    /// Bytes held for an unterminated line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.lines.clear();
        self.discarding = false;
    }

    fn push_line(&mut self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return;
        }
        if raw.len() > self.max_line_length {
            self.discarded += 1;
            return;
        }
        match std::str::from_utf8(raw) {
            Ok(line) => self.lines.push_back(line.to_string()),
            Err(_) => self.discarded += 1,
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_is_buffered() {
        let mut parser = LineParser::new();
        parser.feed(b"HEtp1.0;");
        assert_eq!(parser.lines_available(), 0);
        assert_eq!(parser.pending_bytes(), 8);

        parser.feed(b"2.0;3.0\n");
        assert_eq!(parser.next_line().as_deref(), Some("HEtp1.0;2.0;3.0"));
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut parser = LineParser::new();
        parser.feed(b"SEir1\nSEssA\nGRok\n");
        assert_eq!(parser.lines_available(), 3);
        assert_eq!(parser.next_line().as_deref(), Some("SEir1"));
        assert_eq!(parser.next_line().as_deref(), Some("SEssA"));
        assert_eq!(parser.next_line().as_deref(), Some("GRok"));
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut parser = LineParser::new();
        parser.feed(b"\n\r\nGEid04AB;12\r\n");
        assert_eq!(parser.lines_available(), 1);
        assert_eq!(parser.next_line().as_deref(), Some("GEid04AB;12"));
    }

    #[test]
    fn test_invalid_utf8_is_discarded() {
        let mut parser = LineParser::new();
        parser.feed(&[b'S', b'E', 0xFF, 0xFE, b'\n']);
        parser.feed(b"SEir1\n");
        assert_eq!(parser.discarded(), 1);
        assert_eq!(parser.next_line().as_deref(), Some("SEir1"));
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut parser = LineParser::with_max_line_length(8);
        parser.feed(b"SEbc1234567890");
        assert_eq!(parser.pending_bytes(), 0);
        assert_eq!(parser.discarded(), 1);

        // Tail of the same oversized line.
        parser.feed(b"SEir1\n");
        assert_eq!(parser.next_line(), None);

        parser.feed(b"SEir1\n");
        assert_eq!(parser.next_line().as_deref(), Some("SEir1"));
        assert_eq!(parser.discarded(), 1);
    }

    #[test]
    fn test_oversized_line_tail_is_not_a_frame() {
        let mut parser = LineParser::with_max_line_length(8);
        parser.feed(b"SEbcAAAAAAAA");
        parser.feed(b"GRok\nSCst\n");
        assert_eq!(parser.next_line().as_deref(), Some("SCst"));
        assert_eq!(parser.next_line(), None);
        assert_eq!(parser.discarded(), 1);
    }

    #[test]
    fn test_oversized_tail_spanning_chunks() {
        let mut parser = LineParser::with_max_line_length(4);
        parser.feed(b"SEbc1234");
        parser.feed(b"5678");
        parser.feed(b"GRok");
        assert_eq!(parser.pending_bytes(), 0);
        parser.feed(b"\nGRok\n");
        assert_eq!(parser.next_line().as_deref(), Some("GRok"));
        assert_eq!(parser.next_line(), None);
    }

    #[test]
    fn test_clear() {
        let mut parser = LineParser::new();
        parser.feed(b"SEir1\nSEss");
        parser.clear();
        assert_eq!(parser.lines_available(), 0);
        assert_eq!(parser.pending_bytes(), 0);
    }
}
