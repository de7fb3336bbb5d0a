//! Tokio codec for device lines.
//!
//! [`LineCodec`] wraps a [`LineParser`] so TCP connections can be driven with
//! `FramedRead` / `FramedWrite`:
//!
//! ```text
//! TCP Stream -> Decoder -> DeviceMessage
//! DeviceMessage -> Encoder -> TCP Stream ("SCst\n")
//! ```
//!
//! Lines that fail to decode are logged and skipped rather than returned as
//! errors, because a decoder error ends a `Framed` stream and one bad line
//! must not drop the device connection.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use tokio::net::TcpStream;
//! use tokio_util::codec::FramedRead;
//! use sortline_protocol::LineCodec;
//!
//! # async fn example() -> sortline_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:9000").await?;
//! let mut lines = FramedRead::new(stream, LineCodec::new());
//! while let Some(message) = lines.next().await {
//!     println!("{}", message?);
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{BufMut, BytesMut};
use sortline_core::constants::MAX_LINE_LENGTH;
use sortline_core::{Error, Result};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::message::{DeviceMessage, decode};
use crate::line_parser::LineParser;

#[derive(Debug)]
pub struct LineCodec {
    parser: LineParser,
    rejected: u64,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            parser: LineParser::with_max_line_length(max_line_length),
            rejected: 0,
        }
    }

    /// Lines that were complete but did not decode.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = DeviceMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            self.parser.feed(src);
            src.clear();
        }

        while let Some(line) = self.parser.next_line() {
            match decode(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    self.rejected += 1;
                    warn!(line = %line, error = %e, "Dropping malformed line");
                }
            }
        }

        Ok(None)
    }
}

impl Encoder<DeviceMessage> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: DeviceMessage, dst: &mut BytesMut) -> Result<()> {
        let line = item.to_line();
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sortline_core::{DeviceKind, MessageKind};

    #[test]
    fn test_decode_across_chunks() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"SEs"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"sB\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.device, DeviceKind::Sorter);
        assert_eq!(msg.payload, "ssB");
    }

    #[test]
    fn test_decode_skips_malformed() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Q\nZZtop\nHEwB0\n"[..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload, "wB0");
        assert_eq!(codec.rejected(), 2);
    }

    #[test]
    fn test_decode_queues_remaining_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"SEir1\nSEssA\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, "ir1");

        let mut empty = BytesMut::new();
        assert_eq!(codec.decode(&mut empty).unwrap().unwrap().payload, "ssA");
        assert!(codec.decode(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_encode() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                DeviceMessage::new(DeviceKind::Environment, MessageKind::Command, "pA-20"),
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..], b"HCpA-20\n");
    }
}
