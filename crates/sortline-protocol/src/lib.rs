//! Line protocol spoken by every rig device.
//!
//! Frames are `<device><kind><payload>\n`. This crate turns raw bytes into
//! [`DeviceMessage`]s ([`decode`], [`LineParser`], [`LineCodec`]), builds the
//! command payloads each device understands, and parses the event payloads
//! they emit.

pub mod barcode;
pub mod codec;
pub mod commands;
pub mod line_parser;
pub mod message;

pub use barcode::{Barcode, parse_barcode};
pub use codec::LineCodec;
pub use line_parser::LineParser;
pub use message::{DeviceMessage, decode, encode};
