//! Device transports for the sortline control plane.
//!
//! Every transport decodes incoming lines and hands them to a shared
//! [`HandlerTable`], keyed by `(device, kind)`. Outbound commands go through
//! the [`DeviceTransport`] trait, whose `send` only reports whether the line
//! was queued; delivery is never confirmed and nothing is retried here.
//!
//! # Components
//!
//! - [`TcpTransport`]: device sockets, one shared port or one port per device
//! - [`UdpFrameReceiver`]: camera frames reassembled and decoded into barcodes
//! - [`SerialGateLink`]: the RFID gate on a serial line, reader and writer threads
//!
//! ```text
//! hardware ─> transport read loop ─> decode ─> HandlerTable ─> controller inbox
//! controller ─> DeviceTransport::send ─> per-device writer ─> hardware
//! ```

mod dispatch;
mod error;
pub mod serial;
pub mod tcp;
mod transport;
pub mod udp;

pub use dispatch::HandlerTable;
pub use error::TransportError;
pub use serial::{SerialGateLink, SerialLinkConfig, SerialPortFactory, SystemSerialPort};
pub use tcp::{ConnectionInfo, TcpTransport};
pub use transport::{DeviceTransport, RoutedTransport};
pub use udp::{
    FrameAssembler, FrameOutcome, FrameProcessor, FrameStats, ImageDecoder, UdpFrameReceiver,
};
