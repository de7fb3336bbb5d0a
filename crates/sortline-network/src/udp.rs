//! UDP frame reassembly for the scanner camera.
//!
//! The camera streams each captured image as a burst of datagrams:
//!
//! ```text
//! FRAME_START:<size>   announce a frame of <size> bytes
//! <chunk> ...          raw image bytes, in order
//! FRAME_END            close the frame
//! ```
//!
//! A frame is handed to the [`ImageDecoder`] only when exactly `<size>` bytes
//! arrived. Decoded codes are debounced and then dispatched as sorter barcode
//! events (`SEbc<code>`), exactly as if the sorter had scanned them itself.

use sortline_core::constants::{
    FRAME_END_MARKER, FRAME_INTERVAL_WINDOW, FRAME_START_PREFIX, MAX_FRAME_SIZE,
};
use sortline_core::{DeviceKind, UdpConfig};
use sortline_protocol::DeviceMessage;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dispatch::HandlerTable;
use crate::error::TransportError;

/// Largest datagram we expect from the camera.
const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

/// Turns a complete image into the code printed on it, if any.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, frame: &[u8]) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Idle,
    Receiving,
}

/// What one datagram did to the frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Started { size: usize },
    Appended { cursor: usize },
    /// Chunk would overflow the declared size; cursor unchanged.
    Overflow { cursor: usize, chunk: usize },
    Complete(Vec<u8>),
    Incomplete { expected: usize, received: usize },
    /// A new header arrived mid-frame; the partial frame was dropped.
    Restarted {
        size: usize,
        expected: usize,
        received: usize,
    },
    /// Malformed header, or data/end outside a frame.
    Ignored,
}

/// Single-frame reassembly buffer.
#[derive(Debug)]
pub struct FrameAssembler {
    state: AssemblerState,
    expected_size: usize,
    cursor: usize,
    bytes: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblerState::Idle,
            expected_size: 0,
            cursor: 0,
            bytes: Vec::new(),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.state == AssemblerState::Receiving
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn handle_datagram(&mut self, datagram: &[u8]) -> FrameOutcome {
        if let Some(size) = datagram.strip_prefix(FRAME_START_PREFIX.as_bytes()) {
            return self.start(size);
        }
        if datagram.trim_ascii() == FRAME_END_MARKER.as_bytes() {
            return self.finish();
        }
        self.append(datagram)
    }

    fn start(&mut self, size: &[u8]) -> FrameOutcome {
        let size = std::str::from_utf8(size)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|size| *size > 0 && *size <= MAX_FRAME_SIZE);
        let partial = self
            .is_receiving()
            .then_some((self.expected_size, self.cursor));

        let Some(size) = size else {
            self.reset();
            return match partial {
                Some((expected, received)) => FrameOutcome::Incomplete { expected, received },
                None => FrameOutcome::Ignored,
            };
        };

        self.state = AssemblerState::Receiving;
        self.expected_size = size;
        self.cursor = 0;
        self.bytes = vec![0; size];
        match partial {
            Some((expected, received)) => FrameOutcome::Restarted {
                size,
                expected,
                received,
            },
            None => FrameOutcome::Started { size },
        }
    }

    fn append(&mut self, chunk: &[u8]) -> FrameOutcome {
        if self.state != AssemblerState::Receiving {
            return FrameOutcome::Ignored;
        }
        let end = self.cursor + chunk.len();
        if end > self.expected_size {
            return FrameOutcome::Overflow {
                cursor: self.cursor,
                chunk: chunk.len(),
            };
        }
        self.bytes[self.cursor..end].copy_from_slice(chunk);
        self.cursor = end;
        FrameOutcome::Appended { cursor: end }
    }

    fn finish(&mut self) -> FrameOutcome {
        if self.state != AssemblerState::Receiving {
            return FrameOutcome::Ignored;
        }
        let outcome = if self.cursor == self.expected_size {
            FrameOutcome::Complete(std::mem::take(&mut self.bytes))
        } else {
            FrameOutcome::Incomplete {
                expected: self.expected_size,
                received: self.cursor,
            }
        };
        self.reset();
        outcome
    }

    fn reset(&mut self) {
        self.state = AssemblerState::Idle;
        self.expected_size = 0;
        self.cursor = 0;
        self.bytes = Vec::new();
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame telemetry. Not used for any control decision.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub completed: u64,
    pub discarded: u64,
    pub decoded: u64,
    pub suppressed: u64,
    last_completed: Option<Instant>,
    intervals: VecDeque<Duration>,
}

impl FrameStats {
    fn record_completed(&mut self, now: Instant) {
        self.completed += 1;
        if let Some(last) = self.last_completed {
            if self.intervals.len() == FRAME_INTERVAL_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.saturating_duration_since(last));
        }
        self.last_completed = Some(now);
    }

    /// Mean of the last few completed-frame intervals.
    pub fn average_interval(&self) -> Option<Duration> {
        if self.intervals.is_empty() {
            return None;
        }
        let total: Duration = self.intervals.iter().sum();
        Some(total / self.intervals.len() as u32)
    }
}

/// Suppresses repeats of the same code inside a time window.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn admit(&mut self, code: &str, now: Instant) -> bool {
        if let Some((last_code, at)) = &self.last {
            if last_code == code && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((code.to_string(), now));
        true
    }
}

/// Everything between a datagram and an emitted barcode, minus the socket.
pub struct FrameProcessor {
    assembler: FrameAssembler,
    debouncer: Debouncer,
    decoder: Arc<dyn ImageDecoder>,
    stats: Arc<Mutex<FrameStats>>,
}

impl FrameProcessor {
    pub fn new(decoder: Arc<dyn ImageDecoder>, debounce: Duration) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            debouncer: Debouncer::new(debounce),
            decoder,
            stats: Arc::new(Mutex::new(FrameStats::default())),
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Feed one datagram; returns a code when a frame decodes and passes the debounce.
    pub fn on_datagram(&mut self, datagram: &[u8], now: Instant) -> Option<String> {
        match self.assembler.handle_datagram(datagram) {
            FrameOutcome::Started { size } => {
                trace!(size, "Frame started");
                None
            }
            FrameOutcome::Appended { .. } | FrameOutcome::Ignored => None,
            FrameOutcome::Overflow { cursor, chunk } => {
                debug!(cursor, chunk, "Chunk overflows declared frame size; dropped");
                None
            }
            FrameOutcome::Incomplete { expected, received } => {
                warn!(expected, received, "Incomplete frame discarded");
                self.lock_stats().discarded += 1;
                None
            }
            FrameOutcome::Restarted {
                size,
                expected,
                received,
            } => {
                warn!(expected, received, size, "Frame restarted; partial frame discarded");
                self.lock_stats().discarded += 1;
                None
            }
            FrameOutcome::Complete(frame) => {
                self.lock_stats().record_completed(now);
                let code = self.decoder.decode(&frame)?;
                let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
                stats.decoded += 1;
                if self.debouncer.admit(&code, now) {
                    Some(code)
                } else {
                    stats.suppressed += 1;
                    trace!(code = %code, "Repeated code suppressed");
                    None
                }
            }
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, FrameStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// UDP receive loop feeding decoded barcodes into the sorter's handlers.
pub struct UdpFrameReceiver {
    socket: UdpSocket,
    processor: FrameProcessor,
    handlers: HandlerTable,
}

impl UdpFrameReceiver {
    pub async fn bind(
        config: &UdpConfig,
        decoder: Arc<dyn ImageDecoder>,
        handlers: HandlerTable,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        info!(addr = %socket.local_addr()?, "UDP frame receiver bound");

        Ok(Self {
            socket,
            processor: FrameProcessor::new(decoder, config.debounce()),
            handlers,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared view of the telemetry, readable while the loop runs.
    pub fn stats_handle(&self) -> Arc<Mutex<FrameStats>> {
        self.processor.stats.clone()
    }

    /// Receive until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, _peer)) => {
                    let decoded = self.processor.on_datagram(&buf[..len], Instant::now());
                    if let Some(code) = decoded {
                        debug!(code = %code, "Barcode decoded from frame");
                        let event =
                            DeviceMessage::event(DeviceKind::Sorter, format!("bc{code}"));
                        if !self.handlers.dispatch(event) {
                            warn!(code = %code, "No sorter handler for decoded barcode");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                }
            }
        }
        info!("UDP frame receiver stopped");
    }
}
