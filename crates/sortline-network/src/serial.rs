//! Serial link to the RFID gate.
//!
//! The gate hangs off a serial line rather than the network. Two dedicated
//! threads service it:
//!
//! - **reader**: opens the port, accumulates bytes, splits lines, and
//!   dispatches every gate frame through the shared [`HandlerTable`]
//! - **writer**: drains a FIFO of outbound commands, appending the line
//!   terminator where missing, and writes + flushes each one
//!
//! Any I/O failure is logged and retried after a fixed backoff; the port is
//! reopened from scratch. Shutdown clears a running flag, and each thread is
//! joined with a deadline. A thread that misses it is abandoned and logged.

use sortline_core::constants::{
    DEFAULT_RETRY_BACKOFF_MS, POLL_INTERVAL_MS, THREAD_JOIN_TIMEOUT_MS,
};
use sortline_core::{DeviceKind, MessageKind, SerialConfig};
use sortline_protocol::commands::GateCommand;
use sortline_protocol::{DeviceMessage, LineParser, decode};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::dispatch::HandlerTable;
use crate::transport::DeviceTransport;

/// Shortest line worth decoding: device, kind, and at least one payload byte.
const MIN_GATE_LINE: usize = 3;

const READ_CHUNK: usize = 256;

type PortReader = Box<dyn Read + Send>;
type PortWriter = Box<dyn Write + Send>;

/// Opens the physical (or simulated) port as independent read and write halves.
pub trait SerialPortFactory: Send + Sync + 'static {
    fn open(&self) -> io::Result<(PortReader, PortWriter)>;

    fn describe(&self) -> String;
}

/// A real serial device opened through the `serialport` crate.
#[derive(Debug, Clone)]
pub struct SystemSerialPort {
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SystemSerialPort {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            path: config.path.clone(),
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout(),
        }
    }
}

impl SerialPortFactory for SystemSerialPort {
    fn open(&self) -> io::Result<(PortReader, PortWriter)> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(io::Error::from)?;
        let writer = port.try_clone().map_err(io::Error::from)?;
        Ok((Box::new(port), Box::new(writer)))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }
}

/// Timing knobs for the link threads.
#[derive(Debug, Clone)]
pub struct SerialLinkConfig {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub join_timeout: Duration,
}

impl From<&SerialConfig> for SerialLinkConfig {
    fn from(config: &SerialConfig) -> Self {
        Self {
            poll_interval: config.read_timeout(),
            retry_backoff: config.retry_backoff(),
            join_timeout: Duration::from_millis(THREAD_JOIN_TIMEOUT_MS),
        }
    }
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            join_timeout: Duration::from_millis(THREAD_JOIN_TIMEOUT_MS),
        }
    }
}

/// State shared by the reader and writer threads.
struct LinkState {
    running: AtomicBool,
    open: AtomicBool,
    writer: Mutex<Option<PortWriter>>,
}

impl LinkState {
    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sleep for `duration` in poll-sized slices, returning early on shutdown.
    fn pause(&self, duration: Duration, poll: Duration) {
        let deadline = Instant::now() + duration;
        while self.running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn set_writer(&self, writer: Option<PortWriter>) {
        self.open.store(writer.is_some(), Ordering::Release);
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = writer;
    }
}

/// Serial link to the gate, usable as a [`DeviceTransport`] for `G` frames.
pub struct SerialGateLink {
    state: Arc<LinkState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    threads: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    join_timeout: Duration,
}

impl SerialGateLink {
    /// Spawn the reader and writer threads. The port is opened by the reader
    /// thread, so this never fails; an absent port is retried in the background.
    pub fn start(
        factory: Arc<dyn SerialPortFactory>,
        config: SerialLinkConfig,
        handlers: HandlerTable,
    ) -> io::Result<Self> {
        let state = Arc::new(LinkState {
            running: AtomicBool::new(true),
            open: AtomicBool::new(false),
            writer: Mutex::new(None),
        });
        let (tx, rx) = mpsc::channel::<String>();

        info!(port = %factory.describe(), "Starting serial gate link");

        let reader = {
            let state = state.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("gate-serial-reader".into())
                .spawn(move || reader_loop(factory, state, handlers, config))?
        };
        let writer = {
            let state = state.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("gate-serial-writer".into())
                .spawn(move || writer_loop(rx, state, config))?
        };

        Ok(Self {
            state,
            outbound: Mutex::new(Some(tx)),
            threads: Mutex::new(vec![("reader", reader), ("writer", writer)]),
            join_timeout: config.join_timeout,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    /// Queue a raw line for the writer thread.
    pub fn send_line(&self, line: impl Into<String>) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if self.state.running() => tx.send(line.into()).is_ok(),
            _ => false,
        }
    }

    pub fn send_command(&self, command: &GateCommand) -> bool {
        self.send_line(DeviceMessage::command(DeviceKind::Gate, command.payload()).to_string())
    }

    pub fn set_access_mode(&self, allow: bool) -> bool {
        self.send_command(&GateCommand::SetAccess(allow))
    }

    pub fn set_register_mode(&self, register: bool) -> bool {
        self.send_command(&GateCommand::SetRegisterMode(register))
    }

    pub fn write_card(&self, employee_id: &str) -> bool {
        self.send_command(&GateCommand::WriteCard(employee_id.to_string()))
    }

    /// Stop both threads, waiting at most the join timeout for each.
    pub fn shutdown(&self) {
        self.state.running.store(false, Ordering::Release);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let threads =
            std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, handle) in threads {
            let deadline = Instant::now() + self.join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(thread = name, "Serial thread panicked");
                }
            } else {
                warn!(thread = name, "Serial thread missed its join deadline; abandoning it");
            }
        }
        self.state.set_writer(None);
        info!("Serial gate link stopped");
    }
}

impl DeviceTransport for SerialGateLink {
    fn send(&self, device: DeviceKind, payload: &str) -> bool {
        if device != DeviceKind::Gate {
            debug!(device = %device, "Serial link only carries gate frames");
            return false;
        }
        self.send_line(DeviceMessage::command(device, payload).to_string())
    }

    fn is_connected(&self, device: DeviceKind) -> bool {
        device == DeviceKind::Gate && self.is_open()
    }
}

impl Drop for SerialGateLink {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

/// Validate one received line and hand it to the gate handlers.
///
/// Returns `true` when the line was dispatched.
pub fn process_line(line: &str, handlers: &HandlerTable) -> bool {
    if line.len() < MIN_GATE_LINE {
        debug!(line, "Ignoring short serial line");
        return false;
    }

    let message = match decode(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(line, error = %e, "Malformed serial line");
            return false;
        }
    };

    if message.device != DeviceKind::Gate {
        warn!(line, device = %message.device, "Non-gate frame on gate serial line");
        return false;
    }

    if message.kind == MessageKind::Command {
        trace!(line, "Echoed command ignored");
        return false;
    }

    handlers.dispatch(message)
}

fn reader_loop(
    factory: Arc<dyn SerialPortFactory>,
    state: Arc<LinkState>,
    handlers: HandlerTable,
    config: SerialLinkConfig,
) {
    let mut parser = LineParser::new();
    let mut buf = [0u8; READ_CHUNK];

    while state.running() {
        let (mut reader, writer) = match factory.open() {
            Ok(halves) => halves,
            Err(e) => {
                warn!(
                    port = %factory.describe(),
                    error = %e,
                    "Failed to open serial port; retrying"
                );
                state.pause(config.retry_backoff, config.poll_interval);
                continue;
            }
        };

        info!(port = %factory.describe(), "Serial port open");
        state.set_writer(Some(writer));
        parser.clear();

        while state.running() {
            match reader.read(&mut buf) {
                Ok(0) => {
                    warn!(port = %factory.describe(), "Serial port closed");
                    break;
                }
                Ok(n) => {
                    parser.feed(&buf[..n]);
                    while let Some(line) = parser.next_line() {
                        process_line(&line, &handlers);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!(port = %factory.describe(), error = %e, "Serial read failed");
                    break;
                }
            }
        }

        state.set_writer(None);
        if state.running() {
            state.pause(config.retry_backoff, config.poll_interval);
        }
    }
    debug!("Serial reader thread exiting");
}

fn writer_loop(outbound: mpsc::Receiver<String>, state: Arc<LinkState>, config: SerialLinkConfig) {
    let mut pending: Option<String> = None;

    while state.running() {
        let mut line = match pending.take() {
            Some(line) => line,
            None => match outbound.recv_timeout(config.poll_interval) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let result = {
            let mut writer = state.writer.lock().unwrap_or_else(PoisonError::into_inner);
            match writer.as_mut() {
                Some(port) => port.write_all(line.as_bytes()).and_then(|()| port.flush()),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "serial port not open")),
            }
        };

        match result {
            Ok(()) => trace!(line = line.trim_end(), "Serial write"),
            Err(e) => {
                warn!(line = line.trim_end(), error = %e, "Serial write failed; retrying");
                pending = Some(line);
                state.pause(config.retry_backoff, config.poll_interval);
            }
        }
    }
    debug!("Serial writer thread exiting");
}
