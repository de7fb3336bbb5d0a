//! TCP transport for rig devices.
//!
//! Devices dial in and exchange newline-terminated frames. Two ways of telling
//! connections apart are supported behind the same type:
//!
//! - **Single port**: every device shares one listener. A connection is bound
//!   to whichever device id appears in the first byte of its lines, and is
//!   re-bound if a later line carries a different id.
//! - **Per-device ports**: each device has its own listener. The connection is
//!   bound to that device as soon as it is accepted, so commands can be sent
//!   before the device says anything.
//!
//! ```text
//! Sorter ──┐                      ┌─> reader task ─> LineCodec ─> HandlerTable
//! Env    ──┼─> TcpTransport ──────┤
//! Gate   ──┘                      └─< writer task <─ mpsc <─ send(device, payload)
//! ```
//!
//! Each connection owns one reader task and one writer task. Outbound frames
//! for a device go through that connection's channel, so concurrent `send`
//! calls never interleave bytes on the socket.
//!
//! # Design Principles
//!
//! - **No retry**: a device that drops must dial in again
//! - **No delivery confirmation**: `send` reports whether a frame was queued
//! - **Newest wins**: a second connection for the same device replaces the first

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use sortline_core::{DeviceKind, TcpConfig, TcpMode};
use sortline_protocol::{DeviceMessage, LineCodec};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::HandlerTable;
use crate::error::TransportError;
use crate::transport::DeviceTransport;

/// Connection information snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub device: DeviceKind,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// The connection currently associated with a device.
#[derive(Debug)]
struct DeviceLink {
    conn_id: u64,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<DeviceMessage>,
}

#[derive(Debug)]
struct Shared {
    handlers: HandlerTable,
    links: Mutex<HashMap<DeviceKind, DeviceLink>>,
    next_conn_id: AtomicU64,
    max_line_length: usize,
}

impl Shared {
    /// Point `device` at this connection unless it already is.
    fn associate(&self, device: DeviceKind, conn: &ConnectionHandle) {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        if links.get(&device).is_some_and(|link| link.conn_id == conn.id) {
            return;
        }

        if let Some(previous) = links.get(&device) {
            warn!(
                device = %device,
                previous_addr = %previous.remote_addr,
                new_addr = %conn.remote_addr,
                "Device moved to a new connection"
            );
        } else {
            info!(device = %device, addr = %conn.remote_addr, "Device connected");
        }

        links.insert(
            device,
            DeviceLink {
                conn_id: conn.id,
                remote_addr: conn.remote_addr,
                connected_at: conn.connected_at,
                outbound: conn.outbound.clone(),
            },
        );
    }

    /// Forget every device still bound to a closed connection.
    fn release(&self, conn_id: u64) {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.retain(|device, link| {
            let keep = link.conn_id != conn_id;
            if !keep {
                info!(device = %device, addr = %link.remote_addr, "Device disconnected");
            }
            keep
        });
    }
}

/// Per-connection state the reader loop needs when associating devices.
struct ConnectionHandle {
    id: u64,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<DeviceMessage>,
}

/// TCP transport multiplexing all TCP-attached devices.
///
/// # Example
///
/// ```no_run
/// use sortline_core::{DeviceKind, MessageKind, TcpConfig};
/// use sortline_network::{DeviceTransport, HandlerTable, TcpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let handlers = HandlerTable::new();
/// handlers.on_message(DeviceKind::Sorter, MessageKind::Event, |msg| {
///     println!("sorter says {}", msg.payload);
/// });
///
/// let transport = TcpTransport::bind(&TcpConfig::default(), handlers).await?;
/// transport.send(DeviceKind::Sorter, "st");
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    shared: Arc<Shared>,
    listeners: Vec<(Option<DeviceKind>, SocketAddr)>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Bind every listener named by `config` and start accepting.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::BindFailed` if any address cannot be bound;
    /// listeners bound before the failure are dropped.
    pub async fn bind(config: &TcpConfig, handlers: HandlerTable) -> Result<Self, TransportError> {
        let bindings: Vec<(Option<DeviceKind>, SocketAddr)> = match &config.mode {
            TcpMode::Single { bind_addr } => vec![(None, *bind_addr)],
            TcpMode::PerDevice { ports } => ports
                .iter()
                .map(|(device, addr)| (Some(*device), *addr))
                .collect(),
        };

        let mut bound = Vec::with_capacity(bindings.len());
        for (device, addr) in bindings {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::BindFailed { addr, source })?;
            let local_addr = listener.local_addr()?;
            match device {
                Some(device) => info!(device = %device, addr = %local_addr, "TCP listener bound"),
                None => info!(addr = %local_addr, "Shared TCP listener bound"),
            }
            bound.push((device, local_addr, listener));
        }

        let shared = Arc::new(Shared {
            handlers,
            links: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            max_line_length: config.max_line_length,
        });
        let cancel = CancellationToken::new();

        let mut listeners = Vec::with_capacity(bound.len());
        let mut tasks = Vec::with_capacity(bound.len());
        for (device, local_addr, listener) in bound {
            listeners.push((device, local_addr));
            tasks.push(tokio::spawn(accept_loop(
                listener,
                device,
                shared.clone(),
                cancel.clone(),
            )));
        }

        Ok(Self {
            shared,
            listeners,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Addresses actually bound (useful when configured with port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|(_, addr)| *addr).collect()
    }

    /// Listener dedicated to `device` in per-device mode.
    pub fn local_addr_for(&self, device: DeviceKind) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|(bound, _)| *bound == Some(device))
            .map(|(_, addr)| *addr)
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.shared.handlers
    }

    /// Snapshot of the devices currently associated with a connection.
    pub fn connected_devices(&self) -> Vec<ConnectionInfo> {
        let links = self.shared.links.lock().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<ConnectionInfo> = links
            .iter()
            .filter(|(_, link)| !link.outbound.is_closed())
            .map(|(device, link)| ConnectionInfo {
                device: *device,
                remote_addr: link.remote_addr,
                connected_at: link.connected_at,
            })
            .collect();
        infos.sort_by_key(|info| info.device);
        infos
    }

    /// Stop accepting, close every connection and wait for the accept loops.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "TCP accept loop ended abnormally");
            }
        }
        self.shared
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("TCP transport stopped");
    }
}

impl DeviceTransport for TcpTransport {
    fn send(&self, device: DeviceKind, payload: &str) -> bool {
        let links = self.shared.links.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(link) = links.get(&device) else {
            debug!(device = %device, payload, "Send skipped: device not connected");
            return false;
        };

        match link.outbound.send(DeviceMessage::command(device, payload)) {
            Ok(()) => {
                trace!(device = %device, payload, "Queued command");
                true
            }
            Err(_) => {
                debug!(device = %device, payload, "Send skipped: connection closing");
                false
            }
        }
    }

    fn is_connected(&self, device: DeviceKind) -> bool {
        self.shared
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device)
            .is_some_and(|link| !link.outbound.is_closed())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    bound: Option<DeviceKind>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(addr = %addr, "Accepted connection");
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    bound,
                    shared.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                // Typically fd exhaustion; keep the listener alive.
                error!(error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    bound: Option<DeviceKind>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, outbound_rx, remote_addr));

    let conn = ConnectionHandle {
        id: shared.next_conn_id.fetch_add(1, Ordering::Relaxed),
        remote_addr,
        connected_at: Utc::now(),
        outbound,
    };

    if let Some(device) = bound {
        shared.associate(device, &conn);
    }

    let mut reader = FramedRead::new(
        read_half,
        LineCodec::with_max_line_length(shared.max_line_length),
    );

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                let message = match bound {
                    Some(device) => {
                        if message.device != device {
                            warn!(
                                port_device = %device,
                                line_device = %message.device,
                                "Device id disagrees with listener; using listener's"
                            );
                        }
                        DeviceMessage { device, ..message }
                    }
                    None => {
                        shared.associate(message.device, &conn);
                        message
                    }
                };

                trace!(addr = %remote_addr, message = %message, "Received");
                shared.handlers.dispatch(message);
            }
            Some(Err(e)) => {
                warn!(addr = %remote_addr, error = %e, "Read failed; closing connection");
                break;
            }
            None => {
                debug!(addr = %remote_addr, "Peer closed connection");
                break;
            }
        }
    }

    shared.release(conn.id);
    drop(conn);
    // The writer drains what is already queued, then sees the channel close.
    if let Err(e) = writer.await {
        warn!(addr = %remote_addr, error = %e, "Writer task ended abnormally");
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<DeviceMessage>,
    remote_addr: SocketAddr,
) {
    let mut sink = FramedWrite::new(write_half, LineCodec::new());
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!(addr = %remote_addr, error = %e, "Write failed");
            break;
        }
    }
}
