//! `sortlined`: wires the sortline control plane together and runs it.
//!
//! Configuration is read from the path given as the first argument, or from
//! `SORTLINE_CONFIG`; without either the built-in defaults are used. Log
//! verbosity follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use sortline_controllers::{
    ControllerRuntime, EnvController, GateController, MemoryDirectory, MemoryRepository,
    SortController, TracingEventSink,
};
use sortline_core::{DeviceKind, RigConfig};
use sortline_network::{
    DeviceTransport, FrameStats, HandlerTable, ImageDecoder, RoutedTransport, SerialGateLink,
    SerialLinkConfig, SystemSerialPort, TcpTransport, UdpFrameReceiver,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "SORTLINE_CONFIG";
const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(60);

/// Stand-in until a barcode/QR decoder is wired in; every frame decodes to nothing.
struct UnconfiguredDecoder;

impl ImageDecoder for UnconfiguredDecoder {
    fn decode(&self, frame: &[u8]) -> Option<String> {
        debug!(bytes = frame.len(), "No image decoder configured; frame dropped");
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = config_path(std::env::args().nth(1), std::env::var(CONFIG_ENV).ok());
    let config = load_config(path)?;
    info!(version = sortline_core::VERSION, "Starting sortline daemon");

    let cancel = CancellationToken::new();
    let handlers = HandlerTable::new();

    let tcp = Arc::new(
        TcpTransport::bind(&config.tcp, handlers.clone())
            .await
            .context("failed to start TCP transport")?,
    );

    let serial = if config.serial.enabled {
        let port = Arc::new(SystemSerialPort::new(&config.serial));
        let link_config = SerialLinkConfig::from(&config.serial);
        let link = SerialGateLink::start(port, link_config, handlers.clone())
            .context("failed to start serial gate link")?;
        Some(Arc::new(link))
    } else {
        None
    };

    let gate_transport: Arc<dyn DeviceTransport> = match &serial {
        Some(link) => link.clone() as Arc<dyn DeviceTransport>,
        None => tcp.clone() as Arc<dyn DeviceTransport>,
    };
    let transport: Arc<dyn DeviceTransport> = Arc::new(
        RoutedTransport::new()
            .route(DeviceKind::Sorter, tcp.clone())
            .route(DeviceKind::Environment, tcp.clone())
            .route(DeviceKind::Gate, gate_transport),
    );

    let (udp_task, frame_stats) = if config.udp.enabled {
        let decoder = Arc::new(UnconfiguredDecoder);
        let receiver = UdpFrameReceiver::bind(&config.udp, decoder, handlers.clone())
            .await
            .context("failed to start UDP frame receiver")?;
        let stats = receiver.stats_handle();
        (Some(tokio::spawn(receiver.run(cancel.child_token()))), Some(stats))
    } else {
        (None, None)
    };

    let repository = Arc::new(MemoryRepository::new());
    let events = Arc::new(TracingEventSink);
    let mut runtime = ControllerRuntime::with_cancellation(cancel.child_token());

    runtime
        .spawn(SortController::new(&config.sorter, transport.clone(), events.clone()))
        .register(&handlers);
    runtime
        .spawn(EnvController::new(
            &config.zones,
            transport.clone(),
            events.clone(),
            repository.clone(),
        ))
        .register(&handlers);
    runtime
        .spawn(GateController::new(
            &config.gate,
            transport.clone(),
            events,
            repository,
            Arc::new(MemoryDirectory::new()),
        ))
        .register(&handlers);

    let diagnostics = tokio::spawn(report_connections(
        tcp.clone(),
        serial.clone(),
        frame_stats,
        cancel.child_token(),
    ));

    info!(controllers = runtime.len(), "Sortline daemon running");
    shutdown_signal().await;
    info!("Shutdown requested");

    cancel.cancel();
    tcp.shutdown().await;
    if let Some(task) = udp_task {
        if let Err(e) = task.await {
            warn!(error = %e, "UDP task ended abnormally");
        }
    }
    if let Some(link) = serial {
        // Bounded thread joins; keep them off the async workers.
        if let Err(e) = tokio::task::spawn_blocking(move || link.shutdown()).await {
            warn!(error = %e, "Serial shutdown task failed");
        }
    }
    runtime.shutdown().await;
    let _ = diagnostics.await;

    info!("Sortline daemon stopped");
    Ok(())
}

/// First CLI argument wins over the environment.
fn config_path(arg: Option<String>, env: Option<String>) -> Option<PathBuf> {
    arg.or(env).filter(|p| !p.trim().is_empty()).map(PathBuf::from)
}

fn load_config(path: Option<PathBuf>) -> Result<RigConfig> {
    match path {
        Some(path) => {
            let config = RigConfig::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!(path = %path.display(), "Configuration loaded");
            Ok(config)
        }
        None => {
            info!("No configuration given; using defaults");
            Ok(RigConfig::default())
        }
    }
}

async fn report_connections(
    tcp: Arc<TcpTransport>,
    serial: Option<Arc<SerialGateLink>>,
    frame_stats: Option<Arc<Mutex<FrameStats>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(DIAGNOSTICS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let devices: Vec<String> = tcp
            .connected_devices()
            .iter()
            .map(|info| format!("{}@{}", info.device, info.remote_addr))
            .collect();
        info!(
            tcp = ?devices,
            serial_open = ?serial.as_ref().map(|link| link.is_open()),
            "Device connections"
        );
        if let Some(stats) = &frame_stats {
            let stats = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
            info!(
                completed = stats.completed,
                discarded = stats.discarded,
                decoded = stats.decoded,
                suppressed = stats.suppressed,
                average_interval = ?stats.average_interval(),
                "UDP frames"
            );
        }
    }
}

async fn shutdown_signal() {
    tokio::select! {
        _ = ctrl_c() => {},
        _ = terminate() => {},
    }
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
