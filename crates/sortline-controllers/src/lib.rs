//! Device controllers for the sortline control plane.
//!
//! Three controllers, each a plain state machine driven by decoded device
//! messages:
//!
//! - [`SortController`]: conveyor start/stop, item accounting, auto-stop
//! - [`EnvController`]: per-zone targets, telemetry, warnings, fans
//! - [`GateController`]: access decisions and card enrollment
//!
//! [`ControllerRuntime`] moves each one onto its own task so every mutation,
//! timer expiry included, happens on a single logical owner.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use sortline_controllers::{ControllerRuntime, SortController, TracingEventSink};
//! use sortline_core::SorterConfig;
//! use sortline_network::{HandlerTable, RoutedTransport};
//!
//! # async fn example() -> sortline_core::Result<()> {
//! let handlers = HandlerTable::new();
//! let transport = Arc::new(RoutedTransport::new());
//! let mut runtime = ControllerRuntime::new();
//!
//! let sorter = runtime.spawn(SortController::new(
//!     &SorterConfig::default(),
//!     transport,
//!     Arc::new(TracingEventSink),
//! ));
//! sorter.register(&handlers);
//!
//! let running = sorter.call(|s| s.start()).await?;
//! println!("started: {running}");
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod controller;
pub mod env;
mod event;
pub mod gate;
mod ports;
mod runtime;
pub mod sort;
mod timer;

pub use controller::DeviceController;
pub use env::{EnvController, TargetAccepted, ZoneCondition, ZoneEnvState};
pub use event::BroadcastEvent;
pub use gate::{GateController, GateMode, GateStatus, PendingEnrollment};
pub use ports::{
    AccessDirectory, AccessLogEntry, ChannelEventSink, EventSink, MemoryDirectory,
    MemoryRepository, Repository, TracingEventSink, WarningRecord,
};
pub use runtime::{ControllerHandle, ControllerRuntime};
pub use sort::{SortController, SortState, SortStatus};
pub use timer::ScheduledTimer;
