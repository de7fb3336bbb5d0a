//! Shared vocabulary for the sortline control plane.
//!
//! Every other crate in the workspace speaks in terms of the closed
//! enumerations defined here (devices, message kinds, zones), reports
//! failures through [`Error`], and reads its tunables from [`RigConfig`].

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{
    GateConfig, RigConfig, SerialConfig, SorterConfig, TcpConfig, TcpMode, UdpConfig, ZoneConfig,
};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
