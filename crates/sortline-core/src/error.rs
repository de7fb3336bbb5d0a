use thiserror::Error;

use crate::types::{DeviceKind, Zone};

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Malformed frame: {0}")]
    Protocol(String),

    #[error("Unknown device id: {0:?}")]
    UnknownDevice(char),

    #[error("Unknown message kind: {0:?}")]
    UnknownMessageKind(char),

    #[error("Unexpected payload for {device}: {payload:?}")]
    UnexpectedPayload { device: DeviceKind, payload: String },

    // Validation errors
    #[error("Unknown zone: {0}")]
    UnknownZone(String),

    #[error("Target {value} for zone {zone} outside [{min}, {max}]")]
    TargetOutOfRange {
        zone: Zone,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    // Communication errors
    #[error("Device {0} not connected")]
    NotConnected(DeviceKind),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Logically inconsistent but non-fatal event.
    #[error("Anomaly: {0}")]
    Anomaly(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn anomaly(message: impl Into<String>) -> Self {
        Self::Anomaly(message.into())
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout(operation.into())
    }

    /// True for errors that only warrant a warning in the dispatch path.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
