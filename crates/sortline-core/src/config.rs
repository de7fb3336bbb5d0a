//! Rig configuration.
//!
//! The daemon builds one [`RigConfig`] at startup, usually from a JSON file,
//! and hands the relevant section to each transport and controller. Every
//! field has a default so a partial file (or no file at all) is valid.
//!
//! ```
//! use sortline_core::{RigConfig, TcpMode, Zone};
//!
//! let config = RigConfig::from_json(r#"{ "sorter": { "auto_stop_timeout_secs": 10 } }"#).unwrap();
//! assert_eq!(config.sorter.auto_stop_timeout_secs, 10);
//! assert!(matches!(config.tcp.mode, TcpMode::Single { .. }));
//! assert!(config.zone(Zone::A).is_some());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_AUTO_STOP_TIMEOUT_SECS, DEFAULT_DEBOUNCE_MS, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_WRITE_TIMEOUT_SECS, MAX_LINE_LENGTH, POLL_INTERVAL_MS,
};
use crate::{ClimateClass, DeviceKind, Error, Result, Zone};

/// Top-level configuration for the whole rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
    pub serial: SerialConfig,
    pub sorter: SorterConfig,
    pub gate: GateConfig,
    pub zones: Vec<ZoneConfig>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            tcp: TcpConfig::default(),
            udp: UdpConfig::default(),
            serial: SerialConfig::default(),
            sorter: SorterConfig::default(),
            gate: GateConfig::default(),
            zones: default_zones(),
        }
    }
}

impl RigConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: RigConfig = serde_json::from_str(json)?;
        if config.zones.is_empty() {
            config.zones = default_zones();
        }
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Reject configurations the controllers cannot honor.
    ///
    /// # Errors
    /// Returns `Error::Config` on duplicate zones, inverted ranges, defaults
    /// outside their range, or the error bucket configured as a climate zone.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for zone in &self.zones {
            if zone.zone == Zone::E {
                return Err(Error::Config("zone E cannot be climate controlled".into()));
            }
            if !seen.insert(zone.zone) {
                return Err(Error::Config(format!("zone {} configured twice", zone.zone)));
            }
            if zone.min > zone.max {
                return Err(Error::Config(format!(
                    "zone {}: min {} exceeds max {}",
                    zone.zone, zone.min, zone.max
                )));
            }
            if !zone.contains(zone.default_target) {
                return Err(Error::Config(format!(
                    "zone {}: default target {} outside [{}, {}]",
                    zone.zone, zone.default_target, zone.min, zone.max
                )));
            }
        }
        if let TcpMode::PerDevice { ports } = &self.tcp.mode {
            if ports.is_empty() {
                return Err(Error::Config("per_device mode needs at least one port".into()));
            }
        }
        Ok(())
    }

    pub fn zone(&self, zone: Zone) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.zone == zone)
    }
}

/// How device connections are told apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpMode {
    /// All devices share one port; identity comes from the first byte of each line.
    Single { bind_addr: SocketAddr },
    /// One listening port per device; identity comes from the port.
    PerDevice { ports: BTreeMap<DeviceKind, SocketAddr> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub mode: TcpMode,
    pub max_line_length: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mode: TcpMode::Single {
                bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            },
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
    pub debounce_ms: u64,
}

impl UdpConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: POLL_INTERVAL_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub auto_stop_timeout_secs: u64,
}

impl SorterConfig {
    pub fn auto_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.auto_stop_timeout_secs)
    }
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            auto_stop_timeout_secs: DEFAULT_AUTO_STOP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub write_timeout_secs: u64,
}

impl GateConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
        }
    }
}

/// Climate limits for one warehouse zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zone: Zone,
    pub min: f64,
    pub max: f64,
    pub default_target: f64,
    pub climate: ClimateClass,
}

impl ZoneConfig {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn default_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig {
            zone: Zone::A,
            min: -30.0,
            max: -18.0,
            default_target: -20.0,
            climate: ClimateClass::Frozen,
        },
        ZoneConfig {
            zone: Zone::B,
            min: 0.0,
            max: 10.0,
            default_target: 4.0,
            climate: ClimateClass::Refrigerated,
        },
        ZoneConfig {
            zone: Zone::C,
            min: 15.0,
            max: 25.0,
            default_target: 20.0,
            climate: ClimateClass::RoomTemperature,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RigConfig::default();
        config.validate().unwrap();
        assert_eq!(config.zone(Zone::A).unwrap().min, -30.0);
        assert_eq!(config.sorter.auto_stop_timeout(), Duration::from_secs(30));
        assert_eq!(config.gate.write_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_empty_document_gets_default_zones() {
        let config = RigConfig::from_json("{}").unwrap();
        assert_eq!(config.zones.len(), 3);
        assert!(config.zone(Zone::E).is_none());
    }

    #[test]
    fn test_per_device_mode() {
        let config = RigConfig::from_json(
            r#"{ "tcp": { "mode": { "per_device": { "ports": {
                "sorter": "127.0.0.1:9001",
                "environment": "127.0.0.1:9002"
            } } } } }"#,
        )
        .unwrap();

        let TcpMode::PerDevice { ports } = config.tcp.mode else {
            panic!("expected per-device mode");
        };
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[&DeviceKind::Sorter].port(), 9001);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let result = RigConfig::from_json(
            r#"{ "zones": [ { "zone": "A", "min": 5.0, "max": -5.0, "default_target": 0.0, "climate": "frozen" } ] }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_zone() {
        let result = RigConfig::from_json(
            r#"{ "zones": [
                { "zone": "B", "min": 0.0, "max": 10.0, "default_target": 4.0, "climate": "refrigerated" },
                { "zone": "B", "min": 0.0, "max": 10.0, "default_target": 4.0, "climate": "refrigerated" }
            ] }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_error_zone() {
        let result = RigConfig::from_json(
            r#"{ "zones": [ { "zone": "E", "min": 0.0, "max": 10.0, "default_target": 4.0, "climate": "refrigerated" } ] }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
