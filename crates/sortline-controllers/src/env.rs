//! Multi-zone climate control.
//!
//! Holds one [`ZoneEnvState`] per configured zone, in configuration order.
//! Telemetry lines list temperatures in that same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sortline_core::{ClimateClass, DeviceKind, Error, Result, Zone, ZoneConfig};
use sortline_network::DeviceTransport;
use sortline_protocol::commands::{EnvCommand, EnvEvent, FanMode};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::DeviceController;
use crate::ports::{EventSink, Repository};

const CATEGORY: &str = "environment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneCondition {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEnvState {
    pub zone: Zone,
    pub climate: ClimateClass,
    pub current_temp: Option<f64>,
    pub target_temp: f64,
    pub min: f64,
    pub max: f64,
    pub state: ZoneCondition,
    pub fan_mode: FanMode,
    pub fan_speed: u8,
}

impl ZoneEnvState {
    fn from_config(config: &ZoneConfig, target: f64) -> Self {
        Self {
            zone: config.zone,
            climate: config.climate,
            current_temp: None,
            target_temp: target,
            min: config.min,
            max: config.max,
            state: ZoneCondition::Normal,
            fan_mode: FanMode::Off,
            fan_speed: 0,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.state == ZoneCondition::Warning
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Result of an accepted target change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAccepted {
    pub zone: Zone,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Whether the set-point command reached the transport.
    pub sent: bool,
}

pub struct EnvController {
    transport: Arc<dyn DeviceTransport>,
    events: Arc<dyn EventSink>,
    repository: Arc<dyn Repository>,
    zones: Vec<ZoneEnvState>,
}

impl EnvController {
    /// Build the zone table, restoring persisted targets where present.
    pub fn new(
        zones: &[ZoneConfig],
        transport: Arc<dyn DeviceTransport>,
        events: Arc<dyn EventSink>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        let zones = zones
            .iter()
            .map(|config| {
                let target = match repository.get_target_temp(config.zone) {
                    Ok(Some(stored)) if config.contains(stored) => stored,
                    Ok(Some(stored)) => {
                        warn!(
                            zone = %config.zone,
                            stored,
                            "Stored target outside range; using default"
                        );
                        config.default_target
                    }
                    Ok(None) => config.default_target,
                    Err(e) => {
                        warn!(
                            zone = %config.zone,
                            error = %e,
                            "Failed to load target; using default"
                        );
                        config.default_target
                    }
                };
                ZoneEnvState::from_config(config, target)
            })
            .collect();

        Self {
            transport,
            events,
            repository,
            zones,
        }
    }

    pub fn zones(&self) -> &[ZoneEnvState] {
        &self.zones
    }

    pub fn zone_state(&self, zone: Zone) -> Option<&ZoneEnvState> {
        self.zones.iter().find(|state| state.zone == zone)
    }

    fn zone_mut(&mut self, zone: Zone) -> Result<&mut ZoneEnvState> {
        self.zones
            .iter_mut()
            .find(|state| state.zone == zone)
            .ok_or_else(|| Error::UnknownZone(zone.to_string()))
    }

    /// Validate and apply a new target temperature.
    ///
    /// # Errors
    ///
    /// `Error::UnknownZone` for a zone that is not configured and
    /// `Error::TargetOutOfRange` outside the zone's `[min, max]`. State is
    /// untouched in both cases.
    pub fn set_target_temperature(&mut self, zone: Zone, value: f64) -> Result<TargetAccepted> {
        let state = self.zone_mut(zone)?;
        if !value.is_finite() || !state.contains(value) {
            return Err(Error::TargetOutOfRange {
                zone,
                value,
                min: state.min,
                max: state.max,
            });
        }
        state.target_temp = value;

        let command = EnvCommand::SetTarget {
            zone,
            value: value.round() as i32,
        };
        let sent = self.transport.send(DeviceKind::Environment, &command.payload());
        if !sent {
            warn!(zone = %zone, value, "Set-point command not sent");
        }
        if let Err(e) = self.repository.save_target_temp(zone, value) {
            warn!(zone = %zone, error = %e, "Failed to persist target");
        }

        let accepted = TargetAccepted {
            zone,
            value,
            timestamp: Utc::now(),
            sent,
        };
        info!(zone = %zone, value, "Target temperature set");
        self.events.broadcast(
            CATEGORY,
            "target_update",
            json!({ "zone": zone, "target": value, "timestamp": accepted.timestamp }),
        );
        Ok(accepted)
    }

    /// Apply one reading per configured zone. `None` entries are skipped.
    pub fn ingest_telemetry(&mut self, readings: &[Option<f64>]) {
        if readings.len() > self.zones.len() {
            debug!(
                readings = readings.len(),
                zones = self.zones.len(),
                "Extra telemetry entries ignored"
            );
        }

        for (index, reading) in readings.iter().enumerate().take(self.zones.len()) {
            let Some(value) = *reading else {
                warn!(index, "Malformed temperature reading skipped");
                continue;
            };

            let state = &mut self.zones[index];
            if state.current_temp == Some(value) {
                continue;
            }
            state.current_temp = Some(value);
            let zone = state.zone;
            let target = state.target_temp;
            let condition = state.state;

            if condition == ZoneCondition::Warning {
                if let Err(e) = self.repository.log_warning(zone, value) {
                    warn!(zone = %zone, error = %e, "Failed to log warning temperature");
                }
            }

            self.events.broadcast(
                CATEGORY,
                "temperature_update",
                json!({
                    "zone": zone,
                    "temperature": value,
                    "target": target,
                    "state": condition,
                }),
            );
        }
    }

    pub fn set_warning(&mut self, zone: Zone, active: bool) -> Result<()> {
        let state = self.zone_mut(zone)?;
        state.state = if active {
            ZoneCondition::Warning
        } else {
            ZoneCondition::Normal
        };
        let temperature = state.current_temp;

        if active {
            warn!(zone = %zone, temperature = ?temperature, "Zone warning raised");
            if let Some(temperature) = temperature {
                if let Err(e) = self.repository.log_warning(zone, temperature) {
                    warn!(zone = %zone, error = %e, "Failed to log warning temperature");
                }
            }
        } else {
            info!(zone = %zone, "Zone warning cleared");
        }

        self.events.broadcast(
            CATEGORY,
            "warehouse_warning",
            json!({ "zone": zone, "warning": active, "temperature": temperature }),
        );
        Ok(())
    }

    /// Record fan status. Heating is only honored for room-temperature zones,
    /// and an idle fan always reports speed 0.
    pub fn set_fan(&mut self, zone: Zone, mode: FanMode, speed: u8) -> Result<()> {
        let state = self.zone_mut(zone)?;
        let mode = match mode {
            FanMode::Heat if !state.climate.allows_heating() => {
                debug!(zone = %zone, "Heat reported for non-ambient zone; treating as off");
                FanMode::Off
            }
            other => other,
        };
        let speed = if mode == FanMode::Off { 0 } else { speed };

        state.fan_mode = mode;
        state.fan_speed = speed;
        self.events.broadcast(
            CATEGORY,
            "fan_status",
            json!({ "zone": zone, "mode": mode, "speed": speed }),
        );
        Ok(())
    }
}

impl DeviceController for EnvController {
    fn device(&self) -> DeviceKind {
        DeviceKind::Environment
    }

    fn handle_event(&mut self, payload: &str) -> Result<()> {
        match EnvEvent::parse(payload)? {
            EnvEvent::Telemetry(readings) => {
                self.ingest_telemetry(&readings);
                Ok(())
            }
            EnvEvent::Warning { zone, active } => self.set_warning(zone, active),
            EnvEvent::Fan { zone, mode, speed } => self.set_fan(zone, mode, speed),
        }
    }

    fn handle_command(&mut self, payload: &str) -> Result<()> {
        let (zone, value) = EnvCommand::parse_target(payload)?;
        self.set_target_temperature(zone, value).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ChannelEventSink, MemoryRepository};
    use rstest::rstest;
    use sortline_core::RigConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Hvac {
        sent: Mutex<Vec<String>>,
    }

    impl DeviceTransport for Hvac {
        fn send(&self, _device: DeviceKind, payload: &str) -> bool {
            self.sent.lock().unwrap().push(payload.to_string());
            true
        }

        fn is_connected(&self, _device: DeviceKind) -> bool {
            true
        }
    }

    fn controller(repo: Arc<MemoryRepository>) -> (EnvController, Arc<Hvac>) {
        let hvac = Arc::new(Hvac::default());
        let env = EnvController::new(
            &RigConfig::default().zones,
            hvac.clone(),
            Arc::new(ChannelEventSink::new(32)),
            repo,
        );
        (env, hvac)
    }

    #[test]
    fn test_targets_restored_from_repository() {
        let repo = Arc::new(MemoryRepository::new().with_target(Zone::A, -25.0));
        let (env, _) = controller(repo);

        assert_eq!(env.zone_state(Zone::A).unwrap().target_temp, -25.0);
        assert_eq!(env.zone_state(Zone::B).unwrap().target_temp, 4.0);
    }

    #[test]
    fn test_set_target_accepts_in_range() {
        let repo = Arc::new(MemoryRepository::new());
        let (mut env, hvac) = controller(repo.clone());

        let accepted = env.set_target_temperature(Zone::A, -22.4).unwrap();

        assert_eq!(accepted.value, -22.4);
        assert!(accepted.sent);
        assert_eq!(*hvac.sent.lock().unwrap(), vec!["pA-22"]);
        assert_eq!(repo.get_target_temp(Zone::A).unwrap(), Some(-22.4));
        assert_eq!(env.zone_state(Zone::A).unwrap().target_temp, -22.4);
    }

    #[rstest]
    #[case(Zone::A, -40.0)]
    #[case(Zone::A, -10.0)]
    #[case(Zone::C, 30.0)]
    fn test_set_target_out_of_range(#[case] zone: Zone, #[case] value: f64) {
        let repo = Arc::new(MemoryRepository::new());
        let (mut env, hvac) = controller(repo.clone());
        let before = env.zones().to_vec();

        let err = env.set_target_temperature(zone, value).unwrap_err();

        assert!(matches!(err, Error::TargetOutOfRange { .. }));
        assert_eq!(env.zones(), before.as_slice());
        assert!(hvac.sent.lock().unwrap().is_empty());
        assert_eq!(repo.get_target_temp(zone).unwrap(), None);
    }

    #[test]
    fn test_set_target_unknown_zone() {
        let (mut env, _) = controller(Arc::new(MemoryRepository::new()));
        assert!(matches!(
            env.set_target_temperature(Zone::E, 0.0),
            Err(Error::UnknownZone(_))
        ));
    }

    #[test]
    fn test_telemetry_updates_on_change_only() {
        let repo = Arc::new(MemoryRepository::new());
        let (mut env, _) = controller(repo.clone());

        env.handle_event("tp-20.0;4.0;abc").unwrap();
        assert_eq!(env.zone_state(Zone::A).unwrap().current_temp, Some(-20.0));
        assert_eq!(env.zone_state(Zone::C).unwrap().current_temp, None);

        env.set_warning(Zone::A, true).unwrap();
        assert_eq!(repo.warnings().len(), 1);

        env.handle_event("tp-20.0;4.0;21.0").unwrap();
        assert_eq!(repo.warnings().len(), 1);

        env.handle_event("tp-17.5;4.0;21.0").unwrap();
        let warnings = repo.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[1].temperature, -17.5);
    }

    #[test]
    fn test_warning_toggles_state() {
        let (mut env, _) = controller(Arc::new(MemoryRepository::new()));

        env.handle_event("wB1").unwrap();
        assert!(env.zone_state(Zone::B).unwrap().is_warning());
        env.handle_event("wB0").unwrap();
        assert!(!env.zone_state(Zone::B).unwrap().is_warning());
    }

    #[rstest]
    #[case("AH2", Zone::A, FanMode::Off, 0)]
    #[case("CH2", Zone::C, FanMode::Heat, 2)]
    #[case("BC3", Zone::B, FanMode::Cool, 3)]
    #[case("C02", Zone::C, FanMode::Off, 0)]
    fn test_fan_status(
        #[case] payload: &str,
        #[case] zone: Zone,
        #[case] mode: FanMode,
        #[case] speed: u8,
    ) {
        let (mut env, _) = controller(Arc::new(MemoryRepository::new()));

        env.handle_event(payload).unwrap();

        let state = env.zone_state(zone).unwrap();
        assert_eq!(state.fan_mode, mode);
        assert_eq!(state.fan_speed, speed);
    }

    #[test]
    fn test_command_channel_sets_target() {
        let (mut env, hvac) = controller(Arc::new(MemoryRepository::new()));

        env.handle_command("pC22").unwrap();
        assert_eq!(env.zone_state(Zone::C).unwrap().target_temp, 22.0);
        assert_eq!(*hvac.sent.lock().unwrap(), vec!["pC22"]);

        assert!(env.handle_command("pC99").is_err());
        assert!(env.handle_command("pQ1").is_err());
    }
}
