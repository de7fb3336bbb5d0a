//! Zone climate controller payloads.
//!
//! | Direction | Payload | Meaning |
//! |-----------|---------|---------|
//! | event | `tp<t1>;<t2>;<t3>` | temperatures in configured zone order |
//! | event | `w<zone>{0\|1}` | warning cleared / raised |
//! | event | `<zone><C\|H\|0><speed>` | fan mode and speed |
//! | command | `p<zone><temp>` | set target temperature (integer) |

use serde::{Deserialize, Serialize};
use sortline_core::{DeviceKind, Error, Result, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Off,
    Cool,
    Heat,
}

impl FanMode {
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'C' => Some(FanMode::Cool),
            'H' => Some(FanMode::Heat),
            '0' => Some(FanMode::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvEvent {
    /// One entry per reading; `None` where the text was not a number.
    Telemetry(Vec<Option<f64>>),
    Warning { zone: Zone, active: bool },
    Fan { zone: Zone, mode: FanMode, speed: u8 },
}

/// Highest fan speed the controllers report.
pub const MAX_FAN_SPEED: u8 = 3;

impl EnvEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        if let Some(readings) = payload.strip_prefix("tp") {
            let values = readings
                .split(';')
                .map(|raw| raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
                .collect();
            return Ok(EnvEvent::Telemetry(values));
        }

        if let Some(rest) = payload.strip_prefix('w') {
            let mut chars = rest.chars();
            let zone = chars.next().and_then(Zone::from_code);
            let flag = chars.next();
            return match (zone, flag, chars.next()) {
                (Some(zone), Some('1'), None) => Ok(EnvEvent::Warning { zone, active: true }),
                (Some(zone), Some('0'), None) => Ok(EnvEvent::Warning { zone, active: false }),
                _ => Err(unexpected(payload)),
            };
        }

        let mut chars = payload.chars();
        let zone = chars.next().and_then(Zone::from_code);
        let mode = chars.next().and_then(FanMode::from_code);
        let speed = chars.next().and_then(|c| c.to_digit(10));
        match (zone, mode, speed, chars.next()) {
            (Some(zone), Some(mode), Some(speed), None) if speed <= u32::from(MAX_FAN_SPEED) => {
                Ok(EnvEvent::Fan {
                    zone,
                    mode,
                    speed: speed as u8,
                })
            }
            _ => Err(unexpected(payload)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvCommand {
    SetTarget { zone: Zone, value: i32 },
}

impl EnvCommand {
    pub fn payload(&self) -> String {
        match self {
            EnvCommand::SetTarget { zone, value } => format!("p{zone}{value}"),
        }
    }

    /// Parse a set-target command. Fractional values are accepted here and
    /// validated by the controller.
    pub fn parse_target(payload: &str) -> Result<(Zone, f64)> {
        let rest = payload.strip_prefix('p').ok_or_else(|| unexpected(payload))?;
        let mut chars = rest.chars();
        let zone = chars
            .next()
            .and_then(Zone::from_code)
            .ok_or_else(|| Error::UnknownZone(rest.to_string()))?;
        let value = chars
            .as_str()
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::validation(format!("bad temperature in {payload:?}")))?;
        Ok((zone, value))
    }
}

fn unexpected(payload: &str) -> Error {
    Error::UnexpectedPayload {
        device: DeviceKind::Environment,
        payload: payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_telemetry() {
        let event = EnvEvent::parse("tp-20.5;3.1;21").unwrap();
        assert_eq!(
            event,
            EnvEvent::Telemetry(vec![Some(-20.5), Some(3.1), Some(21.0)])
        );
    }

    #[test]
    fn test_telemetry_with_garbage_entry() {
        let event = EnvEvent::parse("tp-20.5;abc;NaN").unwrap();
        assert_eq!(event, EnvEvent::Telemetry(vec![Some(-20.5), None, None]));
    }

    #[rstest]
    #[case("wA1", Zone::A, true)]
    #[case("wC0", Zone::C, false)]
    fn test_warning(#[case] payload: &str, #[case] zone: Zone, #[case] active: bool) {
        assert_eq!(
            EnvEvent::parse(payload).unwrap(),
            EnvEvent::Warning { zone, active }
        );
    }

    #[rstest]
    #[case("AC2", Zone::A, FanMode::Cool, 2)]
    #[case("CH3", Zone::C, FanMode::Heat, 3)]
    #[case("B00", Zone::B, FanMode::Off, 0)]
    fn test_fan(
        #[case] payload: &str,
        #[case] zone: Zone,
        #[case] mode: FanMode,
        #[case] speed: u8,
    ) {
        assert_eq!(
            EnvEvent::parse(payload).unwrap(),
            EnvEvent::Fan { zone, mode, speed }
        );
    }

    #[rstest]
    #[case("wA")]
    #[case("wA2")]
    #[case("AX1")]
    #[case("AC9")]
    #[case("AC")]
    #[case("QC1")]
    fn test_malformed(#[case] payload: &str) {
        assert!(EnvEvent::parse(payload).is_err());
    }

    #[test]
    fn test_set_target_command() {
        let command = EnvCommand::SetTarget {
            zone: Zone::A,
            value: -20,
        };
        assert_eq!(command.payload(), "pA-20");
        assert_eq!(EnvCommand::parse_target("pA-20").unwrap(), (Zone::A, -20.0));
        assert!(EnvCommand::parse_target("pQ5").is_err());
        assert!(EnvCommand::parse_target("pBx").is_err());
    }
}
