//! Sorting conveyor payloads.
//!
//! | Direction | Payload | Meaning |
//! |-----------|---------|---------|
//! | event | `ir1` | infeed sensor tripped |
//! | event | `bc<barcode>` | barcode read at the scanner |
//! | event | `ss<zone>` | item dropped into a zone |
//! | command | `st` / `sp` / `ps` | start / stop / pause |
//! | command | `so<zone>` | divert the next item to a zone |

use sortline_core::{DeviceKind, Error, Result, Zone};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SorterEvent {
    SensorTrip,
    Barcode(String),
    /// Raw zone text; unknown values are coerced by the controller.
    SortComplete(String),
}

impl SorterEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        if payload.starts_with("ir") {
            Ok(SorterEvent::SensorTrip)
        } else if let Some(code) = payload.strip_prefix("bc") {
            Ok(SorterEvent::Barcode(code.to_string()))
        } else if let Some(zone) = payload.strip_prefix("ss") {
            Ok(SorterEvent::SortComplete(zone.to_string()))
        } else {
            Err(Error::UnexpectedPayload {
                device: DeviceKind::Sorter,
                payload: payload.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SorterCommand {
    Start,
    Stop,
    Pause,
    SortTo(Zone),
}

impl SorterCommand {
    pub fn payload(&self) -> String {
        match self {
            SorterCommand::Start => "st".to_string(),
            SorterCommand::Stop => "sp".to_string(),
            SorterCommand::Pause => "ps".to_string(),
            SorterCommand::SortTo(zone) => format!("so{zone}"),
        }
    }

    pub fn parse(payload: &str) -> Result<Self> {
        match payload {
            "st" => Ok(SorterCommand::Start),
            "sp" => Ok(SorterCommand::Stop),
            "ps" => Ok(SorterCommand::Pause),
            other => match other.strip_prefix("so") {
                Some(zone) => Ok(SorterCommand::SortTo(zone.parse()?)),
                None => Err(Error::UnexpectedPayload {
                    device: DeviceKind::Sorter,
                    payload: payload.to_string(),
                }),
            },
        }
    }
}
