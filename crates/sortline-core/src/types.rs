use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware endpoint, identified on the wire by a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Sorting conveyor (`S`).
    Sorter,
    /// Zone climate controller (`H`).
    Environment,
    /// RFID access gate (`G`).
    Gate,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [
        DeviceKind::Sorter,
        DeviceKind::Environment,
        DeviceKind::Gate,
    ];

    /// Parse a wire device id.
    ///
    /// # Errors
    /// Returns `Error::UnknownDevice` for anything outside `S`, `H`, `G`.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'S' => Ok(DeviceKind::Sorter),
            'H' => Ok(DeviceKind::Environment),
            'G' => Ok(DeviceKind::Gate),
            other => Err(Error::UnknownDevice(other)),
        }
    }

    #[must_use]
    pub fn to_char(self) -> char {
        match self {
            DeviceKind::Sorter => 'S',
            DeviceKind::Environment => 'H',
            DeviceKind::Gate => 'G',
        }
    }

    /// Event category used when broadcasting on behalf of this device.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            DeviceKind::Sorter => "sorter",
            DeviceKind::Environment => "environment",
            DeviceKind::Gate => "access",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DeviceKind::Sorter => "sorter",
            DeviceKind::Environment => "environment",
            DeviceKind::Gate => "gate",
        };
        write!(f, "{name}")
    }
}

/// Second byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Event,
    Command,
    Response,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Event,
        MessageKind::Command,
        MessageKind::Response,
        MessageKind::Error,
    ];

    /// Parse a wire message type.
    ///
    /// # Errors
    /// Returns `Error::UnknownMessageKind` for anything outside `E`, `C`, `R`, `X`.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'E' => Ok(MessageKind::Event),
            'C' => Ok(MessageKind::Command),
            'R' => Ok(MessageKind::Response),
            'X' => Ok(MessageKind::Error),
            other => Err(Error::UnknownMessageKind(other)),
        }
    }

    #[must_use]
    pub fn to_char(self) -> char {
        match self {
            MessageKind::Event => 'E',
            MessageKind::Command => 'C',
            MessageKind::Response => 'R',
            MessageKind::Error => 'X',
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Warehouse storage area. `E` is the error bucket for unroutable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    /// Frozen storage.
    A,
    /// Refrigerated storage.
    B,
    /// Ambient storage.
    C,
    /// Error bucket.
    E,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::A, Zone::B, Zone::C, Zone::E];

    /// Resolve a barcode zone code or zone letter.
    ///
    /// Digits `1`, `2`, `3`, `0` map to `A`, `B`, `C`, `E`; the letters
    /// themselves pass through unchanged.
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            '1' | 'A' => Some(Zone::A),
            '2' | 'B' => Some(Zone::B),
            '3' | 'C' => Some(Zone::C),
            '0' | 'E' => Some(Zone::E),
            _ => None,
        }
    }

    /// Like [`Zone::from_code`] but unrecognized input lands in [`Zone::E`].
    #[must_use]
    pub fn from_code_or_error(s: &str) -> Self {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Zone::from_code(c).unwrap_or(Zone::E),
            _ => Zone::E,
        }
    }

    #[must_use]
    pub fn to_char(self) -> char {
        match self {
            Zone::A => 'A',
            Zone::B => 'B',
            Zone::C => 'C',
            Zone::E => 'E',
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

impl std::str::FromStr for Zone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Zone::from_code(c).ok_or_else(|| Error::UnknownZone(s.to_string())),
            _ => Err(Error::UnknownZone(s.to_string())),
        }
    }
}

/// Temperature class of a climate zone. Only room-temperature zones may heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimateClass {
    Frozen,
    Refrigerated,
    RoomTemperature,
}

impl ClimateClass {
    #[must_use]
    pub fn allows_heating(self) -> bool {
        matches!(self, ClimateClass::RoomTemperature)
    }
}
