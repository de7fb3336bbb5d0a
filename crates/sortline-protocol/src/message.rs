use serde::{Deserialize, Serialize};
use sortline_core::constants::MIN_FRAME_LENGTH;
use sortline_core::{DeviceKind, Error, MessageKind, Result};
use std::fmt;

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMessage {
    pub device: DeviceKind,
    pub kind: MessageKind,
    pub payload: String,
}

impl DeviceMessage {
    pub fn new(device: DeviceKind, kind: MessageKind, payload: impl Into<String>) -> Self {
        DeviceMessage {
            device,
            kind,
            payload: payload.into(),
        }
    }

    pub fn command(device: DeviceKind, payload: impl Into<String>) -> Self {
        Self::new(device, MessageKind::Command, payload)
    }

    pub fn event(device: DeviceKind, payload: impl Into<String>) -> Self {
        Self::new(device, MessageKind::Event, payload)
    }

    /// Wire form including the trailing newline.
    pub fn to_line(&self) -> String {
        encode(self.device, self.kind, &self.payload)
    }
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.device.to_char(),
            self.kind.to_char(),
            self.payload
        )
    }
}

/// Build a wire line: `{device}{kind}{payload}\n`.
///
/// ```
/// use sortline_core::{DeviceKind, MessageKind};
/// use sortline_protocol::encode;
///
/// assert_eq!(encode(DeviceKind::Sorter, MessageKind::Command, "st"), "SCst\n");
/// ```
pub fn encode(device: DeviceKind, kind: MessageKind, payload: &str) -> String {
    let mut line = String::with_capacity(payload.len() + 3);
    line.push(device.to_char());
    line.push(kind.to_char());
    line.push_str(payload);
    line.push('\n');
    line
}

/// Parse one wire line. A trailing `\n` (and `\r`) is tolerated.
///
/// # Errors
/// - `Error::Protocol` when fewer than two characters remain after trimming
/// - `Error::UnknownDevice` / `Error::UnknownMessageKind` for ids outside the
///   closed enumerations
///
/// ```
/// use sortline_core::{DeviceKind, MessageKind};
/// use sortline_protocol::decode;
///
/// let msg = decode("HEtp-20.5;3.1;21.0\n").unwrap();
/// assert_eq!(msg.device, DeviceKind::Environment);
/// assert_eq!(msg.kind, MessageKind::Event);
/// assert_eq!(msg.payload, "tp-20.5;3.1;21.0");
/// ```
pub fn decode(raw: &str) -> Result<DeviceMessage> {
    let line = raw.trim_end_matches(['\n', '\r']);

    let mut chars = line.chars();
    let (Some(device), Some(kind)) = (chars.next(), chars.next()) else {
        return Err(Error::protocol(format!(
            "frame shorter than {MIN_FRAME_LENGTH} characters: {line:?}"
        )));
    };

    Ok(DeviceMessage {
        device: DeviceKind::from_char(device)?,
        kind: MessageKind::from_char(kind)?,
        payload: chars.as_str().to_string(),
    })
}
