//! RFID gate payloads.
//!
//! The first two payload characters select what the rest means:
//!
//! | Direction | Payload | Meaning |
//! |-----------|---------|---------|
//! | event | `id<uid>;<employeeId>` | card presented in access mode |
//! | event | `wr<uid>;<companyId>` | card presented in register mode |
//! | response | `ok` | last command (card write) completed |
//! | error | `e1`, `e2`, ... | device fault codes |
//! | command | `ac{0\|1}` | deny / allow passage |
//! | command | `md{0\|1}` | access / register mode |
//! | command | `wr<employeeId>` | write a six digit employee id to the card |

use sortline_core::constants::EMPLOYEE_ID_WIDTH;
use sortline_core::{DeviceKind, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    AccessScan {
        uid: String,
        employee_id: Option<String>,
    },
    RegisterScan {
        uid: String,
        company_id: Option<String>,
    },
}

impl GateEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        let (selector, data) = split_selector(payload).ok_or_else(|| unexpected(payload))?;
        let mut parts = data.splitn(2, ';');
        let uid = parts
            .next()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| unexpected(payload))?
            .to_string();
        let extra = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match selector {
            "id" => Ok(GateEvent::AccessScan {
                uid,
                employee_id: extra,
            }),
            "wr" => Ok(GateEvent::RegisterScan {
                uid,
                company_id: extra,
            }),
            _ => Err(unexpected(payload)),
        }
    }
}

/// Outcome reported on `R` and `X` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReply {
    Ok,
    Fault(String),
}

impl GateReply {
    pub fn parse(payload: &str) -> Result<Self> {
        let (selector, _) = split_selector(payload).ok_or_else(|| unexpected(payload))?;
        match selector {
            "ok" => Ok(GateReply::Ok),
            code if code.starts_with('e') => Ok(GateReply::Fault(code.to_string())),
            _ => Err(unexpected(payload)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCommand {
    SetAccess(bool),
    SetRegisterMode(bool),
    WriteCard(String),
}

impl GateCommand {
    pub fn payload(&self) -> String {
        match self {
            GateCommand::SetAccess(allow) => format!("ac{}", u8::from(*allow)),
            GateCommand::SetRegisterMode(register) => format!("md{}", u8::from(*register)),
            GateCommand::WriteCard(employee_id) => format!("wr{}", format_employee_id(employee_id)),
        }
    }

    pub fn parse(payload: &str) -> Result<Self> {
        let (selector, data) = split_selector(payload).ok_or_else(|| unexpected(payload))?;
        match (selector, data) {
            ("ac", "0") => Ok(GateCommand::SetAccess(false)),
            ("ac", "1") => Ok(GateCommand::SetAccess(true)),
            ("md", "0") => Ok(GateCommand::SetRegisterMode(false)),
            ("md", "1") => Ok(GateCommand::SetRegisterMode(true)),
            ("wr", id) if !id.is_empty() => Ok(GateCommand::WriteCard(id.to_string())),
            _ => Err(unexpected(payload)),
        }
    }
}

/// Zero-pad or truncate an employee id to the card's six digits.
///
/// ```
/// use sortline_protocol::commands::format_employee_id;
///
/// assert_eq!(format_employee_id("42"), "000042");
/// assert_eq!(format_employee_id("12345678"), "123456");
/// ```
pub fn format_employee_id(employee_id: &str) -> String {
    let padded = format!("{:0>width$}", employee_id.trim(), width = EMPLOYEE_ID_WIDTH);
    padded.chars().take(EMPLOYEE_ID_WIDTH).collect()
}

fn split_selector(payload: &str) -> Option<(&str, &str)> {
    if payload.len() < 2 || !payload.is_char_boundary(2) {
        return None;
    }
    Some(payload.split_at(2))
}

fn unexpected(payload: &str) -> Error {
    Error::UnexpectedPayload {
        device: DeviceKind::Gate,
        payload: payload.to_string(),
    }
}
