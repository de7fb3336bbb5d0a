//! Payload vocabulary per device.
//!
//! Each submodule turns event payloads into typed values and typed commands
//! into payload strings. Payloads exclude the two-byte frame header.

pub mod environment;
pub mod gate;
pub mod sorter;

pub use environment::{EnvCommand, EnvEvent, FanMode};
pub use gate::{GateCommand, GateEvent, GateReply, format_employee_id};
pub use sorter::{SorterCommand, SorterEvent};
