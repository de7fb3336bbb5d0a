//! Sorting conveyor state machine.
//!
//! # States
//!
//! - `Stopped`: belt idle
//! - `Running`: belt moving, idle timer armed
//!
//! # Transitions
//!
//! - Stopped → Running: start command, or an infeed sensor trip
//! - Running → Stopped: stop or pause command
//! - Running → Stopped: no items waiting and no activity for the auto-stop
//!   timeout; a physical stop (`sp`) is sent exactly once
//!
//! Every state-relevant event broadcasts a `sorter/status` event carrying a
//! [`SortStatus`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use sortline_core::{DeviceKind, Error, Result, SorterConfig, Zone};
use sortline_network::DeviceTransport;
use sortline_protocol::commands::{SorterCommand, SorterEvent};
use sortline_protocol::parse_barcode;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::DeviceController;
use crate::ports::EventSink;
use crate::timer::ScheduledTimer;

const CATEGORY: &str = "sorter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortState {
    Stopped,
    Running,
}

/// Snapshot broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortStatus {
    pub is_running: bool,
    pub items_waiting: u32,
    pub items_processed: u64,
    pub sort_counts: BTreeMap<Zone, u64>,
}

pub struct SortController {
    transport: Arc<dyn DeviceTransport>,
    events: Arc<dyn EventSink>,
    state: SortState,
    items_waiting: u32,
    items_processed: u64,
    sort_counts: BTreeMap<Zone, u64>,
    idle_timer: ScheduledTimer,
}

impl SortController {
    pub fn new(
        config: &SorterConfig,
        transport: Arc<dyn DeviceTransport>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            transport,
            events,
            state: SortState::Stopped,
            items_waiting: 0,
            items_processed: 0,
            sort_counts: Zone::ALL.iter().map(|zone| (*zone, 0)).collect(),
            idle_timer: ScheduledTimer::new(config.auto_stop_timeout()),
        }
    }

    pub fn state(&self) -> SortState {
        self.state
    }

    pub fn status(&self) -> SortStatus {
        SortStatus {
            is_running: self.state == SortState::Running,
            items_waiting: self.items_waiting,
            items_processed: self.items_processed,
            sort_counts: self.sort_counts.clone(),
        }
    }

    /// Start the belt. Already running is a success.
    pub fn start(&mut self) -> bool {
        if self.state == SortState::Running {
            return true;
        }
        if !self.send(SorterCommand::Start) {
            return false;
        }
        self.enter_running();
        true
    }

    /// Stop the belt. Already stopped is a success.
    pub fn stop(&mut self) -> bool {
        self.halt(SorterCommand::Stop)
    }

    pub fn pause(&mut self) -> bool {
        self.halt(SorterCommand::Pause)
    }

    /// Divert the next item to `zone`.
    pub fn sort_to(&mut self, zone: Zone) -> bool {
        let sent = self.send(SorterCommand::SortTo(zone));
        if sent {
            self.touch();
        }
        sent
    }

    fn halt(&mut self, command: SorterCommand) -> bool {
        if self.state == SortState::Stopped {
            return true;
        }
        if !self.send(command) {
            return false;
        }
        self.enter_stopped();
        true
    }

    fn on_sensor_trip(&mut self) {
        self.items_waiting += 1;
        if self.state == SortState::Stopped {
            if !self.send(SorterCommand::Start) {
                warn!("Sensor trip while stopped but start command could not be sent");
            }
            self.enter_running();
        } else {
            self.touch();
            self.broadcast_status();
        }
    }

    fn on_sort_complete(&mut self, raw_zone: &str) -> Result<()> {
        if self.items_waiting == 0 {
            return Err(Error::anomaly(format!(
                "sort complete in zone {raw_zone:?} with no items waiting"
            )));
        }

        let zone = Zone::from_code_or_error(raw_zone);
        if zone == Zone::E && raw_zone.trim() != "E" && raw_zone.trim() != "0" {
            debug!(zone = raw_zone, "Unrecognized zone counted as error bucket");
        }

        self.items_waiting -= 1;
        self.items_processed += 1;
        *self.sort_counts.entry(zone).or_insert(0) += 1;
        self.touch();
        self.broadcast_status();
        Ok(())
    }

    fn on_barcode(&mut self, code: &str) {
        let (zone, payload) = match parse_barcode(code) {
            Ok(barcode) => {
                let payload = json!({
                    "code": code,
                    "valid": true,
                    "zone": barcode.zone,
                    "itemCode": barcode.item_code,
                    "expiry": barcode.expiry,
                });
                (barcode.zone, payload)
            }
            Err(e) => {
                warn!(code, error = %e, "Invalid barcode; routing to error zone");
                (Zone::E, json!({ "code": code, "valid": false, "zone": Zone::E }))
            }
        };

        if !self.sort_to(zone) {
            warn!(code, zone = %zone, "Sort command not sent");
        }
        self.events.broadcast(CATEGORY, "barcode", payload);
    }

    fn enter_running(&mut self) {
        self.state = SortState::Running;
        self.idle_timer.arm();
        info!(items_waiting = self.items_waiting, "Sorter running");
        self.broadcast_status();
    }

    fn enter_stopped(&mut self) {
        self.state = SortState::Stopped;
        self.idle_timer.cancel();
        info!(items_waiting = self.items_waiting, "Sorter stopped");
        self.broadcast_status();
    }

    /// Re-arm the idle timer on activity while running.
    fn touch(&mut self) {
        if self.state == SortState::Running {
            self.idle_timer.arm();
        }
    }

    fn send(&self, command: SorterCommand) -> bool {
        let payload = command.payload();
        let sent = self.transport.send(DeviceKind::Sorter, &payload);
        if !sent {
            debug!(payload, "Sorter not reachable");
        }
        sent
    }

    fn broadcast_status(&self) {
        match serde_json::to_value(self.status()) {
            Ok(payload) => self.events.broadcast(CATEGORY, "status", payload),
            Err(e) => warn!(error = %e, "Failed to serialize sorter status"),
        }
    }
}

impl DeviceController for SortController {
    fn device(&self) -> DeviceKind {
        DeviceKind::Sorter
    }

    fn handle_event(&mut self, payload: &str) -> Result<()> {
        match SorterEvent::parse(payload)? {
            SorterEvent::SensorTrip => self.on_sensor_trip(),
            SorterEvent::Barcode(code) => self.on_barcode(&code),
            SorterEvent::SortComplete(zone) => self.on_sort_complete(&zone)?,
        }
        Ok(())
    }

    fn handle_command(&mut self, payload: &str) -> Result<()> {
        let ok = match SorterCommand::parse(payload)? {
            SorterCommand::Start => self.start(),
            SorterCommand::Stop => self.stop(),
            SorterCommand::Pause => self.pause(),
            SorterCommand::SortTo(zone) => self.sort_to(zone),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::NotConnected(DeviceKind::Sorter))
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.idle_timer.deadline()
    }

    fn on_deadline(&mut self, now: Instant) -> Result<()> {
        if !self.idle_timer.take_expired(now) || self.state != SortState::Running {
            return Ok(());
        }

        if self.items_waiting > 0 {
            debug!(
                items_waiting = self.items_waiting,
                "Idle timeout with items pending; waiting longer"
            );
            self.idle_timer.arm_from(now);
            return Ok(());
        }

        info!("Sorter idle; stopping");
        if !self.send(SorterCommand::Stop) {
            warn!("Auto-stop command could not be sent");
        }
        self.enter_stopped();
        Ok(())
    }
}
