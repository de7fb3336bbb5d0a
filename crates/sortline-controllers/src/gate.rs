//! RFID gate: access decisions and card enrollment.
//!
//! In `Access` mode a scan is checked against the [`AccessDirectory`], the
//! gate is told to open or stay shut, and the attempt is logged. In
//! `Register` mode a scan starts an enrollment: a fresh employee id is
//! written to the card and the controller waits for the gate's `ok`.
//!
//! Enrollment completes exactly once. Either the `ok` response or the write
//! deadline binds the card, whichever comes first; the other one finds the
//! session already completed and does nothing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sortline_core::{DeviceKind, Error, GateConfig, Result};
use sortline_network::DeviceTransport;
use sortline_protocol::commands::{GateCommand, GateEvent, GateReply, format_employee_id};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::DeviceController;
use crate::ports::{AccessDirectory, AccessLogEntry, EventSink, Repository};
use crate::timer::ScheduledTimer;

const CATEGORY: &str = "access";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Access,
    Register,
}

/// How an enrollment was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Response,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEnrollment {
    pub uid: String,
    pub employee_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatus {
    pub mode: GateMode,
    pub pending: Option<PendingEnrollment>,
}

#[derive(Debug)]
struct EnrollmentSession {
    uid: String,
    employee_id: String,
    completed: bool,
}

pub struct GateController {
    transport: Arc<dyn DeviceTransport>,
    events: Arc<dyn EventSink>,
    repository: Arc<dyn Repository>,
    directory: Arc<dyn AccessDirectory>,
    mode: GateMode,
    session: Option<EnrollmentSession>,
    write_timer: ScheduledTimer,
}

impl GateController {
    pub fn new(
        config: &GateConfig,
        transport: Arc<dyn DeviceTransport>,
        events: Arc<dyn EventSink>,
        repository: Arc<dyn Repository>,
        directory: Arc<dyn AccessDirectory>,
    ) -> Self {
        Self {
            transport,
            events,
            repository,
            directory,
            mode: GateMode::Access,
            session: None,
            write_timer: ScheduledTimer::new(config.write_timeout()),
        }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            mode: self.mode,
            pending: self
                .session
                .as_ref()
                .filter(|session| !session.completed)
                .map(|session| PendingEnrollment {
                    uid: session.uid.clone(),
                    employee_id: session.employee_id.clone(),
                }),
        }
    }

    /// Switch the gate between access and register mode.
    ///
    /// The mode only changes if the command reached the transport. Leaving
    /// register mode abandons any enrollment still in progress.
    pub fn set_mode(&mut self, mode: GateMode) -> bool {
        if !self.send(&GateCommand::SetRegisterMode(mode == GateMode::Register)) {
            return false;
        }
        if mode == GateMode::Access {
            self.abandon_session();
        }
        if self.mode != mode {
            info!(mode = ?mode, "Gate mode changed");
        }
        self.mode = mode;
        self.events
            .broadcast(CATEGORY, "mode_changed", json!({ "mode": mode }));
        true
    }

    /// Open or hold the gate directly.
    pub fn set_access(&mut self, allow: bool) -> bool {
        self.send(&GateCommand::SetAccess(allow))
    }

    fn on_access_scan(&mut self, uid: &str, employee_id: Option<&str>) -> Result<()> {
        if self.mode != GateMode::Access {
            debug!(uid, "Access scan while registering; ignored");
            return Ok(());
        }

        let granted = self.directory.authorize(uid, employee_id);
        let sent = self.send(&GateCommand::SetAccess(granted));
        info!(uid, granted, "Access decision");

        let entry = AccessLogEntry {
            uid: uid.to_string(),
            employee_id: employee_id.map(str::to_string),
            granted,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.repository.log_access(&entry) {
            warn!(uid, error = %e, "Failed to write access log");
        }
        self.events.broadcast(
            CATEGORY,
            "access_attempt",
            json!({ "uid": uid, "employeeId": employee_id, "granted": granted }),
        );

        if sent {
            Ok(())
        } else {
            Err(Error::NotConnected(DeviceKind::Gate))
        }
    }

    fn on_register_scan(&mut self, uid: &str, company_id: Option<&str>) -> Result<()> {
        if self.mode != GateMode::Register {
            debug!(uid, "Register scan while in access mode; ignored");
            return Ok(());
        }

        if let Some(previous) = self.session.as_ref().filter(|s| !s.completed) {
            warn!(
                previous_uid = %previous.uid,
                uid,
                "New card presented before enrollment finished; restarting"
            );
        }

        let employee_id = format_employee_id(&self.directory.allocate_employee_id(company_id));
        if !self.send(&GateCommand::WriteCard(employee_id.clone())) {
            self.abandon_session();
            return Err(Error::NotConnected(DeviceKind::Gate));
        }

        self.session = Some(EnrollmentSession {
            uid: uid.to_string(),
            employee_id: employee_id.clone(),
            completed: false,
        });
        self.write_timer.arm();
        info!(uid, employee_id = %employee_id, "Card write started");
        self.events.broadcast(
            CATEGORY,
            "card_write_started",
            json!({ "uid": uid, "employeeId": employee_id, "companyId": company_id }),
        );
        Ok(())
    }

    /// Apply the pending enrollment if it has not been applied yet.
    fn complete(&mut self, via: Completion) -> Result<()> {
        let Some(session) = self.session.as_mut().filter(|s| !s.completed) else {
            debug!(via = ?via, "No enrollment pending; completion ignored");
            return Ok(());
        };
        session.completed = true;
        self.write_timer.cancel();

        let uid = session.uid.clone();
        let employee_id = session.employee_id.clone();
        let mut payload = json!({ "uid": uid, "employeeId": employee_id, "completion": via });
        if via == Completion::Timeout {
            let reason = Error::timeout(format!("write confirmation for card {uid}"));
            warn!(error = %reason, "Binding card with last seen uid");
            payload["reason"] = json!(reason.to_string());
        }
        self.directory.bind_card(&uid, &employee_id)?;
        info!(uid = %uid, employee_id = %employee_id, via = ?via, "Card enrolled");
        self.events.broadcast(CATEGORY, "card_registered", payload);
        Ok(())
    }

    fn abandon_session(&mut self) {
        if let Some(session) = self.session.take().filter(|s| !s.completed) {
            info!(uid = %session.uid, "Enrollment abandoned");
        }
        self.write_timer.cancel();
    }

    fn on_fault(&mut self, code: &str) {
        warn!(code, "Gate fault");
        self.events
            .broadcast(CATEGORY, "device_fault", json!({ "code": code }));
    }

    fn send(&self, command: &GateCommand) -> bool {
        let payload = command.payload();
        let sent = self.transport.send(DeviceKind::Gate, &payload);
        if !sent {
            debug!(payload, "Gate not reachable");
        }
        sent
    }
}

impl DeviceController for GateController {
    fn device(&self) -> DeviceKind {
        DeviceKind::Gate
    }

    fn handle_event(&mut self, payload: &str) -> Result<()> {
        match GateEvent::parse(payload)? {
            GateEvent::AccessScan { uid, employee_id } => {
                self.on_access_scan(&uid, employee_id.as_deref())
            }
            GateEvent::RegisterScan { uid, company_id } => {
                self.on_register_scan(&uid, company_id.as_deref())
            }
        }
    }

    fn handle_command(&mut self, payload: &str) -> Result<()> {
        let sent = match GateCommand::parse(payload)? {
            GateCommand::SetAccess(allow) => self.set_access(allow),
            GateCommand::SetRegisterMode(true) => self.set_mode(GateMode::Register),
            GateCommand::SetRegisterMode(false) => self.set_mode(GateMode::Access),
            command @ GateCommand::WriteCard(_) => self.send(&command),
        };
        if sent {
            Ok(())
        } else {
            Err(Error::NotConnected(DeviceKind::Gate))
        }
    }

    fn handle_response(&mut self, payload: &str) -> Result<()> {
        match GateReply::parse(payload)? {
            GateReply::Ok => self.complete(Completion::Response),
            GateReply::Fault(code) => {
                self.on_fault(&code);
                Ok(())
            }
        }
    }

    fn handle_error(&mut self, payload: &str) -> Result<()> {
        match GateReply::parse(payload) {
            Ok(GateReply::Fault(code)) => self.on_fault(&code),
            _ => self.on_fault(payload),
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.write_timer.deadline()
    }

    fn on_deadline(&mut self, now: Instant) -> Result<()> {
        if self.write_timer.take_expired(now) {
            self.complete(Completion::Timeout)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ChannelEventSink, MemoryDirectory, MemoryRepository};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Wire {
        sent: Mutex<Vec<String>>,
    }

    impl DeviceTransport for Wire {
        fn send(&self, _device: DeviceKind, payload: &str) -> bool {
            self.sent.lock().unwrap().push(payload.to_string());
            true
        }

        fn is_connected(&self, _device: DeviceKind) -> bool {
            true
        }
    }

    struct Rig {
        gate: GateController,
        wire: Arc<Wire>,
        repo: Arc<MemoryRepository>,
        directory: Arc<MemoryDirectory>,
        events: Arc<ChannelEventSink>,
    }

    fn rig() -> Rig {
        let wire = Arc::new(Wire::default());
        let repo = Arc::new(MemoryRepository::new());
        let directory = Arc::new(MemoryDirectory::new().with_card("04AB", "000042"));
        let events = Arc::new(ChannelEventSink::new(16));
        let gate = GateController::new(
            &GateConfig::default(),
            wire.clone(),
            events.clone(),
            repo.clone(),
            directory.clone(),
        );
        Rig {
            gate,
            wire,
            repo,
            directory,
            events,
        }
    }

    fn sent(rig: &Rig) -> Vec<String> {
        rig.wire.sent.lock().unwrap().clone()
    }

    #[test]
    fn test_access_granted_and_denied() {
        let mut rig = rig();

        rig.gate.handle_event("id04AB;000042").unwrap();
        rig.gate.handle_event("idFFFF;000001").unwrap();

        assert_eq!(sent(&rig), vec!["ac1", "ac0"]);
        let log = rig.repo.access_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].granted);
        assert!(!log[1].granted);
    }

    #[test]
    fn test_register_scan_writes_card() {
        let mut rig = rig();
        assert!(rig.gate.set_mode(GateMode::Register));

        rig.gate.handle_event("wr0C0D;17").unwrap();

        assert_eq!(sent(&rig), vec!["md1", "wr000001"]);
        assert_eq!(
            rig.gate.status().pending,
            Some(PendingEnrollment {
                uid: "0C0D".into(),
                employee_id: "000001".into(),
            })
        );
        assert!(rig.gate.next_deadline().is_some());
    }

    #[test]
    fn test_response_completes_once() {
        let mut rig = rig();
        rig.gate.set_mode(GateMode::Register);
        rig.gate.handle_event("wr0C0D;").unwrap();

        let mut rx = rig.events.subscribe();
        rig.gate.handle_response("ok").unwrap();
        assert_eq!(rig.directory.employee_for("0C0D").as_deref(), Some("000001"));
        assert!(rig.gate.next_deadline().is_none());
        assert!(rx.try_recv().unwrap().payload.get("reason").is_none());
        assert_eq!(rig.gate.status().pending, None);

        // A late timeout or duplicate ok finds nothing to do.
        rig.directory.bind_card("0C0D", "999999").unwrap();
        rig.gate.handle_response("ok").unwrap();
        rig.gate.on_deadline(Instant::now() + Duration::from_secs(60)).unwrap();
        assert_eq!(rig.directory.employee_for("0C0D").as_deref(), Some("999999"));
    }

    #[test]
    fn test_timeout_completes_with_last_uid() {
        let mut rig = rig();
        rig.gate.set_mode(GateMode::Register);
        rig.gate.handle_event("wr0C0D;").unwrap();

        let mut rx = rig.events.subscribe();
        let deadline = rig.gate.next_deadline().unwrap();
        rig.gate.on_deadline(deadline).unwrap();
        assert_eq!(rig.directory.employee_for("0C0D").as_deref(), Some("000001"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.action, "card_registered");
        assert_eq!(event.payload["completion"], "timeout");
        assert_eq!(
            event.payload["reason"],
            "Operation timed out: write confirmation for card 0C0D"
        );

        rig.directory.bind_card("0C0D", "999999").unwrap();
        rig.gate.handle_response("ok").unwrap();
        assert_eq!(rig.directory.employee_for("0C0D").as_deref(), Some("999999"));
    }

    #[test]
    fn test_fault_keeps_session_open() {
        let mut rig = rig();
        rig.gate.set_mode(GateMode::Register);
        rig.gate.handle_event("wr0C0D;").unwrap();

        rig.gate.handle_error("e1").unwrap();
        rig.gate.handle_response("e2").unwrap();

        assert!(rig.gate.status().pending.is_some());
        assert!(rig.gate.next_deadline().is_some());
    }

    #[test]
    fn test_leaving_register_mode_abandons_session() {
        let mut rig = rig();
        rig.gate.set_mode(GateMode::Register);
        rig.gate.handle_event("wr0C0D;").unwrap();

        rig.gate.handle_command("md0").unwrap();

        assert_eq!(rig.gate.mode(), GateMode::Access);
        assert_eq!(rig.gate.status().pending, None);
        assert!(rig.gate.next_deadline().is_none());
        rig.gate.handle_response("ok").unwrap();
        assert_eq!(rig.directory.employee_for("0C0D"), None);
    }

    #[test]
    fn test_scan_in_wrong_mode_ignored() {
        let mut rig = rig();
        rig.gate.handle_event("wr0C0D;").unwrap();
        assert!(sent(&rig).is_empty());

        rig.gate.set_mode(GateMode::Register);
        rig.gate.handle_event("id04AB;000042").unwrap();
        assert_eq!(sent(&rig), vec!["md1"]);
        assert!(rig.repo.access_log().is_empty());
    }
}
