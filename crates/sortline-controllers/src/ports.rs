//! Collaborators the controllers consume.
//!
//! Controllers receive these as `Arc<dyn _>` at construction; nothing is
//! reached through a global. The in-memory implementations back the daemon
//! when no database is configured, and the tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sortline_core::{Result, Zone};
use sortline_protocol::commands::format_employee_id;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::info;

use crate::event::BroadcastEvent;

/// Persistent storage for targets and audit trails.
pub trait Repository: Send + Sync {
    fn get_target_temp(&self, zone: Zone) -> Result<Option<f64>>;

    fn save_target_temp(&self, zone: Zone, value: f64) -> Result<()>;

    fn log_warning(&self, zone: Zone, temperature: f64) -> Result<()>;

    fn log_access(&self, entry: &AccessLogEntry) -> Result<()>;
}

/// Fan-out to subscribers. Delivery is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, category: &str, action: &str, payload: Value);
}

/// Access policy and card enrollment.
pub trait AccessDirectory: Send + Sync {
    /// Decide whether a scanned card may pass.
    fn authorize(&self, uid: &str, employee_id: Option<&str>) -> bool;

    /// Reserve a fresh six digit employee id.
    fn allocate_employee_id(&self, company_id: Option<&str>) -> String;

    /// Record that `uid` now carries `employee_id`.
    fn bind_card(&self, uid: &str, employee_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub uid: String,
    pub employee_id: Option<String>,
    pub granted: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningRecord {
    pub zone: Zone,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    targets: Mutex<HashMap<Zone, f64>>,
    warnings: Mutex<Vec<WarningRecord>>,
    access_log: Mutex<Vec<AccessLogEntry>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(self, zone: Zone, value: f64) -> Self {
        lock(&self.targets).insert(zone, value);
        self
    }

    pub fn warnings(&self) -> Vec<WarningRecord> {
        lock(&self.warnings).clone()
    }

    pub fn access_log(&self) -> Vec<AccessLogEntry> {
        lock(&self.access_log).clone()
    }
}

impl Repository for MemoryRepository {
    fn get_target_temp(&self, zone: Zone) -> Result<Option<f64>> {
        Ok(lock(&self.targets).get(&zone).copied())
    }

    fn save_target_temp(&self, zone: Zone, value: f64) -> Result<()> {
        lock(&self.targets).insert(zone, value);
        Ok(())
    }

    fn log_warning(&self, zone: Zone, temperature: f64) -> Result<()> {
        lock(&self.warnings).push(WarningRecord {
            zone,
            temperature,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn log_access(&self, entry: &AccessLogEntry) -> Result<()> {
        lock(&self.access_log).push(entry.clone());
        Ok(())
    }
}

/// Card allow-list with sequential employee id allocation.
#[derive(Debug)]
pub struct MemoryDirectory {
    cards: Mutex<HashMap<String, String>>,
    next_id: AtomicU32,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            cards: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn with_card(self, uid: &str, employee_id: &str) -> Self {
        lock(&self.cards).insert(uid.to_string(), format_employee_id(employee_id));
        self
    }

    pub fn employee_for(&self, uid: &str) -> Option<String> {
        lock(&self.cards).get(uid).cloned()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessDirectory for MemoryDirectory {
    fn authorize(&self, uid: &str, employee_id: Option<&str>) -> bool {
        match (lock(&self.cards).get(uid), employee_id) {
            (Some(bound), Some(presented)) => *bound == format_employee_id(presented),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn allocate_employee_id(&self, _company_id: Option<&str>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format_employee_id(&id.to_string())
    }

    fn bind_card(&self, uid: &str, employee_id: &str) -> Result<()> {
        lock(&self.cards).insert(uid.to_string(), format_employee_id(employee_id));
        Ok(())
    }
}

/// Publishes every event on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn broadcast(&self, category: &str, action: &str, payload: Value) {
        // No subscribers is not an error.
        let _ = self.tx.send(BroadcastEvent::new(category, action, payload));
    }
}

/// Logs events instead of publishing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn broadcast(&self, category: &str, action: &str, payload: Value) {
        info!(category, action, payload = %payload, "event");
    }
}
