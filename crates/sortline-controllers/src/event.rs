use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message fanned out to subscribers (dashboards, the REST layer).
///
/// Serializes as `{"type":"event","category":..,"action":..,"payload":..,"timestamp":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub action: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastEvent {
    pub fn new(category: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: "event".to_string(),
            category: category.into(),
            action: action.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
