//! Activity log entity model.

use auditlog_core::types::{DbId, Timestamp};
use auditlog_core::GenericEvent;
use sqlx::FromRow;

/// Version stamped on every newly created record.
pub const INITIAL_VERSION: i32 = 1;

/// A row from the `activity_logs` table.
#[derive(Debug, Clone, FromRow)]
pub struct ActivityLog {
    pub id: DbId,
    pub event_id: String,
    pub topic: String,
    pub source_service: String,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
    pub processed_at: Timestamp,
    pub version: i32,
}

/// Insert payload for a new activity record.
///
/// `id`, `processed_at` and `version` are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityLog {
    pub event_id: String,
    pub topic: String,
    pub source_service: String,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
}

impl NewActivityLog {
    /// Build a record from a validated event and its parsed event time.
    pub fn from_event(event: &GenericEvent, timestamp: Timestamp) -> Self {
        Self {
            event_id: event.event_id.clone(),
            topic: event.topic.clone(),
            source_service: event.source_service.clone(),
            timestamp,
            payload: serde_json::Value::Object(event.payload.clone()),
        }
    }
}
