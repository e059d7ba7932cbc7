//! Repository for the `activity_logs` table.

use auditlog_core::names::ACTIVITY_LOG_TABLE;
use chrono::Utc;
use sqlx::PgPool;

use crate::models::activity_log::{ActivityLog, NewActivityLog, INITIAL_VERSION};

/// Column list for `activity_logs` queries.
const COLUMNS: &str =
    "id, event_id, topic, source_service, \"timestamp\", payload, processed_at, version";

/// Write access to the `activity_logs` table.
pub struct ActivityLogRepo;

impl ActivityLogRepo {
    /// Insert a new activity record stamped with the current time.
    ///
    /// Returns `None` when a record with the same `event_id` already
    /// exists, which makes redelivery of an already-persisted event a
    /// no-op.
    pub async fn create(
        pool: &PgPool,
        record: &NewActivityLog,
    ) -> Result<Option<ActivityLog>, sqlx::Error> {
        let query = insert_query();
        sqlx::query_as::<_, ActivityLog>(&query)
            .bind(&record.event_id)
            .bind(&record.topic)
            .bind(&record.source_service)
            .bind(record.timestamp)
            .bind(&record.payload)
            .bind(Utc::now())
            .bind(INITIAL_VERSION)
            .fetch_optional(pool)
            .await
    }
}

fn insert_query() -> String {
    format!(
        "INSERT INTO {ACTIVITY_LOG_TABLE} \
            (event_id, topic, source_service, \"timestamp\", payload, processed_at, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (event_id) DO NOTHING \
         RETURNING {COLUMNS}"
    )
}
