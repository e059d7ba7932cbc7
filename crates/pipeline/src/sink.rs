//! Storage seam for activity records.

use async_trait::async_trait;
use auditlog_db::models::activity_log::{ActivityLog, NewActivityLog};
use auditlog_db::repositories::ActivityLogRepo;
use auditlog_db::DbPool;

/// Destination for newly created activity records.
#[async_trait]
pub trait ActivityLogSink: Send + Sync {
    /// Persist a record. `Ok(None)` means the event was already stored.
    async fn create(&self, record: &NewActivityLog) -> Result<Option<ActivityLog>, sqlx::Error>;
}

/// [`ActivityLogSink`] backed by the `activity_logs` table.
#[derive(Clone)]
pub struct PgActivityLogSink {
    pool: DbPool,
}

impl PgActivityLogSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLogSink for PgActivityLogSink {
    async fn create(&self, record: &NewActivityLog) -> Result<Option<ActivityLog>, sqlx::Error> {
        ActivityLogRepo::create(&self.pool, record).await
    }
}
