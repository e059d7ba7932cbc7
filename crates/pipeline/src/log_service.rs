//! Production [`EventProcessor`]: validate, transform, persist.

use async_trait::async_trait;
use auditlog_core::timestamp::parse_event_timestamp;
use auditlog_core::GenericEvent;
use auditlog_db::models::activity_log::NewActivityLog;

use crate::error::PipelineError;
use crate::processor::EventProcessor;
use crate::sink::ActivityLogSink;

/// Turns incoming events into persisted activity records.
pub struct LogService<S> {
    sink: S,
}

impl<S: ActivityLogSink> LogService<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: ActivityLogSink> EventProcessor for LogService<S> {
    async fn process_event(&self, event: &GenericEvent) -> Result<(), PipelineError> {
        event
            .validate_structure()
            .map_err(PipelineError::Validation)?;

        let timestamp =
            parse_event_timestamp(&event.timestamp).map_err(PipelineError::Timestamp)?;

        let record = NewActivityLog::from_event(event, timestamp);

        match self.sink.create(&record).await? {
            Some(log) => {
                tracing::info!(
                    event_id = %event.event_id,
                    topic = %event.topic,
                    id = log.id,
                    "Event processed and saved to database",
                );
            }
            None => {
                tracing::info!(
                    event_id = %event.event_id,
                    topic = %event.topic,
                    "Event already persisted, skipping duplicate",
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use auditlog_core::CoreError;
    use auditlog_db::models::activity_log::{ActivityLog, INITIAL_VERSION};
    use chrono::Utc;

    use super::*;

    /// Keeps records in memory and ignores duplicate event ids.
    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<NewActivityLog>>,
        fail: bool,
    }

    #[async_trait]
    impl ActivityLogSink for MemorySink {
        async fn create(
            &self,
            record: &NewActivityLog,
        ) -> Result<Option<ActivityLog>, sqlx::Error> {
            if self.fail {
                return Err(sqlx::Error::PoolClosed);
            }
            let mut records = self.records.lock().unwrap();
            if records.iter().any(|r| r.event_id == record.event_id) {
                return Ok(None);
            }
            records.push(record.clone());
            Ok(Some(ActivityLog {
                id: records.len() as i64,
                event_id: record.event_id.clone(),
                topic: record.topic.clone(),
                source_service: record.source_service.clone(),
                timestamp: record.timestamp,
                payload: record.payload.clone(),
                processed_at: Utc::now(),
                version: INITIAL_VERSION,
            }))
        }
    }

    fn event(event_id: &str, timestamp: &str) -> GenericEvent {
        serde_json::from_value(serde_json::json!({
            "eventId": event_id,
            "topic": "user.created.log",
            "sourceService": "iam",
            "timestamp": timestamp,
            "payload": {"userId": "u1"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn valid_event_is_persisted() {
        let service = LogService::new(MemorySink::default());

        service
            .process_event(&event("e1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        let records = service.sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, "e1");
        assert_eq!(records[0].payload["userId"], "u1");
    }

    #[tokio::test]
    async fn duplicate_event_is_a_success() {
        let service = LogService::new(MemorySink::default());
        let e = event("e1", "2024-01-01T00:00:00Z");

        service.process_event(&e).await.unwrap();
        service.process_event(&e).await.unwrap();

        assert_eq!(service.sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_event_id_is_a_validation_error() {
        let service = LogService::new(MemorySink::default());

        let result = service.process_event(&event("", "2024-01-01T00:00:00Z")).await;

        assert_matches!(result, Err(PipelineError::Validation(CoreError::Validation(_))));
        assert!(service.sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_timestamp_is_rejected_before_persisting() {
        let service = LogService::new(MemorySink::default());

        let result = service.process_event(&event("e1", "not-a-date")).await;

        assert_matches!(result, Err(PipelineError::Timestamp(CoreError::InvalidTimestamp(_))));
        assert!(service.sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_is_a_persistence_error() {
        let service = LogService::new(MemorySink {
            fail: true,
            ..Default::default()
        });

        let result = service.process_event(&event("e1", "2024-01-01T00:00:00Z")).await;

        assert_matches!(result, Err(PipelineError::Persistence(_)));
    }
}
