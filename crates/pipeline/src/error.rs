use auditlog_core::CoreError;

/// Failure while processing a single event.
///
/// Every variant is recoverable from the consumer's point of view: the
/// message goes through the retry/dead-letter protocol.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The envelope is structurally incomplete.
    #[error(transparent)]
    Validation(CoreError),

    /// The event time matched none of the accepted layouts.
    #[error(transparent)]
    Timestamp(CoreError),

    /// The storage sink rejected the record.
    #[error("Failed to persist activity log: {0}")]
    Persistence(#[from] sqlx::Error),
}
