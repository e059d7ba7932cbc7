use std::time::Duration;

use auditlog_pipeline::PipelineError;

use crate::consumer::WorkerState;

/// Transport failures against the message broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to connect to RabbitMQ: {0}")]
    Connection(String),

    #[error("Failed to create RabbitMQ channel: {0}")]
    Channel(String),

    #[error("Failed to declare broker topology: {0}")]
    Topology(String),

    #[error("Failed to consume from RabbitMQ: {0}")]
    Consume(String),

    #[error("Failed to publish to RabbitMQ: {0}")]
    Publish(String),

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    #[error("Failed to reject message: {0}")]
    Reject(String),

    #[error("Failed to cancel consumer: {0}")]
    Cancel(String),
}

/// Why a single delivered message could not be processed.
///
/// All variants take the same retry/dead-letter path.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to deserialize event: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Failed to process event: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Event processing timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Worker lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The subscription could not be bound; the worker never ran.
    #[error("Consumer {name} failed to bind: {source}")]
    Bind {
        name: String,
        #[source]
        source: BrokerError,
    },

    /// `start` was called on a worker that is not freshly created.
    #[error("Consumer {name} cannot start from state {state}")]
    InvalidState { name: String, state: WorkerState },
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Supervisor already started; consumers must be registered before start_all")]
    AlreadyStarted,
}
