//! Activity-log consumer worker.
//!
//! Consumes IAM events from RabbitMQ and persists them as activity records
//! with at-least-once delivery: each message is acknowledged after it is
//! stored, republished with an incremented `x-retry-count` header when
//! processing fails, and dead-lettered once retries are exhausted.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod health;
pub mod message;
pub mod retry;
pub mod shutdown;
pub mod supervisor;

pub use consumer::{ActivityLogConsumer, Consumer, WorkerState};
pub use retry::{RetryDecision, RetryPolicy};
pub use supervisor::Supervisor;
