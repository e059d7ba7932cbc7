//! Well-known broker and storage names.
//!
//! These are the defaults; deployments may override the broker names via
//! configuration.

/// Durable queue holding every `*.log` event.
pub const ACTIVITY_LOG_QUEUE: &str = "iam_activity_log_queue";

/// Topic exchange the IAM services publish to.
pub const IAM_EVENTS_EXCHANGE: &str = "iam_events_topic";

/// Binding key capturing any routing key ending in `.log`.
pub const ACTIVITY_LOG_BINDING_KEY: &str = "#.log";

/// Table holding persisted activity records.
pub const ACTIVITY_LOG_TABLE: &str = "activity_logs";
