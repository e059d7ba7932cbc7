//! Event processing pipeline.
//!
//! The consumer hands every deserialized event to an [`EventProcessor`].
//! [`LogService`] is the production implementation: it validates the
//! envelope, parses the event time and persists an activity record through
//! an [`ActivityLogSink`].

pub mod error;
pub mod log_service;
pub mod processor;
pub mod sink;

pub use error::PipelineError;
pub use log_service::LogService;
pub use processor::EventProcessor;
pub use sink::{ActivityLogSink, PgActivityLogSink};
