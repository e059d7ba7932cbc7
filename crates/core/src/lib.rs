//! Shared domain types for the activity-log event service.
//!
//! - [`event::GenericEvent`] -- the wire envelope published by upstream
//!   services.
//! - [`timestamp`] -- event-time parsing across the accepted textual forms.
//! - [`names`] -- well-known broker and storage names.

pub mod error;
pub mod event;
pub mod names;
pub mod timestamp;
pub mod types;

pub use error::CoreError;
pub use event::GenericEvent;
