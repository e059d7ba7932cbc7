use async_trait::async_trait;
use auditlog_core::GenericEvent;

use crate::error::PipelineError;

/// Validates, transforms and persists one event.
///
/// Implementations must be safe to call again for an event they already
/// handled: delivery is at-least-once.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process_event(&self, event: &GenericEvent) -> Result<(), PipelineError>;
}
