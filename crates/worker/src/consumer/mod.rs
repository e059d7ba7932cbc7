//! Consumer workers and their lifecycle.

mod activity_log;

pub use activity_log::{ActivityLogConsumer, ACTIVITY_LOG_CONSUMER, DEFAULT_PROCESSING_TIMEOUT};

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ConsumerError;

/// Deliveries a consumer holds unacknowledged at any one time. Messages are
/// processed strictly one after another.
pub const IN_FLIGHT_LIMIT: u16 = 1;

/// Lifecycle of a consumer worker.
///
/// `Created -> Starting -> Running -> Stopping -> Stopped`. A failed start
/// goes straight to `Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Created => "created",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-running worker driven by the [`Supervisor`](crate::supervisor::Supervisor).
///
/// The supervisor calls [`start`](Consumer::start) once and, if it
/// succeeds, [`run`](Consumer::run) on the same task. `run` returns once
/// the worker has stopped consuming and reached [`WorkerState::Stopped`].
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Bind the subscription. Only valid from [`WorkerState::Created`].
    async fn start(&self) -> Result<(), ConsumerError>;

    /// Process deliveries until `cancel` fires, [`stop`](Consumer::stop) is
    /// called, or the subscription ends. Exiting on either token cancels
    /// the broker subscription.
    async fn run(&self, cancel: CancellationToken);

    /// Stop accepting new deliveries and cancel the broker subscription if
    /// it is still live. A message already being processed is allowed to
    /// finish. Safe to call in any state.
    async fn stop(&self);
}
