//! Process-wide registry of consumer workers.
//!
//! [`Supervisor`] starts every registered [`Consumer`] concurrently, runs
//! each one on its own task, and coordinates shutdown through one shared
//! [`CancellationToken`]. Task completion is tracked with a
//! [`TaskTracker`], so [`Supervisor::stop_all`] and [`Supervisor::wait`]
//! return only after every worker loop has exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::consumer::{Consumer, WorkerState};
use crate::error::SupervisorError;

pub struct Supervisor {
    consumers: Vec<Arc<dyn Consumer>>,
    /// Shared cancellation for every worker; tripped by `stop_all`.
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Add a worker. Workers must be registered before [`start_all`](Self::start_all).
    pub fn register(&mut self, consumer: Arc<dyn Consumer>) -> Result<(), SupervisorError> {
        if self.started.load(Ordering::Acquire) {
            return Err(SupervisorError::AlreadyStarted);
        }
        tracing::info!(consumer = %consumer.name(), "Consumer registered");
        self.consumers.push(consumer);
        Ok(())
    }

    /// Start every registered worker concurrently and spawn the processing
    /// loop of each one that bound successfully.
    ///
    /// A worker that fails to start is logged and left stopped; it does not
    /// prevent the others from running. Returns the number of workers now
    /// running.
    pub async fn start_all(&self) -> Result<usize, SupervisorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SupervisorError::AlreadyStarted);
        }

        let results = join_all(self.consumers.iter().map(|c| c.start())).await;

        let mut running = 0;
        for (consumer, result) in self.consumers.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(consumer = %consumer.name(), error = %e, "Failed to start consumer");
                continue;
            }

            let consumer = Arc::clone(consumer);
            let cancel = self.cancel.clone();
            self.tracker.spawn(async move {
                consumer.run(cancel).await;
            });
            running += 1;
        }

        tracing::info!(
            running,
            registered = self.consumers.len(),
            "Consumers started"
        );
        Ok(running)
    }

    /// Trip the shared cancellation, stop every worker in registration
    /// order, then wait for every worker loop to exit.
    ///
    /// A message already being processed completes (or times out) before
    /// its worker exits. Calling this more than once is harmless.
    pub async fn stop_all(&self) {
        tracing::info!(consumers = self.consumers.len(), "Stopping all consumers");

        self.cancel.cancel();
        for consumer in &self.consumers {
            consumer.stop().await;
        }

        self.tracker.close();
        self.tracker.wait().await;

        tracing::info!("All consumers stopped");
    }

    /// Wait until every worker loop has exited on its own.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Snapshot of every registered worker's name and state, in
    /// registration order.
    pub fn consumer_states(&self) -> Vec<(String, WorkerState)> {
        self.consumers
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
