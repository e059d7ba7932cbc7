use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auditlog_core::GenericEvent;
use auditlog_pipeline::EventProcessor;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Consumer, WorkerState, IN_FLIGHT_LIMIT};
use crate::broker::{BrokerChannel, Delivery, DeliveryStream, Publication};
use crate::error::{BrokerError, ConsumerError, ProcessingError};
use crate::message::{Message, RetryMetadata};
use crate::retry::{RetryDecision, RetryPolicy};

/// Name the activity-log consumer registers under. Also used as its
/// broker consumer tag.
pub const ACTIVITY_LOG_CONSUMER: &str = "activity-log-consumer";

/// Default ceiling on processing a single message.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Consumes activity-log events from one queue and drives each delivery
/// through ack, scheduled retry or dead-letter.
///
/// Owns its broker channel and processor exclusively. Deliveries are
/// handled one at a time; the subscription is bound with a prefetch of
/// [`IN_FLIGHT_LIMIT`] so the broker never hands over a second message while
/// the first is unacknowledged.
pub struct ActivityLogConsumer {
    name: String,
    queue: String,
    exchange: String,
    channel: Arc<dyn BrokerChannel>,
    processor: Arc<dyn EventProcessor>,
    policy: RetryPolicy,
    processing_timeout: Duration,
    state: watch::Sender<WorkerState>,
    stop: CancellationToken,
    deliveries: Mutex<Option<DeliveryStream>>,
    /// Set while the broker subscription is live and not yet cancelled.
    subscribed: AtomicBool,
}

impl ActivityLogConsumer {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        channel: Arc<dyn BrokerChannel>,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Created);
        Self {
            name: name.into(),
            queue: queue.into(),
            exchange: exchange.into(),
            channel,
            processor,
            policy: RetryPolicy::default(),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            state,
            stop: CancellationToken::new(),
            deliveries: Mutex::new(None),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Move from `from` to `to` if the worker is currently in `from`.
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Cancel the broker subscription. Only the first call reaches the
    /// broker, whichever of `stop` and the run loop gets there first.
    async fn cancel_subscription(&self) {
        if !self.subscribed.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.channel.cancel(&self.name).await {
            tracing::error!(consumer = %self.name, error = %e, "Failed to cancel subscription");
        }
    }

    // -----------------------------------------------------------------------
    // Per-message protocol
    // -----------------------------------------------------------------------

    async fn handle(&self, delivery: Delivery) {
        match self.process(&delivery.message).await {
            Ok(()) => {
                tracing::debug!(
                    consumer = %self.name,
                    routing_key = %delivery.message.routing_key,
                    "Message processed"
                );
                if let Err(e) = delivery.ack().await {
                    tracing::error!(
                        consumer = %self.name,
                        routing_key = %delivery.message.routing_key,
                        error = %e,
                        "Failed to acknowledge processed message"
                    );
                }
            }
            Err(error) => self.handle_failure(&delivery, error).await,
        }
    }

    async fn process(&self, message: &Message) -> Result<(), ProcessingError> {
        let event: GenericEvent = serde_json::from_slice(&message.body)?;

        tokio::time::timeout(self.processing_timeout, self.processor.process_event(&event))
            .await
            .map_err(|_| ProcessingError::Timeout(self.processing_timeout))??;

        Ok(())
    }

    async fn handle_failure(&self, delivery: &Delivery, error: ProcessingError) {
        let message = &delivery.message;
        let meta = message.retry_metadata();

        let (retry_count, delay) = match self.policy.decide(meta.retry_count) {
            RetryDecision::Retry { retry_count, delay } => (retry_count, delay),
            RetryDecision::DeadLetter => {
                self.dead_letter(delivery, &error, meta.retry_count).await;
                return;
            }
        };

        if let Err(e) = self
            .republish(message, &meta, retry_count, delay, &error)
            .await
        {
            tracing::error!(
                consumer = %self.name,
                routing_key = %message.routing_key,
                error = %e,
                "Failed to republish message for retry"
            );
            self.dead_letter(delivery, &error, meta.retry_count).await;
            return;
        }

        tracing::warn!(
            consumer = %self.name,
            routing_key = %message.routing_key,
            retry_count,
            max_retries = self.policy.max_retries(),
            error = %error,
            "Message processing failed, scheduled for retry"
        );

        if let Err(e) = delivery.ack().await {
            tracing::error!(
                consumer = %self.name,
                routing_key = %message.routing_key,
                error = %e,
                "Failed to acknowledge original after republish"
            );
        }
    }

    async fn republish(
        &self,
        message: &Message,
        meta: &RetryMetadata,
        retry_count: u32,
        delay: Duration,
        error: &ProcessingError,
    ) -> Result<(), BrokerError> {
        let mut headers = message.headers.clone();
        meta.next_hop(retry_count, &message.routing_key, &error.to_string())
            .apply_to(&mut headers);

        let publication = Publication::json(message.body.clone(), headers).with_expiration(delay);

        self.channel
            .publish(&self.exchange, &message.routing_key, publication)
            .await
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &ProcessingError, retry_count: u32) {
        let message = &delivery.message;

        tracing::error!(
            consumer = %self.name,
            routing_key = %message.routing_key,
            error = %error,
            body = %String::from_utf8_lossy(&message.body),
            headers = ?message.headers,
            retry_count,
            "Message dead-lettered"
        );

        if let Err(e) = delivery.reject(false).await {
            tracing::error!(
                consumer = %self.name,
                routing_key = %message.routing_key,
                error = %e,
                "Failed to reject message"
            );
        }
    }
}

#[async_trait]
impl Consumer for ActivityLogConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    async fn start(&self) -> Result<(), ConsumerError> {
        if !self.transition(WorkerState::Created, WorkerState::Starting) {
            return Err(ConsumerError::InvalidState {
                name: self.name.clone(),
                state: self.state(),
            });
        }

        match self
            .channel
            .subscribe(&self.queue, &self.name, IN_FLIGHT_LIMIT)
            .await
        {
            Ok(stream) => {
                *self.deliveries.lock().await = Some(stream);
                self.subscribed.store(true, Ordering::Release);
                self.state.send_replace(WorkerState::Running);
                tracing::info!(
                    consumer = %self.name,
                    queue = %self.queue,
                    prefetch = IN_FLIGHT_LIMIT,
                    "Consumer started"
                );
                Ok(())
            }
            Err(source) => {
                self.state.send_replace(WorkerState::Stopped);
                Err(ConsumerError::Bind {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let Some(mut deliveries) = self.deliveries.lock().await.take() else {
            tracing::warn!(
                consumer = %self.name,
                state = %self.state(),
                "Consumer has no subscription to run"
            );
            return;
        };

        let signalled = loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break true,
                _ = cancel.cancelled() => break true,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle(delivery).await,
                Some(Err(e)) => {
                    tracing::error!(consumer = %self.name, error = %e, "Delivery stream failed");
                    break false;
                }
                None => {
                    tracing::info!(consumer = %self.name, "Delivery stream closed");
                    break false;
                }
            }
        };

        self.transition(WorkerState::Running, WorkerState::Stopping);
        if signalled {
            self.cancel_subscription().await;
        } else {
            // The broker already ended the subscription.
            self.subscribed.store(false, Ordering::Release);
        }
        drop(deliveries);
        self.state.send_replace(WorkerState::Stopped);
        tracing::info!(consumer = %self.name, "Consumer stopped");
    }

    async fn stop(&self) {
        if self.transition(WorkerState::Running, WorkerState::Stopping) {
            tracing::info!(consumer = %self.name, "Stopping consumer");
            self.stop.cancel();
        }
        // The loop may already have exited on the shared token.
        self.cancel_subscription().await;
    }
}
