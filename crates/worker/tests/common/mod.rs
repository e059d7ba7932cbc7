//! Shared fixtures for worker integration tests: an in-memory broker
//! channel, scripted processors and an in-memory activity-log sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auditlog_core::{CoreError, GenericEvent};
use auditlog_db::models::activity_log::{ActivityLog, NewActivityLog, INITIAL_VERSION};
use auditlog_pipeline::{ActivityLogSink, EventProcessor, PipelineError};
use auditlog_worker::broker::{Acknowledger, BrokerChannel, Delivery, DeliveryStream, Publication};
use auditlog_worker::error::BrokerError;
use auditlog_worker::message::{HeaderValue, Message, HEADER_RETRY_COUNT};
use auditlog_worker::{ActivityLogConsumer, Consumer, RetryPolicy};
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TEST_EXCHANGE: &str = "test_exchange";
pub const TEST_QUEUE: &str = "test_queue";

pub const USER_CREATED: &str = r#"{"eventId":"e1","topic":"user.created.log","sourceService":"iam","timestamp":"2024-01-01T00:00:00Z","payload":{"userId":"u1"}}"#;

// ---------------------------------------------------------------------------
// In-memory broker channel
// ---------------------------------------------------------------------------

/// A message handed to [`BrokerChannel::publish`].
#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub publication: Publication,
}

impl Published {
    pub fn retry_count(&self) -> Option<&HeaderValue> {
        self.publication.headers.get(HEADER_RETRY_COUNT)
    }
}

#[derive(Debug, Default)]
pub struct ChannelLog {
    pub queue: VecDeque<Message>,
    pub outstanding: usize,
    pub max_outstanding: usize,
    pub acked: Vec<Message>,
    /// Rejected messages with their `requeue` flag.
    pub rejected: Vec<(Message, bool)>,
    pub published: Vec<Published>,
    pub cancelled: Vec<String>,
    pub prefetch: Option<u16>,
    closed: bool,
}

#[derive(Default)]
struct Inner {
    log: Mutex<ChannelLog>,
    notify: Notify,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
}

/// Broker stand-in. Republished messages are routed straight back into the
/// queue, so a retry hop is redelivered to the same consumer.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_subscribe() -> Self {
        let channel = Self::new();
        channel.inner.fail_subscribe.store(true, Ordering::SeqCst);
        channel
    }

    pub fn fail_publish(&self) {
        self.inner.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn push(&self, message: Message) {
        self.inner.log.lock().unwrap().queue.push_back(message);
        self.inner.notify.notify_one();
    }

    pub fn push_body(&self, body: &str) {
        self.push(Message::new(body, "user.created.log"));
    }

    /// End the delivery stream as if the broker closed the channel.
    pub fn close(&self) {
        self.inner.log.lock().unwrap().closed = true;
        self.inner.notify.notify_one();
    }

    /// Inspect the recorded traffic.
    pub fn log<R>(&self, f: impl FnOnce(&ChannelLog) -> R) -> R {
        f(&self.inner.log.lock().unwrap())
    }

    pub fn acked(&self) -> usize {
        self.log(|l| l.acked.len())
    }

    pub fn rejected(&self) -> usize {
        self.log(|l| l.rejected.len())
    }

    pub fn published(&self) -> Vec<Published> {
        self.log(|l| l.published.clone())
    }

    pub fn settled(&self) -> usize {
        self.log(|l| l.acked.len() + l.rejected.len())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn subscribe(
        &self,
        _queue: &str,
        _consumer_tag: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream, BrokerError> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Consume("queue not found".into()));
        }
        self.inner.log.lock().unwrap().prefetch = Some(prefetch);

        let stream = futures::stream::unfold(Arc::clone(&self.inner), |inner| async move {
            loop {
                let next = {
                    let mut log = inner.log.lock().unwrap();
                    if log.closed {
                        return None;
                    }
                    log.queue.pop_front().map(|message| {
                        log.outstanding += 1;
                        log.max_outstanding = log.max_outstanding.max(log.outstanding);
                        message
                    })
                };

                match next {
                    Some(message) => {
                        let acker = MemoryAcker {
                            inner: Arc::clone(&inner),
                            message: message.clone(),
                        };
                        return Some((Ok(Delivery::new(message, acker)), inner));
                    }
                    None => inner.notify.notified().await,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut log = self.inner.log.lock().unwrap();
        log.cancelled.push(consumer_tag.to_string());
        log.closed = true;
        drop(log);
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publication: Publication,
    ) -> Result<(), BrokerError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("channel closed".into()));
        }

        let mut log = self.inner.log.lock().unwrap();
        log.queue.push_back(Message {
            body: publication.body.clone(),
            routing_key: routing_key.to_string(),
            headers: publication.headers.clone(),
        });
        log.published.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            publication,
        });
        drop(log);
        self.inner.notify.notify_one();
        Ok(())
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    message: Message,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let mut log = self.inner.log.lock().unwrap();
        log.outstanding -= 1;
        log.acked.push(self.message.clone());
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        let mut log = self.inner.log.lock().unwrap();
        log.outstanding -= 1;
        log.rejected.push((self.message.clone(), requeue));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Processors and sinks
// ---------------------------------------------------------------------------

/// Processor that fails its first `failures` calls, optionally sleeping
/// before answering.
#[derive(Default)]
pub struct ScriptedProcessor {
    failures: AtomicUsize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProcessor for ScriptedProcessor {
    async fn process_event(&self, _event: &GenericEvent) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PipelineError::Validation(CoreError::Validation(
                "scripted failure".into(),
            )));
        }
        Ok(())
    }
}

/// Idempotent in-memory replacement for the Postgres sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<NewActivityLog>>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<NewActivityLog> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityLogSink for MemorySink {
    async fn create(&self, record: &NewActivityLog) -> Result<Option<ActivityLog>, sqlx::Error> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.event_id == record.event_id) {
            return Ok(None);
        }
        records.push(record.clone());
        Ok(Some(ActivityLog {
            id: records.len() as i64,
            event_id: record.event_id.clone(),
            topic: record.topic.clone(),
            source_service: record.source_service.clone(),
            timestamp: record.timestamp,
            payload: record.payload.clone(),
            processed_at: Utc::now(),
            version: INITIAL_VERSION,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Consumer on `channel` with three attempts and a short retry delay.
pub fn consumer(
    name: &str,
    channel: &InMemoryChannel,
    processor: Arc<dyn EventProcessor>,
) -> ActivityLogConsumer {
    ActivityLogConsumer::new(
        name,
        TEST_QUEUE,
        TEST_EXCHANGE,
        Arc::new(channel.clone()),
        processor,
    )
    .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10)))
}

/// Start `consumer` and spawn its processing loop.
pub async fn spawn_running(
    consumer: Arc<ActivityLogConsumer>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    consumer.start().await.expect("consumer should start");
    tokio::spawn(async move { consumer.run(cancel).await })
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
