//! Broker abstraction used by consumers.
//!
//! A consumer only needs three things from the broker: a subscription that
//! yields deliveries, a way to settle each delivery, and a way to
//! republish. [`BrokerChannel`] and [`Acknowledger`] capture exactly that so
//! the acknowledgment protocol can be driven by the AMQP adapter in
//! [`amqp`] or by an in-memory channel in tests.

pub mod amqp;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerError;
use crate::message::{Headers, Message};

/// Stream of deliveries produced by [`BrokerChannel::subscribe`].
///
/// Ends when the subscription is cancelled or the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// A channel owned by exactly one consumer.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Limit unacknowledged deliveries to `prefetch` and start consuming
    /// `queue` under `consumer_tag`.
    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream, BrokerError>;

    /// Cancel the subscription registered under `consumer_tag`.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Publish a message to `exchange` with `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publication: Publication,
    ) -> Result<(), BrokerError>;
}

/// Settles a single delivery on the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the delivery from the queue permanently.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject the delivery. With `requeue == false` the broker may route it
    /// to a dead-letter exchange if one is configured.
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A delivered message together with the handle that settles it.
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, acker: impl Acknowledger + 'static) -> Self {
        Self {
            message,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Content type stamped on republished messages.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub content_type: &'static str,
    /// Per-message TTL. Only delays redelivery when the surrounding broker
    /// topology bounces expired messages back to the queue.
    pub expiration: Option<Duration>,
}

impl Publication {
    pub fn json(body: Vec<u8>, headers: Headers) -> Self {
        Self {
            body,
            headers,
            content_type: JSON_CONTENT_TYPE,
            expiration: None,
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}
