//! RabbitMQ adapter built on `lapin`.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{
    AMQPValue, ByteArray, DecimalValue, FieldArray, FieldTable, LongString, ShortString,
};
use lapin::{BasicProperties, Connection, ConnectionProperties};

use super::{Acknowledger, BrokerChannel, Delivery, DeliveryStream, Publication};
use crate::config::RabbitMqConfig;
use crate::error::BrokerError;
use crate::message::{HeaderValue, Headers, Message, HEADER_RETRY_COUNT};

/// AMQP reply code for a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode for republished messages.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// A single broker connection shared by every consumer channel.
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    pub async fn connect(config: &RabbitMqConfig) -> Result<Self, BrokerError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            "Connected to RabbitMQ"
        );

        Ok(Self { connection })
    }

    /// Declare the durable work queue and bind it to the topic exchange.
    ///
    /// The exchange itself is owned by the publishing services and is
    /// expected to exist already.
    pub async fn declare_topology(&self, config: &RabbitMqConfig) -> Result<(), BrokerError> {
        let channel = self.open_raw_channel().await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Topology(e.to_string()))?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Topology(e.to_string()))?;

        if let Err(e) = channel.close(REPLY_SUCCESS, "topology declared").await {
            tracing::warn!(error = %e, "Failed to close topology channel");
        }

        tracing::info!(
            queue = %config.queue,
            exchange = %config.exchange,
            binding_key = %config.binding_key,
            "Queue declared and bound"
        );

        Ok(())
    }

    /// Open a dedicated channel for one consumer.
    pub async fn open_channel(&self) -> Result<AmqpChannel, BrokerError> {
        Ok(AmqpChannel {
            channel: self.open_raw_channel().await?,
        })
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "worker shutting down")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    async fn open_raw_channel(&self) -> Result<lapin::Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))
    }
}

/// [`BrokerChannel`] over a single `lapin` channel.
pub struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream, BrokerError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        let stream = consumer.map(|delivery| {
            delivery
                .map(into_delivery)
                .map_err(|e| BrokerError::Consume(e.to_string()))
        });

        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| BrokerError::Cancel(e.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publication: Publication,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(publication.content_type))
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_headers(to_field_table(&publication.headers));

        if let Some(expiration) = publication.expiration {
            properties =
                properties.with_expiration(ShortString::from(expiration.as_millis().to_string()));
        }

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &publication.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::Reject(e.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(from_field_table)
        .unwrap_or_default();

    let message = Message {
        body: delivery.data,
        routing_key: delivery.routing_key.as_str().to_string(),
        headers,
    };

    Delivery::new(message, AmqpAcker(delivery.acker))
}

// ---------------------------------------------------------------------------
// Header conversion
// ---------------------------------------------------------------------------

/// Convert AMQP headers into [`Headers`]. Every value is kept, including
/// nested tables and arrays, so a republish carries them forward.
fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), from_amqp_value(value)))
        .collect()
}

fn from_amqp_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
        AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Float(f64::from(*v)),
        AMQPValue::Double(v) => HeaderValue::Float(*v),
        AMQPValue::DecimalValue(v) => HeaderValue::Decimal {
            scale: v.scale,
            value: v.value,
        },
        AMQPValue::ShortString(v) => HeaderValue::Text(v.as_str().to_string()),
        AMQPValue::LongString(v) => {
            HeaderValue::Text(String::from_utf8_lossy(v.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            HeaderValue::Array(items.as_slice().iter().map(from_amqp_value).collect())
        }
        AMQPValue::Timestamp(v) => HeaderValue::Timestamp(*v),
        AMQPValue::FieldTable(table) => HeaderValue::Table(from_field_table(table)),
        AMQPValue::ByteArray(bytes) => HeaderValue::Bytes(bytes.as_slice().to_vec()),
        AMQPValue::Void => HeaderValue::Void,
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers {
        let value = match value {
            // Other services read the retry count as a 32-bit int.
            HeaderValue::Int(v) if name == HEADER_RETRY_COUNT => match i32::try_from(*v) {
                Ok(small) => AMQPValue::LongInt(small),
                Err(_) => AMQPValue::LongLongInt(*v),
            },
            other => to_amqp_value(other),
        };
        table.insert(ShortString::from(name.clone()), value);
    }
    table
}

fn to_amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        // RabbitMQ writes its own integer headers (`x-death` counts) as
        // 64-bit and expects them back that way.
        HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
        HeaderValue::Float(v) => AMQPValue::Double(*v),
        HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        HeaderValue::Text(v) => AMQPValue::LongString(LongString::from(v.clone())),
        HeaderValue::Decimal { scale, value } => AMQPValue::DecimalValue(DecimalValue {
            scale: *scale,
            value: *value,
        }),
        HeaderValue::Timestamp(v) => AMQPValue::Timestamp(*v),
        HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v.clone())),
        HeaderValue::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        HeaderValue::Table(table) => AMQPValue::FieldTable(to_field_table(table)),
        HeaderValue::Void => AMQPValue::Void,
    }
}
