//! Process-wide handles, built once at startup and passed explicitly.

use std::sync::Arc;

use anyhow::Context;
use auditlog_db::DbPool;
use auditlog_pipeline::{LogService, PgActivityLogSink};

use crate::broker::amqp::AmqpBroker;
use crate::config::WorkerConfig;
use crate::consumer::{ActivityLogConsumer, ACTIVITY_LOG_CONSUMER};

pub struct AppContext {
    pub config: WorkerConfig,
    pub pool: DbPool,
    pub broker: AmqpBroker,
}

impl AppContext {
    /// Connect to Postgres and RabbitMQ and prepare both for consumption:
    /// migrations are applied and the queue is declared and bound.
    pub async fn connect(config: WorkerConfig) -> anyhow::Result<Self> {
        let pool = auditlog_db::create_pool(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to database")?;
        tracing::info!("Database connection pool created");

        auditlog_db::health_check(&pool)
            .await
            .context("Database health check failed")?;

        auditlog_db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");

        let broker = AmqpBroker::connect(&config.rabbitmq).await?;
        broker.declare_topology(&config.rabbitmq).await?;

        Ok(Self {
            config,
            pool,
            broker,
        })
    }

    /// Build the activity-log consumer on its own broker channel with its
    /// own processor.
    pub async fn activity_log_consumer(&self) -> anyhow::Result<ActivityLogConsumer> {
        let rabbitmq = &self.config.rabbitmq;
        let channel = self
            .broker
            .open_channel()
            .await
            .context("Failed to open consumer channel")?;
        let processor = LogService::new(PgActivityLogSink::new(self.pool.clone()));

        Ok(ActivityLogConsumer::new(
            ACTIVITY_LOG_CONSUMER,
            &rabbitmq.queue,
            &rabbitmq.exchange,
            Arc::new(channel),
            Arc::new(processor),
        )
        .with_retry_policy(rabbitmq.retry_policy())
        .with_processing_timeout(rabbitmq.processing_timeout()))
    }

    /// Close the broker connection and the database pool.
    pub async fn close(&self) {
        if let Err(e) = self.broker.close().await {
            tracing::error!(error = %e, "Failed to close RabbitMQ connection");
        }
        self.pool.close().await;
    }
}
