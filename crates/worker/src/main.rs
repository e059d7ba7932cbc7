//! `auditlog-worker` -- consumes IAM activity events and persists them.
//!
//! Configuration is read from the environment (see [`auditlog_worker::config`]).
//! SIGINT or SIGTERM stops every consumer gracefully; the process exits
//! with code 1 only when startup fails.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auditlog_worker::config::WorkerConfig;
use auditlog_worker::context::AppContext;
use auditlog_worker::shutdown::shutdown_signal;
use auditlog_worker::{health, Supervisor};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "auditlog_worker=info,auditlog_pipeline=info,auditlog_db=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = ?e, "Worker failed to start");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        queue = %config.rabbitmq.queue,
        exchange = %config.rabbitmq.exchange,
        binding_key = %config.rabbitmq.binding_key,
        retry_attempts = config.rabbitmq.retry_attempts,
        "Loaded worker configuration"
    );

    // --- Database + broker ---
    let ctx = AppContext::connect(config).await?;

    // --- Consumers ---
    let mut supervisor = Supervisor::new();
    supervisor.register(Arc::new(ctx.activity_log_consumer().await?))?;
    let supervisor = Arc::new(supervisor);

    let running = supervisor.start_all().await?;
    if running == 0 {
        ctx.close().await;
        anyhow::bail!("No consumer could be started");
    }

    // --- Health endpoint ---
    let health_cancel = CancellationToken::new();
    let addr = SocketAddr::new(
        ctx.config
            .health
            .host
            .parse()
            .context("Invalid HEALTH_HOST address")?,
        ctx.config.health.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint to {addr}"))?;
    tracing::info!(%addr, "Health endpoint listening");

    let app = health::router(Arc::clone(&supervisor));
    let health_shutdown = health_cancel.clone();
    let health_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(health_shutdown.cancelled_owned())
            .await
    });

    // --- Run until signalled or every consumer exits ---
    tokio::select! {
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => tracing::info!(signal = name, "Received shutdown signal"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals"),
            }
            supervisor.stop_all().await;
        }
        () = supervisor.wait() => {
            tracing::info!("All consumers exited");
        }
    }

    // --- Post-shutdown cleanup ---
    health_cancel.cancel();
    match health_handle.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Health endpoint failed"),
        Err(e) => tracing::error!(error = %e, "Health endpoint task panicked"),
        Ok(Ok(())) => {}
    }

    ctx.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}
