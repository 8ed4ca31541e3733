//! Notification worker - RabbitMQ consumer that sends templated emails.
//!
//! Serves `GET /notification-health` alongside the consumers and shuts down
//! in order on SIGINT/SIGTERM: stop consuming, drain, close the broker, then
//! stop the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notifications::{web, worker, AppState, BrokerStatus, Config, SmtpMailer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        smtp_host = %config.smtp_host,
        templates_dir = %config.templates_dir,
        prefetch_count = config.prefetch_count,
        max_in_flight = config.max_in_flight,
        ack_policy = config.ack_policy.name(),
        "config_loaded"
    );

    let mailer = Arc::new(SmtpMailer::from_config(&config).context("Failed to build SMTP mailer")?);

    let status = BrokerStatus::new();
    let shutdown = CancellationToken::new();
    let server_stop = CancellationToken::new();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    let app = web::router(AppState::new(status.clone()));
    let server = {
        let server_stop = server_stop.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_stop.cancelled().await })
                .await
        })
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    worker::run(config, mailer, status, shutdown).await?;

    server_stop.cancel();
    server
        .await
        .context("Server task failed")?
        .context("Server error")?;

    info!("worker_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("worker_shutting_down");
}
