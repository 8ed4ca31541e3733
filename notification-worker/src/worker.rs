//! Worker lifecycle.
//!
//! ```text
//! connect (with backoff) → declare topology → consume auth + order
//!        → shutdown → stop consuming → drain handlers → close broker
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::ack::{AckController, Backoff, ChannelAcker, MessageAcker};
use crate::config::Config;
use crate::consumer::{run_consumer, start_consumer, MessageHandler};
use crate::dispatch::Dispatcher;
use crate::error::TopologyError;
use crate::mail::MailSender;
use crate::process::AppLocals;
use crate::queue::{
    declare_dead_letter_queue, declare_topology, BrokerConnection, BrokerStatus, ExchangeBinding,
    MessageClass,
};

const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Run the worker until `shutdown` is cancelled.
///
/// Broker failures never end the process: if the broker cannot be reached
/// the worker idles until shutdown while `status` reports it disconnected.
pub async fn run(
    config: Config,
    mailer: Arc<dyn MailSender>,
    status: BrokerStatus,
    shutdown: CancellationToken,
) -> Result<()> {
    let Some(broker) = connect_with_backoff(&config, &shutdown).await else {
        shutdown.cancelled().await;
        info!("worker_stopped_without_broker");
        return Ok(());
    };

    status.set(broker.channel().clone());

    let tracker = TaskTracker::new();
    let consumers = start_consumers(&config, &broker, mailer, &tracker, &shutdown).await;

    shutdown.cancelled().await;
    info!("worker_shutting_down");

    for handle in consumers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "consumer_failed"),
            Err(e) => error!(error = %e, "consumer_task_panicked"),
        }
    }

    drain(&tracker, config.shutdown_drain_timeout()).await;

    status.clear();
    broker.close().await;

    info!("worker_stopped");
    Ok(())
}

/// Try to connect up to `broker_connect_attempts` times.
async fn connect_with_backoff(
    config: &Config,
    shutdown: &CancellationToken,
) -> Option<BrokerConnection> {
    let backoff = Backoff::new(
        Duration::from_millis(config.broker_connect_backoff_ms),
        MAX_CONNECT_BACKOFF,
    );
    let attempts = config.broker_connect_attempts.max(1);

    for attempt in 1..=attempts {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = BrokerConnection::connect(&config.rabbitmq_endpoint, config.prefetch_count) => result,
        };

        match result {
            Ok(broker) => return Some(broker),
            Err(e) if attempt < attempts => {
                let delay = backoff.jittered(attempt);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "rabbitmq_connect_failed"
                );

                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(attempts, error = %e, "rabbitmq_connect_exhausted");
            }
        }
    }

    None
}

/// Wait for in-flight handlers, at most `timeout`. Returns whether all finished.
pub async fn drain(tracker: &TaskTracker, timeout: Duration) -> bool {
    tracker.close();
    info!(in_flight = tracker.len(), "worker_draining");

    match tokio::time::timeout(timeout, tracker.wait()).await {
        Ok(()) => true,
        Err(_) => {
            warn!(
                in_flight = tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "worker_drain_timed_out"
            );
            false
        }
    }
}

/// Declare `binding` (and its dead-letter queue) on a channel of its own.
///
/// A refused declaration closes only this throwaway channel, leaving the
/// shared channel and the other streams untouched.
pub async fn declare_isolated(
    broker: &BrokerConnection,
    binding: &ExchangeBinding,
    dead_letter_queue: Option<&str>,
) -> Result<()> {
    let channel = broker
        .create_channel()
        .await
        .context("Failed to open topology channel")?;

    let result = async {
        declare_topology(&channel, binding).await?;
        if let Some(queue) = dead_letter_queue {
            declare_dead_letter_queue(&channel, queue).await?;
        }
        Ok::<(), TopologyError>(())
    }
    .await;

    if channel.status().connected() {
        if let Err(e) = channel.close(200, "Topology declared").await {
            debug!(error = %e, "rabbitmq_topology_channel_close_error");
        }
    }

    result.with_context(|| format!("Failed to declare topology for {}", binding.queue))
}

/// Declare every topology, then start a consumer for each class whose
/// declaration succeeded.
async fn start_consumers(
    config: &Config,
    broker: &BrokerConnection,
    mailer: Arc<dyn MailSender>,
    tracker: &TaskTracker,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<Result<()>>> {
    let controller = AckController::new(config.ack_policy.clone());
    let mut ready = Vec::new();

    for class in MessageClass::ALL {
        let dead_letter_queue = controller
            .policy()
            .uses_dead_letter()
            .then(|| class.dead_letter_queue());

        if let Err(e) = declare_isolated(broker, &class.binding(), dead_letter_queue.as_deref()).await {
            error!(class = class.as_str(), error = %format!("{:#}", e), "rabbitmq_topology_failed");
            continue;
        }

        ready.push(class);
    }

    let channel = broker.channel();
    let mut consumers = Vec::new();

    for class in ready {
        match start_consumer(channel, class).await {
            Ok(consumer) => consumers.push((class, consumer)),
            Err(e) => error!(class = class.as_str(), error = %format!("{:#}", e), "rabbitmq_consume_failed"),
        }
    }

    info!(
        streams = consumers.len(),
        ack_policy = controller.policy().name(),
        max_in_flight = config.max_in_flight,
        "worker_consumers_ready"
    );

    let limiter = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let acker: Arc<dyn MessageAcker> = Arc::new(ChannelAcker::new(channel.clone()));
    let dispatcher = Dispatcher::new(mailer, config.send_timeout());
    let locals = AppLocals::from_config(config);

    consumers
        .into_iter()
        .map(|(class, consumer)| {
            let handler = Arc::new(MessageHandler::new(
                class,
                locals.clone(),
                dispatcher.clone(),
                controller.clone(),
                Arc::clone(&acker),
                shutdown.clone(),
            ));

            tokio::spawn(run_consumer(
                channel.clone(),
                consumer,
                handler,
                Arc::clone(&limiter),
                tracker.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_handlers_finishing_after_cancel() {
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));

        tracker.spawn({
            let shutdown = shutdown.clone();
            let finished = Arc::clone(&finished);
            async move {
                shutdown.cancelled().await;
                tokio::time::sleep(Duration::from_secs(2)).await;
                finished.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });

        shutdown.cancel();

        assert!(drain(&tracker, Duration::from_secs(30)).await);
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_timeout() {
        let tracker = TaskTracker::new();
        tracker.spawn(std::future::pending::<()>());

        assert!(!drain(&tracker, Duration::from_millis(500)).await);
        assert_eq!(tracker.len(), 1);
    }
}
