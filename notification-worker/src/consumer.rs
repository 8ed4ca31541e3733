//! RabbitMQ consumer module using lapin.
//!
//! [`start_consumer`] registers on one queue, [`run_consumer`] pulls its
//! deliveries and spawns a tracked task per message; [`MessageHandler`] owns a message end-to-end from
//! decode through dispatch to its final acknowledgment.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel, Consumer,
};
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::ack::{AckController, Decision, MessageAcker, MessageState, Outcome};
use crate::dispatch::Dispatcher;
use crate::process::{decode, AppLocals};
use crate::queue::{MessageClass, RawMessage};

/// Processes single messages of one class.
pub struct MessageHandler {
    class: MessageClass,
    locals: AppLocals,
    dispatcher: Dispatcher,
    controller: AckController,
    acker: Arc<dyn MessageAcker>,
    shutdown: CancellationToken,
}

impl MessageHandler {
    pub fn new(
        class: MessageClass,
        locals: AppLocals,
        dispatcher: Dispatcher,
        controller: AckController,
        acker: Arc<dyn MessageAcker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            class,
            locals,
            dispatcher,
            controller,
            acker,
            shutdown,
        }
    }

    pub fn class(&self) -> MessageClass {
        self.class
    }

    /// Decode, dispatch and finalize one message. Never panics on bad input.
    pub async fn handle(&self, raw: RawMessage) -> MessageState {
        let queue = self.class.binding().queue;
        let tag = raw.delivery_tag;

        debug!(
            queue = %queue,
            delivery_tag = tag,
            redelivered = raw.redelivered,
            state = MessageState::Decoding.as_str(),
            "message_state"
        );

        let decoded = match decode(self.class, &raw.data, &self.locals) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    queue = %queue,
                    delivery_tag = tag,
                    error = %e,
                    body_length = raw.data.len(),
                    "message_decode_failed"
                );

                let decision = self.controller.decide(Outcome::DecodeFailed, 1, raw.redelivered);
                let reason = e.to_string();
                return self
                    .controller
                    .finalize(self.acker.as_ref(), self.class, &raw, decision, Some(&reason), 1)
                    .await;
            }
        };

        let receiver = decoded.request.receiver_email();
        let mut pending = decoded.request.templates();
        let mut attempt = 1;

        loop {
            debug!(
                queue = %queue,
                delivery_tag = tag,
                attempt,
                templates = ?pending,
                state = MessageState::Dispatching.as_str(),
                "message_state"
            );

            let failure = match self
                .dispatcher
                .dispatch_all(&pending, receiver, &decoded.context)
                .await
            {
                Ok(()) => {
                    let decision = self.controller.decide(Outcome::Delivered, attempt, raw.redelivered);
                    return self
                        .controller
                        .finalize(self.acker.as_ref(), self.class, &raw, decision, None, attempt)
                        .await;
                }
                Err(failure) => failure,
            };

            let reason = failure.error.to_string();
            let decision = self
                .controller
                .decide(Outcome::DeliveryFailed, attempt, raw.redelivered);

            error!(
                queue = %queue,
                delivery_tag = tag,
                template = %failure.remaining.first().map(String::as_str).unwrap_or_default(),
                receiver,
                attempt,
                error = %reason,
                decision = ?decision,
                "message_delivery_failed"
            );

            match decision {
                Decision::Retry(delay) => {
                    info!(
                        queue = %queue,
                        delivery_tag = tag,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        state = MessageState::Retrying.as_str(),
                        "message_retry_scheduled"
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            warn!(queue = %queue, delivery_tag = tag, "message_retry_interrupted");
                            return self
                                .controller
                                .finalize(self.acker.as_ref(), self.class, &raw, Decision::Requeue, Some(&reason), attempt)
                                .await;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    pending = failure.remaining;
                    attempt += 1;
                }
                terminal => {
                    return self
                        .controller
                        .finalize(self.acker.as_ref(), self.class, &raw, terminal, Some(&reason), attempt)
                        .await;
                }
            }
        }
    }
}

/// Register a consumer for `class` on `channel`.
pub async fn start_consumer(channel: &Channel, class: MessageClass) -> Result<Consumer> {
    let queue = class.binding().queue;

    channel
        .basic_consume(
            &queue,
            &class.consumer_tag(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to start consumer on {}", queue))
}

/// Drive `consumer` until `shutdown` fires or the broker closes it.
///
/// Each delivery is handled in a task spawned on `tracker`; `limiter` bounds
/// how many run at once. Returns once no new deliveries will be accepted;
/// in-flight handlers are drained by the caller through `tracker`.
pub async fn run_consumer(
    channel: Channel,
    mut consumer: Consumer,
    handler: Arc<MessageHandler>,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) -> Result<()> {
    let class = handler.class();
    let queue = class.binding().queue;
    let consumer_tag = class.consumer_tag();

    info!(queue = %queue, consumer_tag = %consumer_tag, "rabbitmq_consumer_started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(queue = %queue, "consumer_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let raw = RawMessage::from(delivery);

                        info!(
                            queue = %queue,
                            delivery_tag = raw.delivery_tag,
                            redelivered = raw.redelivered,
                            body_length = raw.data.len(),
                            state = MessageState::Received.as_str(),
                            "rabbitmq_message_received"
                        );

                        // Unacked deliveries left behind here are requeued by the broker on close.
                        let permit = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            permit = Arc::clone(&limiter).acquire_owned() => {
                                permit.context("Concurrency limiter closed")?
                            }
                        };

                        let handler = Arc::clone(&handler);
                        tracker.spawn(async move {
                            let _permit = permit;
                            handler.handle(raw).await;
                        });
                    }
                    Some(Err(e)) => {
                        error!(queue = %queue, error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!(queue = %queue, "rabbitmq_consumer_closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    if let Err(e) = channel
        .basic_cancel(&consumer_tag, BasicCancelOptions::default())
        .await
    {
        warn!(queue = %queue, error = %e, "rabbitmq_consumer_cancel_failed");
    }

    info!(queue = %queue, "consumer_stopped");
    Ok(())
}
