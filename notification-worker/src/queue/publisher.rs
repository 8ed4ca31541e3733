//! Async RabbitMQ publisher.
//!
//! Publishes on a channel owned by [`BrokerConnection`](super::BrokerConnection);
//! it never opens a connection of its own. Used for dead-letter records and
//! by the `notification-publish` tool.

use anyhow::{bail, Context, Result};
use lapin::{
    options::BasicPublishOptions, publisher_confirm::Confirmation, BasicProperties, Channel,
};
use tracing::info;

use super::types::{DeadLetterRecord, MessageClass};

/// Persistent, JSON-typed publisher over a shared channel.
#[derive(Clone)]
pub struct Publisher {
    channel: Channel,
}

impl Publisher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Publish an email request body to the exchange of `class`.
    pub async fn publish_request(&self, class: MessageClass, body: &[u8]) -> Result<()> {
        let binding = class.binding();

        self.publish(&binding.exchange, &binding.routing_key, body)
            .await
            .with_context(|| format!("Failed to publish to exchange {}", binding.exchange))?;

        info!(
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            body_length = body.len(),
            "rabbitmq_request_published"
        );

        Ok(())
    }

    /// Publish a dead-letter record to the dead-letter queue of `class`.
    pub async fn publish_dead_letter(
        &self,
        class: MessageClass,
        record: &DeadLetterRecord,
    ) -> Result<()> {
        let queue = class.dead_letter_queue();
        let body = serde_json::to_vec(record).context("Failed to serialize dead letter")?;

        self.publish("", &queue, &body)
            .await
            .with_context(|| format!("Failed to publish to dead-letter queue {}", queue))?;

        info!(
            queue = %queue,
            attempts = record.attempts,
            reason = %record.failure_reason,
            "rabbitmq_dead_letter_published"
        );

        Ok(())
    }

    /// Mandatory publish; succeeds only once the broker confirms a routed message.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish")?
            .await
            .context("Failed to confirm publish")?;

        check_confirmation(confirmation)
    }
}

/// Only a plain ack means the broker stored the message.
fn check_confirmation(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(None) => Ok(()),
        Confirmation::Ack(Some(_)) => bail!("Message was unroutable and returned by the broker"),
        Confirmation::Nack(_) => bail!("Broker rejected the message"),
        Confirmation::NotRequested => bail!("Channel is not in confirm mode"),
    }
}
