//! Exchange/queue/binding declaration.
//!
//! All declarations are idempotent on the broker side: declaring the same
//! entity twice with identical parameters is a no-op, while a conflicting
//! redeclaration is refused with PRECONDITION_FAILED and surfaces as a
//! [`TopologyError`].

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind, Queue,
};
use tracing::info;

use crate::error::TopologyError;

/// One exchange → queue binding.
#[derive(Debug, Clone)]
pub struct ExchangeBinding {
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub queue: String,
    pub routing_key: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeBinding {
    /// Durable, non-auto-deleted direct binding.
    pub fn direct(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            exchange_kind: ExchangeKind::Direct,
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            durable: true,
            auto_delete: false,
        }
    }
}

/// Declare the exchange, the queue, and the binding between them.
pub async fn declare_topology(
    channel: &Channel,
    binding: &ExchangeBinding,
) -> Result<Queue, TopologyError> {
    channel
        .exchange_declare(
            &binding.exchange,
            binding.exchange_kind.clone(),
            ExchangeDeclareOptions {
                durable: binding.durable,
                auto_delete: binding.auto_delete,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| TopologyError::Exchange {
            exchange: binding.exchange.clone(),
            source,
        })?;

    let queue = declare_queue(channel, &binding.queue, binding.durable, binding.auto_delete).await?;

    channel
        .queue_bind(
            &binding.queue,
            &binding.exchange,
            &binding.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| TopologyError::Bind {
            queue: binding.queue.clone(),
            exchange: binding.exchange.clone(),
            routing_key: binding.routing_key.clone(),
            source,
        })?;

    info!(
        exchange = %binding.exchange,
        queue = %binding.queue,
        routing_key = %binding.routing_key,
        message_count = queue.message_count(),
        "rabbitmq_topology_declared"
    );

    Ok(queue)
}

/// Declare a durable queue on the default exchange (used for dead letters).
pub async fn declare_dead_letter_queue(channel: &Channel, queue: &str) -> Result<Queue, TopologyError> {
    let declared = declare_queue(channel, queue, true, false).await?;

    info!(queue = %queue, "rabbitmq_dead_letter_queue_declared");

    Ok(declared)
}

async fn declare_queue(
    channel: &Channel,
    queue: &str,
    durable: bool,
    auto_delete: bool,
) -> Result<Queue, TopologyError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable,
                auto_delete,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| TopologyError::Queue {
            queue: queue.to_string(),
            source,
        })
}
