//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The single broker connection and its channel
//! - Idempotent topology declaration for the auth and order streams
//! - A publisher for dead letters and manual test messages
//!
//! ## Topology
//!
//! ```text
//! fixme-email-notification --auth-email--> auth-email-queue
//! fixme-order-notification --order-email--> order-email-queue
//! ```

pub mod connection;
pub mod publisher;
pub mod topology;
pub mod types;

pub use connection::{BrokerConnection, BrokerStatus};
pub use publisher::Publisher;
pub use topology::{declare_dead_letter_queue, declare_topology, ExchangeBinding};
pub use types::{
    DeadLetterRecord, MessageClass, RawMessage, AUTH_EXCHANGE, AUTH_QUEUE, AUTH_ROUTING_KEY,
    ORDER_EXCHANGE, ORDER_QUEUE, ORDER_ROUTING_KEY,
};
