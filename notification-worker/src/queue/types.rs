//! Broker-side types: message classes, raw deliveries and dead-letter records.

use serde::{Deserialize, Serialize};

use super::topology::ExchangeBinding;

/// Exchange for authentication emails (verification, password reset, OTP).
pub const AUTH_EXCHANGE: &str = "fixme-email-notification";
pub const AUTH_ROUTING_KEY: &str = "auth-email";
pub const AUTH_QUEUE: &str = "auth-email-queue";

/// Exchange for order lifecycle emails.
pub const ORDER_EXCHANGE: &str = "fixme-order-notification";
pub const ORDER_ROUTING_KEY: &str = "order-email";
pub const ORDER_QUEUE: &str = "order-email-queue";

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// The two independent message streams the worker consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Auth,
    Order,
}

impl MessageClass {
    pub const ALL: [MessageClass; 2] = [MessageClass::Auth, MessageClass::Order];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::Auth => "auth",
            MessageClass::Order => "order",
        }
    }

    /// Topology this class is consumed from.
    pub fn binding(&self) -> ExchangeBinding {
        match self {
            MessageClass::Auth => ExchangeBinding::direct(AUTH_EXCHANGE, AUTH_QUEUE, AUTH_ROUTING_KEY),
            MessageClass::Order => {
                ExchangeBinding::direct(ORDER_EXCHANGE, ORDER_QUEUE, ORDER_ROUTING_KEY)
            }
        }
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}{}", self.binding().queue, DEAD_LETTER_SUFFIX)
    }

    pub fn consumer_tag(&self) -> String {
        format!("notification-worker-{}", self.as_str())
    }
}

impl std::str::FromStr for MessageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(MessageClass::Auth),
            "order" => Ok(MessageClass::Order),
            other => Err(format!("unknown message class '{}'", other)),
        }
    }
}

/// A delivery as handed over by the broker, before decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub delivery_tag: u64,
    /// Set by the broker when this delivery was requeued at least once.
    pub redelivered: bool,
    pub data: Vec<u8>,
}

impl RawMessage {
    pub fn new(delivery_tag: u64, redelivered: bool, data: Vec<u8>) -> Self {
        Self {
            delivery_tag,
            redelivered,
            data,
        }
    }
}

impl From<lapin::message::Delivery> for RawMessage {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            data: delivery.data,
        }
    }
}

/// Record published to a dead-letter queue once a message is given up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub queue: String,
    pub routing_key: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub failed_at: String,
    /// Original body, lossily decoded so malformed payloads survive too
    pub payload: String,
}

impl DeadLetterRecord {
    pub fn new(class: MessageClass, raw: &RawMessage, failure_reason: String, attempts: u32) -> Self {
        let binding = class.binding();
        Self {
            queue: binding.queue,
            routing_key: binding.routing_key,
            failure_reason,
            attempts,
            failed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            payload: String::from_utf8_lossy(&raw.data).into_owned(),
        }
    }
}
