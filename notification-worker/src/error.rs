//! Error taxonomy for the notification pipeline.
//!
//! Each stage has its own error type so the acknowledgment controller can
//! tell a poison message (decode) from a transient failure (delivery).

use thiserror::Error;

/// Failure to establish or use the broker connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to set QoS: {0}")]
    Qos(#[source] lapin::Error),
}

/// Exchange, queue or binding declaration failed (usually a parameter conflict).
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to declare exchange '{exchange}': {source}")]
    Exchange {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue '{queue}': {source}")]
    Queue {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
}

/// The raw payload could not be turned into a delivery request.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or empty required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' has an unsupported type")]
    InvalidField(&'static str),
}

/// The mail collaborator could not deliver an email.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to render template '{template}': {reason}")]
    Render { template: String, reason: String },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("transport rejected email: {0}")]
    Transport(String),

    #[error("send timed out after {0} ms")]
    Timeout(u64),
}

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("unknown ACK_POLICY '{0}' (expected ack_always, retry_then_dead_letter or redeliver_once)")]
    UnknownAckPolicy(String),
}
